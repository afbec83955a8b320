mod clip;
mod config;
mod fetch;
mod logging;
mod rank;
mod server;

use anyhow::Result;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use clip::ClipModel;
use config::Config;
use fetch::ImageFetcher;
use server::AppState;

struct Args {
    config_path: Option<PathBuf>,
    port: Option<u16>,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args {
        config_path: None,
        port: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("scenerank {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    parsed.config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    match args[i + 1].parse() {
                        Ok(port) => parsed.port = Some(port),
                        Err(_) => {
                            eprintln!("Error: --port requires a number between 1 and 65535");
                            std::process::exit(1);
                        }
                    }
                    i += 1;
                } else {
                    eprintln!("Error: --port requires a port number");
                    std::process::exit(1);
                }
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    parsed
}

fn print_help() {
    println!(
        r#"scenerank - rank candidate images against a scene description

USAGE:
    scenerank [OPTIONS]

OPTIONS:
    --config, -c PATH   Path to config file
    --port, -p N        TCP port to listen on (default: 8080)
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    SCENERANK_CONFIG    Path to config file (overrides default location)
    SCENERANK_LOG       Log level (trace, debug, info, warn, error)
    PORT                TCP port to listen on (overridden by --port)

Config file location: $XDG_CONFIG_HOME/scenerank/config.toml

ENDPOINTS:
    POST /rank          Rank candidate images against a scene description
    GET  /health        Liveness and model info"#
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();

    logging::init()?;

    // Load configuration
    let config = match &args.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    // Model load is fatal on failure: never serve with a partial model
    info!("Loading CLIP model (first run downloads model files)...");
    let model = ClipModel::load(&config.model)?;

    let state = AppState {
        embedder: Arc::new(model),
        fetcher: Arc::new(ImageFetcher::new(&config.fetch)),
    };

    let port = args.port.unwrap_or_else(|| config.server.resolved_port());
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            error!("Failed to install Ctrl+C handler: {}", e);
            // Without a signal handler there is nothing to wait for;
            // park so the server keeps running until killed.
            std::future::pending::<()>().await;
        }
    }
}
