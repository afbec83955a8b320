use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub fetch: FetchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// TCP port the HTTP server binds, on all interfaces.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

impl ServerConfig {
    /// Configured port, with the `PORT` environment variable taking
    /// precedence over the config file.
    pub fn resolved_port(&self) -> u16 {
        std::env::var("PORT")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Directory where downloaded model files are cached.
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,

    /// Intra-op thread count for the ONNX sessions.
    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,
}

fn default_models_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("scenerank")
        .join("models")
}

fn default_intra_threads() -> usize {
    4
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            models_dir: default_models_dir(),
            intra_threads: default_intra_threads(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Per-image download timeout in seconds.
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum accepted image payload in bytes. Larger downloads are
    /// rejected, not truncated.
    #[serde(default = "default_fetch_max_bytes")]
    pub max_bytes: u64,
}

fn default_fetch_timeout_secs() -> u64 {
    5
}

fn default_fetch_max_bytes() -> u64 {
    1024 * 1024 // 1MiB
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout_secs(),
            max_bytes: default_fetch_max_bytes(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("SCENERANK_CONFIG") {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("scenerank")
            .join("config.toml")
    }
}
