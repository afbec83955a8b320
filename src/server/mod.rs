//! HTTP surface: the `/rank` endpoint plus a liveness probe.
//!
//! Request handling is a pure transformation over one piece of shared
//! immutable state (the loaded model); the blocking fetch/inference
//! pipeline runs on the blocking thread pool so concurrent requests do not
//! stall the async executor.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;

use crate::clip::SceneEmbedder;
use crate::fetch::FetchImage;
use crate::rank::{self, RankRequest, ScoredImage};

/// Shared application state, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub embedder: Arc<dyn SceneEmbedder>,
    pub fetcher: Arc<dyn FetchImage>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/rank", post(rank_images))
        .route("/health", get(health))
        .with_state(state)
}

/// Client-facing failure: always `400` with an `{"error": ...}` body.
///
/// Per-candidate failures never reach this; they are swallowed inside the
/// ranking pipeline. This covers malformed requests and request-level
/// failures like a text-encoder error.
struct ApiError(String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.0 }));
        (StatusCode::BAD_REQUEST, body).into_response()
    }
}

async fn rank_images(
    State(state): State<AppState>,
    payload: Result<Json<RankRequest>, JsonRejection>,
) -> Result<Json<Vec<ScoredImage>>, ApiError> {
    let Json(request) = payload.map_err(|rejection| ApiError(rejection.body_text()))?;

    let scored = tokio::task::spawn_blocking(move || {
        rank::rank(state.embedder.as_ref(), state.fetcher.as_ref(), &request)
    })
    .await
    .map_err(|e| ApiError(format!("ranking task failed: {e}")))?
    .map_err(|e| ApiError(format!("{e:#}")))?;

    Ok(Json(scored))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    model: &'static str,
}

/// The model is fully loaded before the listener binds, so reachability
/// implies readiness.
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        model: state.embedder.model_name(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchError;
    use anyhow::{anyhow, Result};
    use axum::body::Body;
    use axum::http::{header, Request};
    use http_body_util::BodyExt;
    use image::DynamicImage;
    use tower::util::ServiceExt;

    /// Embedder returning fixed vectors; image embeddings match the text.
    struct FixedEmbedder {
        fail_text: bool,
    }

    impl SceneEmbedder for FixedEmbedder {
        fn embed_text(&self, _text: &str) -> Result<Vec<f32>> {
            if self.fail_text {
                return Err(anyhow!("text encoder failure"));
            }
            Ok(vec![1.0, 0.0])
        }

        fn embed_image(&self, _image: &DynamicImage) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }

        fn model_name(&self) -> &'static str {
            "stub"
        }
    }

    /// Fetcher that either always succeeds with a 1x1 image or always fails.
    struct FixedFetcher {
        reachable: bool,
    }

    impl FetchImage for FixedFetcher {
        fn fetch(&self, _url: &str) -> std::result::Result<DynamicImage, FetchError> {
            if self.reachable {
                Ok(DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
                    1,
                    1,
                    image::Rgb([0, 0, 0]),
                )))
            } else {
                Err(FetchError::Request("connection refused".to_string()))
            }
        }
    }

    fn app(fail_text: bool, reachable: bool) -> Router {
        router(AppState {
            embedder: Arc::new(FixedEmbedder { fail_text }),
            fetcher: Arc::new(FixedFetcher { reachable }),
        })
    }

    fn rank_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/rank")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn missing_scene_is_a_client_error() {
        let response = app(false, true)
            .oneshot(rank_request(r#"{"images": []}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert!(!json["error"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_json_is_a_client_error() {
        let response = app(false, true)
            .oneshot(rank_request("{not json"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert!(!json["error"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_image_list_returns_empty_ranking() {
        let response = app(false, true)
            .oneshot(rank_request(r#"{"scene": "a red bicycle", "images": []}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn unreachable_thumbs_yield_empty_ranking_with_ok_status() {
        let body = r#"{"scene": "a red bicycle", "images": [
            {"url": "a", "thumb": "http://down/a.jpg"},
            {"url": "b", "thumb": "http://down/b.jpg"}
        ]}"#;
        let response = app(false, false).oneshot(rank_request(body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn successful_ranking_reports_display_urls() {
        let body = r#"{"scene": "a red bicycle", "images": [
            {"url": "display-a", "thumb": "http://t/a.jpg"},
            {"url": "display-b", "thumb": "http://t/b.jpg"}
        ]}"#;
        let response = app(false, true).oneshot(rank_request(body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let entries = json.as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["url"], "display-a");
        assert_eq!(entries[1]["url"], "display-b");
        assert_eq!(entries[0]["score"], 1.0);
    }

    #[tokio::test]
    async fn text_encoder_failure_is_a_client_error() {
        let response = app(true, true)
            .oneshot(rank_request(r#"{"scene": "x", "images": []}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("text encoder"));
    }

    #[tokio::test]
    async fn health_reports_model() {
        let response = app(false, true)
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["model"], "stub");
    }
}
