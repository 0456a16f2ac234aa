//! speaches gateway server
//!
//! OpenAI-compatible HTTP surface over local speech models: speech
//! synthesis, transcription/translation, audio-enabled chat completion
//! proxying, and the operational model-management endpoints.

pub mod auth;
pub mod cache;
pub mod error;
pub mod routes;
pub mod services;
pub mod state;
pub mod upstream;

pub use cache::TranscriptCache;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
pub use upstream::UpstreamClient;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{middleware, Router};
use tower_http::trace::TraceLayer;

/// Uploads up to 200 MB, the OpenAI limit.
const MAX_UPLOAD_BYTES: usize = 200 * 1024 * 1024;

/// Assemble the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // OpenAI audio + chat surface
        .route("/v1/audio/speech", post(routes::speech::create_speech))
        .route(
            "/v1/audio/transcriptions",
            post(routes::stt::create_transcription),
        )
        .route(
            "/v1/audio/translations",
            post(routes::stt::create_translation),
        )
        .route(
            "/v1/chat/completions",
            post(routes::chat::create_chat_completion),
        )
        // Model registry surface
        .route("/v1/models", get(routes::models::list_models))
        .route(
            "/v1/models/*model_id",
            get(routes::models::get_model)
                .post(routes::models::download_model)
                .delete(routes::models::delete_model),
        )
        // Diagnostics and loaded-model management
        .route("/health", get(routes::misc::health))
        .route("/api/ps", get(routes::misc::list_running))
        .route(
            "/api/ps/*model_id",
            post(routes::misc::start_model).delete(routes::misc::stop_model),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use speaches_config::{ModelAliases, Settings};
    use tower::ServiceExt;

    fn test_state(api_key: Option<&str>) -> AppState {
        let settings = Settings {
            api_key: api_key.map(str::to_string),
            ..Settings::default()
        };
        AppState::new(settings, ModelAliases::default())
    }

    #[tokio::test]
    async fn test_health_without_auth() {
        let router = create_router(test_state(Some("secret")));
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_bearer_is_rejected() {
        let router = create_router(test_state(Some("secret")));
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/ps")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_wrong_bearer_is_rejected() {
        let router = create_router(test_state(Some("secret")));
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/ps")
                    .header("authorization", "Bearer nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_correct_bearer_passes() {
        let router = create_router(test_state(Some("secret")));
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/ps")
                    .header("authorization", "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_no_key_means_open_access() {
        let router = create_router(test_state(None));
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/ps")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_speech_model_is_404() {
        let router = create_router(test_state(None));
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/audio/speech")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"model":"acme/absent","input":"Hello.","voice":"af_heart","response_format":"pcm"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_out_of_range_sample_rate_is_422() {
        let router = create_router(test_state(None));
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/audio/speech")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"model":"acme/absent","input":"Hello.","voice":"af_heart","sample_rate":7999}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_stop_unloaded_model_is_404() {
        let router = create_router(test_state(None));
        let response = router
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/ps/acme/asr-tiny")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_models_list_is_empty_without_cache() {
        let router = create_router(test_state(None));
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/v1/models")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
