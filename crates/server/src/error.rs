//! HTTP error mapping
//!
//! The one place domain errors become status codes. Anything without a
//! deliberate mapping gets a correlation id, a full log line, and an
//! opaque 500.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use speaches_core::Error;

pub type ApiResult<T> = Result<T, ApiError>;

/// Wrapper giving [`speaches_core::Error`] an HTTP shape.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl From<speaches_audio::AudioError> for ApiError {
    fn from(err: speaches_audio::AudioError) -> Self {
        ApiError(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::ModelNotFound(_) | Error::ModelNotSupported(_) | Error::NotLoaded(_) => {
                StatusCode::NOT_FOUND
            }
            Error::InvalidParameter { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::BadAudio(_) => StatusCode::BAD_REQUEST,
            Error::Busy(_) => StatusCode::CONFLICT,
            Error::Offline => StatusCode::SERVICE_UNAVAILABLE,
            Error::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Error::LoadFailed { .. }
            | Error::Audio(_)
            | Error::Inference(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            let correlation_id = uuid::Uuid::new_v4().to_string();
            error!(correlation_id, error = %self.0, "request failed");
            return (
                status,
                Json(json!({
                    "detail": "internal server error",
                    "correlation_id": correlation_id,
                })),
            )
                .into_response();
        }

        (status, Json(json!({ "detail": self.0.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use speaches_core::ModelId;

    fn status_of(err: Error) -> StatusCode {
        ApiError(err).into_response().status()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_of(Error::ModelNotFound(ModelId::new("a/b"))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(Error::ModelNotSupported(ModelId::new("a/b"))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(Error::invalid_param("speed", "out of range")),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(Error::BadAudio("unreadable".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(Error::Busy(ModelId::new("a/b"))),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(Error::Upstream {
                status: 429,
                message: "rate limited".into()
            }),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status_of(Error::Internal("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_errors_hide_details() {
        let response = ApiError(Error::Internal("secret stack".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
