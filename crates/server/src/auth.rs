//! Bearer-token authentication
//!
//! When `SPEACHES_API_KEY` is set, every request except `/health` must
//! carry `Authorization: Bearer <token>` exactly. Without a configured
//! key the middleware is a pass-through.

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::state::AppState;

/// Paths reachable without credentials.
const PUBLIC_PATHS: &[&str] = &["/health"];

pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.settings.api_key.as_deref() else {
        return next.run(request).await;
    };

    if PUBLIC_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }

    let header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    match header.and_then(|header| header.strip_prefix("Bearer ")) {
        Some(provided) if constant_time_compare(provided.as_bytes(), expected.as_bytes()) => {
            next.run(request).await
        }
        Some(_) => (StatusCode::UNAUTHORIZED, "Invalid API key").into_response(),
        None => (
            StatusCode::UNAUTHORIZED,
            "Missing or malformed Authorization header. Expected: Bearer <token>",
        )
            .into_response(),
    }
}

/// Constant-time comparison to prevent timing attacks.
fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare(b"secret", b"secret"));
        assert!(!constant_time_compare(b"secret", b"secre"));
        assert!(!constant_time_compare(b"secret", b"secreT"));
        assert!(!constant_time_compare(b"abc", b"xyz"));
    }
}
