//! Health and operational model-management endpoints
//!
//! `/api/ps` mirrors the loaded-model view of the ASR manager: list,
//! eager-load, force-unload.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use speaches_core::{Error, ModelFamily};

use crate::error::ApiResult;
use crate::state::AppState;

pub async fn health() -> &'static str {
    "OK"
}

/// Ids of currently loaded ASR models.
pub async fn list_running(State(state): State<AppState>) -> Json<serde_json::Value> {
    let models: Vec<String> = state
        .asr
        .list_loaded()
        .into_iter()
        .map(|id| id.to_string())
        .collect();
    Json(json!({ "models": models }))
}

/// Eagerly load a model. 200 when it was loaded by this call, 409 when
/// it already was resident.
pub async fn start_model(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let model = state.aliases.resolve(&model_id);
    if state.asr.is_loaded(&model) {
        return Ok((StatusCode::CONFLICT, "Model already loaded").into_response());
    }
    if state.catalog.classify(&model)? != ModelFamily::Asr {
        return Err(Error::ModelNotSupported(model).into());
    }
    // Taking and dropping a lease leaves the model resident with its
    // idle TTL armed.
    let lease = state.asr.lease(&model).await?;
    drop(lease);
    Ok(StatusCode::OK.into_response())
}

/// Force-unload a model: 204 done, 404 not loaded, 409 in use.
pub async fn stop_model(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
) -> ApiResult<StatusCode> {
    let model = state.aliases.resolve(&model_id);
    state.asr.force_unload(&model)?;
    Ok(StatusCode::NO_CONTENT)
}
