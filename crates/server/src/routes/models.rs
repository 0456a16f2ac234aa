//! `/v1/models` surface over the local catalog
//!
//! Listing and deletion work against the local cache; download delegates
//! to the artifact store and is refused while offline.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use speaches_core::{Error, ListModelsResponse, Model, ModelFamily, ModelTask};
use speaches_models::LocalModel;

use crate::error::ApiResult;
use crate::state::AppState;

fn family_task(family: ModelFamily) -> Option<ModelTask> {
    match family {
        ModelFamily::Asr => Some(ModelTask::AutomaticSpeechRecognition),
        ModelFamily::TtsVoicePack | ModelFamily::TtsSingleVoice => Some(ModelTask::TextToSpeech),
        ModelFamily::Unknown => None,
    }
}

fn to_api_model(local: LocalModel) -> Option<Model> {
    let task = family_task(local.family)?;
    Some(Model::new(
        local.id.to_string(),
        local.created,
        local.languages,
        task,
    ))
}

#[derive(Debug, Deserialize)]
pub struct ListModelsQuery {
    task: Option<ModelTask>,
}

pub async fn list_models(
    State(state): State<AppState>,
    Query(query): Query<ListModelsQuery>,
) -> Json<ListModelsResponse> {
    let models = state
        .catalog
        .list_local_models()
        .into_iter()
        .filter_map(to_api_model)
        .filter(|model| query.task.map_or(true, |task| model.task == task))
        .collect();
    Json(ListModelsResponse::new(models))
}

pub async fn get_model(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
) -> ApiResult<Json<Model>> {
    let model = state.aliases.resolve(&model_id);
    state
        .catalog
        .list_local_models()
        .into_iter()
        .filter(|local| local.id == model)
        .find_map(to_api_model)
        .map(Json)
        .ok_or_else(|| Error::ModelNotFound(model).into())
}

pub async fn download_model(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
) -> ApiResult<(StatusCode, Json<Model>)> {
    let model = state.aliases.resolve(&model_id);
    let catalog = std::sync::Arc::clone(&state.catalog);
    {
        let model = model.clone();
        tokio::task::spawn_blocking(move || catalog.download_model(&model))
            .await
            .map_err(|err| Error::Internal(format!("download task failed: {err}")))??;
    }

    let api_model = state
        .catalog
        .list_local_models()
        .into_iter()
        .filter(|local| local.id == model)
        .find_map(to_api_model)
        .ok_or(Error::ModelNotSupported(model))?;
    Ok((StatusCode::CREATED, Json(api_model)))
}

pub async fn delete_model(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
) -> ApiResult<StatusCode> {
    let model = state.aliases.resolve(&model_id);
    state.catalog.delete_local_model(&model)?;
    Ok(StatusCode::NO_CONTENT)
}
