//! `POST /v1/audio/speech`
//!
//! Streamable formats (`mp3`, `pcm`) go out chunk by chunk as synthesis
//! produces them; container formats (`wav`, `flac`) buffer the full PCM
//! stream and mux once. The model lease travels inside the body stream
//! and is released when the response finishes or the client disconnects.

use axum::body::Body;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures::StreamExt;

use speaches_audio::encode_pcm16;
use speaches_core::{AudioFormat, CreateSpeechRequest};
use speaches_pipeline::{clean_for_synthesis, collect_pcm};

use crate::error::ApiResult;
use crate::services;
use crate::state::AppState;

pub async fn create_speech(
    State(state): State<AppState>,
    Json(body): Json<CreateSpeechRequest>,
) -> ApiResult<Response> {
    body.validate_sample_rate()?;

    let model = state.aliases.resolve(&body.model);
    let input = clean_for_synthesis(&body.input);

    let (pcm_stream, output_rate) = services::synthesize_stream(
        &state,
        &model,
        input,
        &body.voice,
        body.speed,
        body.sample_rate,
    )
    .await?;

    let format = body.response_format;
    let media_type = format.media_type();

    if format.is_streamable() {
        // Each PCM chunk is encoded independently; mp3 frames concatenate
        // into a playable stream, pcm needs no framing at all.
        let body_stream = pcm_stream.map(move |chunk| -> Result<Bytes, std::io::Error> {
            let pcm = chunk.map_err(std::io::Error::other)?;
            match format {
                AudioFormat::Pcm => Ok(pcm),
                _ => encode_pcm16(&pcm, output_rate, format).map_err(std::io::Error::other),
            }
        });
        let response = Response::builder()
            .header(CONTENT_TYPE, media_type)
            .body(Body::from_stream(body_stream))
            .map_err(|err| speaches_core::Error::Internal(err.to_string()))?;
        return Ok(response);
    }

    let pcm = collect_pcm(pcm_stream).await?;
    let encoded = encode_pcm16(&pcm, output_rate, format)?;
    Ok(([(CONTENT_TYPE, media_type)], encoded).into_response())
}
