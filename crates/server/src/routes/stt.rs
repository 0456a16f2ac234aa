//! `POST /v1/audio/transcriptions` and `/v1/audio/translations`
//!
//! Multipart uploads are decoded to mono f32 at the model's rate and
//! run through the ASR executor. Non-streaming responses render every
//! segment at once; `stream=true` emits one SSE `data:` event per
//! segment in the requested format.

use std::convert::Infallible;

use axum::extract::multipart::Multipart;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use tracing::{debug, error, warn};

use speaches_core::{
    validate_timestamp_granularities, Error, TimestampGranularity, TranscriptionInfo,
    TranscriptionJson, TranscriptionResponseFormat, TranscriptionSegment, TranscriptionVerboseJson,
};
use speaches_executors::whisper::{AsrTask, TranscribeOptions};
use speaches_pipeline::{segments_to_srt, segments_to_vtt};

use crate::error::ApiResult;
use crate::services::{self, RunningTranscription};
use crate::state::AppState;

/// Parsed multipart form shared by both endpoints.
struct TranscriptionForm {
    file: Bytes,
    model: String,
    language: Option<String>,
    prompt: Option<String>,
    temperature: f32,
    response_format: TranscriptionResponseFormat,
    granularities: Vec<TimestampGranularity>,
    stream: bool,
    hotwords: Option<String>,
    vad_filter: bool,
}

impl TranscriptionForm {
    async fn parse(mut multipart: Multipart) -> ApiResult<Self> {
        let mut file: Option<Bytes> = None;
        let mut model: Option<String> = None;
        let mut language = None;
        let mut prompt = None;
        let mut temperature = 0.0f32;
        let mut response_format = TranscriptionResponseFormat::default();
        let mut granularities = Vec::new();
        let mut stream = false;
        let mut hotwords = None;
        let mut vad_filter = false;

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|err| Error::BadAudio(format!("malformed multipart body: {err}")))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "file" => {
                    file = Some(field.bytes().await.map_err(|err| {
                        Error::BadAudio(format!("could not read the audio file: {err}"))
                    })?);
                }
                "model" => model = Some(text_field(field, "model").await?),
                "language" => language = Some(text_field(field, "language").await?),
                "prompt" => prompt = Some(text_field(field, "prompt").await?),
                "hotwords" => hotwords = Some(text_field(field, "hotwords").await?),
                "temperature" => {
                    let raw = text_field(field, "temperature").await?;
                    temperature = raw.parse().map_err(|_| {
                        Error::invalid_param("temperature", format!("'{raw}' is not a number"))
                    })?;
                }
                "response_format" => {
                    response_format = parse_response_format(&text_field(field, "response_format").await?)?;
                }
                "timestamp_granularities[]" => {
                    granularities.push(parse_granularity(
                        &text_field(field, "timestamp_granularities[]").await?,
                    )?);
                }
                "stream" => stream = parse_bool(&text_field(field, "stream").await?),
                "vad_filter" => vad_filter = parse_bool(&text_field(field, "vad_filter").await?),
                other => debug!(field = other, "ignoring unknown form field"),
            }
        }

        Ok(Self {
            file: file.ok_or_else(|| Error::BadAudio("missing 'file' form field".to_string()))?,
            model: model
                .ok_or_else(|| Error::invalid_param("model", "required field is missing"))?,
            language,
            prompt,
            temperature,
            response_format,
            granularities,
            stream,
            hotwords,
            vad_filter,
        })
    }
}

async fn text_field(
    field: axum::extract::multipart::Field<'_>,
    name: &'static str,
) -> Result<String, Error> {
    field
        .text()
        .await
        .map_err(|err| Error::invalid_param(name, format!("unreadable field: {err}")))
}

fn parse_response_format(raw: &str) -> Result<TranscriptionResponseFormat, Error> {
    match raw {
        "text" => Ok(TranscriptionResponseFormat::Text),
        "json" => Ok(TranscriptionResponseFormat::Json),
        "verbose_json" => Ok(TranscriptionResponseFormat::VerboseJson),
        "srt" => Ok(TranscriptionResponseFormat::Srt),
        "vtt" => Ok(TranscriptionResponseFormat::Vtt),
        other => Err(Error::invalid_param(
            "response_format",
            format!("unknown format '{other}'. Possible values: text, json, verbose_json, srt, vtt"),
        )),
    }
}

fn parse_granularity(raw: &str) -> Result<TimestampGranularity, Error> {
    match raw {
        "segment" => Ok(TimestampGranularity::Segment),
        "word" => Ok(TimestampGranularity::Word),
        other => Err(Error::invalid_param(
            "timestamp_granularities[]",
            format!("unknown granularity '{other}'. Possible values: segment, word"),
        )),
    }
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw, "true" | "True" | "1")
}

pub async fn create_transcription(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Response> {
    let form = TranscriptionForm::parse(multipart).await?;
    validate_timestamp_granularities(&form.granularities)?;

    let non_default_granularities =
        !form.granularities.is_empty() && form.granularities != [TimestampGranularity::Segment];
    if non_default_granularities
        && form.response_format != TranscriptionResponseFormat::VerboseJson
    {
        warn!(
            "timestamp_granularities[] only affects the response when response_format is verbose_json"
        );
    }

    let options = TranscribeOptions {
        task: AsrTask::Transcribe,
        language: form.language.clone(),
        initial_prompt: form.prompt.clone(),
        temperature: form.temperature,
        word_timestamps: form.granularities.contains(&TimestampGranularity::Word),
        vad_filter: form.vad_filter,
        hotwords: form.hotwords.clone(),
    };
    run(state, form, options).await
}

pub async fn create_translation(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Response> {
    let form = TranscriptionForm::parse(multipart).await?;

    let options = TranscribeOptions {
        task: AsrTask::Translate,
        language: None,
        initial_prompt: form.prompt.clone(),
        temperature: form.temperature,
        word_timestamps: false,
        vad_filter: form.vad_filter,
        hotwords: form.hotwords.clone(),
    };
    run(state, form, options).await
}

async fn run(state: AppState, form: TranscriptionForm, options: TranscribeOptions) -> ApiResult<Response> {
    let task = options.task;
    let model = state.aliases.resolve(&form.model);
    let running = services::transcribe_upload(&state, &model, &form.file, options).await?;

    if form.stream {
        Ok(streaming_response(running, form.response_format, task))
    } else {
        full_response(running, form.response_format, task).await
    }
}

/// Render one segment in the requested format, for SSE framing.
fn render_segment(
    segment: &TranscriptionSegment,
    index: usize,
    info: &TranscriptionInfo,
    format: TranscriptionResponseFormat,
    task: AsrTask,
) -> String {
    match format {
        TranscriptionResponseFormat::Text => segment.text.clone(),
        TranscriptionResponseFormat::Json => {
            serde_json::to_string(&TranscriptionJson::from_segments(std::slice::from_ref(segment)))
                .unwrap_or_default()
        }
        TranscriptionResponseFormat::VerboseJson => serde_json::to_string(
            &TranscriptionVerboseJson::from_segment(segment.clone(), info, task.as_str()),
        )
        .unwrap_or_default(),
        TranscriptionResponseFormat::Srt => segments_to_srt(segment, index),
        TranscriptionResponseFormat::Vtt => segments_to_vtt(segment, index),
    }
}

fn streaming_response(
    running: RunningTranscription,
    format: TranscriptionResponseFormat,
    task: AsrTask,
) -> Response {
    let RunningTranscription {
        info,
        mut segments,
        lease,
    } = running;
    let stream = async_stream::stream! {
        // The lease rides in the stream; dropping the response body
        // releases it.
        let _lease = lease;
        let mut index = 0usize;
        while let Some(segment) = segments.recv().await {
            match segment {
                Ok(segment) => {
                    let payload = render_segment(&segment, index, &info, format, task);
                    index += 1;
                    yield Ok::<Event, Infallible>(Event::default().data(payload));
                }
                Err(err) => {
                    error!(%err, "transcription failed mid-stream");
                    break;
                }
            }
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

async fn full_response(
    mut running: RunningTranscription,
    format: TranscriptionResponseFormat,
    task: AsrTask,
) -> ApiResult<Response> {
    let mut segments = Vec::new();
    while let Some(segment) = running.segments.recv().await {
        segments.push(segment?);
    }
    drop(running.lease);
    let info = running.info;

    let response = match format {
        TranscriptionResponseFormat::Text => (
            [(CONTENT_TYPE, format.media_type())],
            speaches_core::segments_to_text(&segments),
        )
            .into_response(),
        TranscriptionResponseFormat::Json => {
            Json(TranscriptionJson::from_segments(&segments)).into_response()
        }
        TranscriptionResponseFormat::VerboseJson => Json(TranscriptionVerboseJson::from_segments(
            segments,
            &info,
            task.as_str(),
        ))
        .into_response(),
        TranscriptionResponseFormat::Srt => {
            let body: String = segments
                .iter()
                .enumerate()
                .map(|(index, segment)| segments_to_srt(segment, index))
                .collect();
            ([(CONTENT_TYPE, format.media_type())], body).into_response()
        }
        TranscriptionResponseFormat::Vtt => {
            let body: String = segments
                .iter()
                .enumerate()
                .map(|(index, segment)| segments_to_vtt(segment, index))
                .collect();
            ([(CONTENT_TYPE, format.media_type())], body).into_response()
        }
    };
    Ok(response)
}
