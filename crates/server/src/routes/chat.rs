//! `POST /v1/chat/completions`
//!
//! The gateway rewrites audio in and out of the conversation and proxies
//! the text completion upstream: input audio parts are transcribed
//! locally, assistant audio references are re-hydrated from the
//! transcript cache, and when the audio modality is requested the
//! response is spoken through the local speech model.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::Engine;
use futures::StreamExt;
use serde_json::json;
use tracing::{info, warn};

use speaches_core::{
    generate_audio_id, AssistantAudio, AudioFormat, ChatCompletionRequest, ContentPart, Error,
    MessageContent, ModelId,
};
use speaches_pipeline::{clean_for_synthesis, collect_pcm, error_chunk, AudioChatFanout};

use crate::error::ApiResult;
use crate::services::{self, CHAT_AUDIO_SAMPLE_RATE};
use crate::state::AppState;

/// `audio.format` names differ from the speech endpoint's: streaming
/// audio is always `pcm16`, non-streaming accepts the container formats.
fn parse_chat_audio_format(format: &str) -> Result<AudioFormat, Error> {
    match format {
        "pcm16" => Ok(AudioFormat::Pcm),
        "wav" => Ok(AudioFormat::Wav),
        "mp3" => Ok(AudioFormat::Mp3),
        "flac" => Ok(AudioFormat::Flac),
        other => Err(Error::invalid_param(
            "audio.format",
            format!("'{other}' is not supported. Supported values: pcm16, wav, mp3, flac"),
        )),
    }
}

pub async fn create_chat_completion(
    State(state): State<AppState>,
    Json(mut body): Json<ChatCompletionRequest>,
) -> ApiResult<Response> {
    if body.n.map_or(false, |n| n > 1) {
        return Err(Error::invalid_param("n", "multiple choices are not supported").into());
    }

    let wants_audio = body.wants_audio();
    if wants_audio {
        let audio = body.audio.as_ref().ok_or_else(|| {
            Error::invalid_param("audio", "required when modalities includes 'audio'")
        })?;
        if body.stream && audio.format != "pcm16" {
            return Err(Error::invalid_param(
                "audio.format",
                format!(
                    "'{}' is not supported when stream=true. Supported values: 'pcm16'",
                    audio.format
                ),
            )
            .into());
        }
        parse_chat_audio_format(&audio.format)?;
    }

    rewrite_audio_messages(&state, &mut body).await?;

    let speech_model = state
        .aliases
        .resolve(body.speech_model.as_deref().unwrap_or(&state.settings.speech_model));
    let voice = body
        .audio
        .as_ref()
        .map(|audio| audio.voice.clone())
        .unwrap_or_default();

    // The upstream sees a text-only request; the gateway's extensions are
    // skipped by serialization and the audio parameter is stripped.
    let mut payload = serde_json::to_value(&body)
        .map_err(|err| Error::Internal(format!("unserializable request: {err}")))?;
    if let Some(object) = payload.as_object_mut() {
        object.insert("modalities".to_string(), json!(["text"]));
        object.remove("audio");
    }

    if body.stream {
        let upstream = state.upstream.chat_completion_stream(&payload).await?;
        let speech = wants_audio.then(|| {
            services::chat_speech_fn(state.clone(), speech_model.clone(), voice.clone())
        });
        let fanout = AudioChatFanout::new(generate_audio_id(), state.transcripts.expires_at(), speech);
        let merged = fanout.run(upstream);

        let events = merged.map(|chunk| {
            let payload = match chunk {
                Ok(chunk) => serde_json::to_string(&chunk).unwrap_or_default(),
                Err(err) => error_chunk(&err).to_string(),
            };
            Ok::<Event, Infallible>(Event::default().data(payload))
        });
        return Ok(Sse::new(events)
            .keep_alive(KeepAlive::default())
            .into_response());
    }

    let mut completion = state.upstream.chat_completion(&payload).await?;
    if wants_audio {
        let format = body
            .audio
            .as_ref()
            .map(|audio| parse_chat_audio_format(&audio.format))
            .transpose()?
            .unwrap_or(AudioFormat::Pcm);

        for choice in &mut completion.choices {
            let Some(content) = choice.message.content.clone() else {
                continue;
            };
            let (stream, rate) = services::synthesize_stream(
                &state,
                &speech_model,
                clean_for_synthesis(&content),
                &voice,
                1.0,
                Some(CHAT_AUDIO_SAMPLE_RATE),
            )
            .await?;
            let pcm = collect_pcm(stream).await?;
            let encoded = match format {
                AudioFormat::Pcm => pcm,
                _ => speaches_audio::encode_pcm16(&pcm, rate, format)?,
            };

            let audio_id = generate_audio_id();
            state
                .transcripts
                .insert(audio_id.clone(), content.clone())
                .await;
            choice.message.audio = Some(AssistantAudio {
                id: audio_id,
                data: base64::engine::general_purpose::STANDARD.encode(&encoded),
                transcript: content,
                expires_at: state.transcripts.expires_at(),
            });
            choice.message.content = None;
        }
    }
    Ok(Json(completion).into_response())
}

/// Rewrite audio in the conversation history into text the upstream can
/// consume: user input audio is transcribed through the local ASR path,
/// assistant audio references resolve against the transcript cache (or
/// drop out when expired).
async fn rewrite_audio_messages(
    state: &AppState,
    body: &mut ChatCompletionRequest,
) -> Result<(), Error> {
    let transcription_model: ModelId = state.aliases.resolve(
        body.transcription_model
            .as_deref()
            .unwrap_or(&state.settings.transcription_model),
    );

    for (index, message) in body.messages.iter_mut().enumerate() {
        match message.role.as_str() {
            "user" => {
                let Some(MessageContent::Parts(parts)) = &mut message.content else {
                    continue;
                };
                for part in parts.iter_mut() {
                    let ContentPart::InputAudio { input_audio } = part else {
                        continue;
                    };
                    let bytes = base64::engine::general_purpose::STANDARD
                        .decode(&input_audio.data)
                        .map_err(|err| {
                            Error::BadAudio(format!("input_audio is not valid base64: {err}"))
                        })?;
                    let text =
                        services::transcribe_to_text(state, &transcription_model, &bytes).await?;
                    info!(message = index, transcript = %text, "transcribed input audio");
                    *part = ContentPart::Text { text };
                }
            }
            "assistant" => {
                let Some(audio_ref) = message.audio.take() else {
                    continue;
                };
                match state.transcripts.get(&audio_ref.id).await {
                    Some(transcript) => {
                        message.content = Some(MessageContent::Text(transcript));
                    }
                    None => warn!(
                        audio_id = %audio_ref.id,
                        "no cached transcript for assistant audio, dropping the reference"
                    ),
                }
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_audio_format_names() {
        assert_eq!(parse_chat_audio_format("pcm16").unwrap(), AudioFormat::Pcm);
        assert_eq!(parse_chat_audio_format("wav").unwrap(), AudioFormat::Wav);
        assert!(parse_chat_audio_format("opus").is_err());
        assert!(parse_chat_audio_format("pcm").is_err());
    }
}
