//! Internal speech and transcription services
//!
//! The endpoint handlers and the chat pipeline drive the same code
//! paths: resolve family, validate family parameters, lease a session,
//! produce a lazy output stream. The lease rides inside the returned
//! stream so it is released exactly when the consumer finishes or
//! disconnects.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::StreamExt;
use tokio::sync::mpsc;

use speaches_audio::decode_audio;
use speaches_core::{
    segments_to_text, Error, ModelFamily, ModelId, Result, TranscriptionInfo, TranscriptionSegment,
};
use speaches_executors::whisper::{AsrSession, TranscribeOptions};
use speaches_executors::{kokoro, piper, whisper, PcmChunkStream};
use speaches_models::ModelLease;
use speaches_pipeline::{collect_pcm, SpeechFn};

use crate::state::AppState;

/// Sample rate of chat audio deltas, matching the OpenAI wire format.
pub const CHAT_AUDIO_SAMPLE_RATE: u32 = 24_000;

/// Resolve the model's family and produce a lazy PCM16 stream plus the
/// rate it is delivered at. `text` is expected pre-cleaned.
pub async fn synthesize_stream(
    state: &AppState,
    model: &ModelId,
    text: String,
    voice: &str,
    speed: f32,
    sample_rate: Option<u32>,
) -> Result<(PcmChunkStream, u32)> {
    match state.catalog.classify(model)? {
        ModelFamily::TtsVoicePack => {
            kokoro::validate_speed(speed)?;
            let lease = state.voice_packs.lease(model).await?;
            let voice = lease.resolve_voice(voice)?;
            let output_rate = sample_rate.unwrap_or(kokoro::NATIVE_SAMPLE_RATE);
            let stream = kokoro::synthesize(lease.session(), text, voice, speed, sample_rate);
            Ok((hold_lease(stream, lease), output_rate))
        }
        ModelFamily::TtsSingleVoice => {
            piper::validate_speed(speed)?;
            let lease = state.single_voices.lease(model).await?;
            let output_rate = sample_rate.unwrap_or(lease.sample_rate());
            let stream = piper::synthesize(lease.session(), text, speed, sample_rate);
            Ok((hold_lease(stream, lease), output_rate))
        }
        ModelFamily::Asr | ModelFamily::Unknown => {
            Err(Error::ModelNotSupported(model.clone()))
        }
    }
}

/// A transcription in flight: metadata, the lazy segment stream, and the
/// lease that must outlive both.
pub struct RunningTranscription {
    pub info: TranscriptionInfo,
    pub segments: mpsc::Receiver<Result<TranscriptionSegment>>,
    pub lease: ModelLease<AsrSession>,
}

/// Decode an uploaded audio file and start transcribing it.
pub async fn transcribe_upload(
    state: &AppState,
    model: &ModelId,
    file: &[u8],
    options: TranscribeOptions,
) -> Result<RunningTranscription> {
    if state.catalog.classify(model)? != ModelFamily::Asr {
        return Err(Error::ModelNotSupported(model.clone()));
    }
    let audio = decode_audio(file, whisper::SAMPLE_RATE)?;

    let lease = state.asr.lease(model).await?;
    let transcription = whisper::transcribe(lease.session(), audio.samples, options).await?;
    Ok(RunningTranscription {
        info: transcription.info,
        segments: transcription.segments,
        lease,
    })
}

/// Transcribe to plain text; used to substitute chat input audio.
pub async fn transcribe_to_text(state: &AppState, model: &ModelId, file: &[u8]) -> Result<String> {
    let mut running = transcribe_upload(state, model, file, TranscribeOptions::default()).await?;
    let mut segments = Vec::new();
    while let Some(segment) = running.segments.recv().await {
        segments.push(segment?);
    }
    Ok(segments_to_text(&segments))
}

/// Build the per-sentence synthesis closure the chat fan-out drives.
/// Each call leases the speech model for the duration of one sentence.
pub fn chat_speech_fn(state: AppState, model: ModelId, voice: String) -> SpeechFn {
    Arc::new(move |sentence: String| -> BoxFuture<'static, Result<bytes::Bytes>> {
        let state = state.clone();
        let model = model.clone();
        let voice = voice.clone();
        Box::pin(async move {
            let (stream, _) = synthesize_stream(
                &state,
                &model,
                sentence,
                &voice,
                1.0,
                Some(CHAT_AUDIO_SAMPLE_RATE),
            )
            .await?;
            collect_pcm(stream).await
        })
    })
}

/// Keep the lease alive for as long as the stream is being consumed.
fn hold_lease<T: Send + Sync + 'static>(
    stream: PcmChunkStream,
    lease: ModelLease<T>,
) -> PcmChunkStream {
    Box::pin(async_stream::stream! {
        let _lease = lease;
        let mut stream = stream;
        while let Some(item) = stream.next().await {
            yield item;
        }
    })
}
