//! Speech recognition over whisper.cpp
//!
//! One [`AsrSession`] wraps a loaded `WhisperContext`; each transcription
//! gets its own decode state, so concurrent requests share a session
//! safely. The decode runs on a blocking worker and feeds segments
//! through a channel the handler pulls from.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use speaches_core::{
    AsrArtifact, Error, ModelId, Result, TranscriptionInfo, TranscriptionSegment,
    TranscriptionWord,
};

use crate::device::PlacementPreferences;

/// Sample rate whisper.cpp consumes; uploads are decoded to this.
pub const SAMPLE_RATE: u32 = 16_000;

/// Timestamp unit of whisper.cpp: centiseconds.
const CS_PER_SECOND: f64 = 100.0;

/// The transcribe/translate switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsrTask {
    Transcribe,
    Translate,
}

impl AsrTask {
    pub fn as_str(self) -> &'static str {
        match self {
            AsrTask::Transcribe => "transcribe",
            AsrTask::Translate => "translate",
        }
    }
}

/// Options of one transcription run.
#[derive(Debug, Clone)]
pub struct TranscribeOptions {
    pub task: AsrTask,
    /// ISO-639-1 hint; `None` auto-detects.
    pub language: Option<String>,
    pub initial_prompt: Option<String>,
    pub temperature: f32,
    pub word_timestamps: bool,
    pub vad_filter: bool,
    /// Bias terms folded into the decoder prompt.
    pub hotwords: Option<String>,
}

impl Default for TranscribeOptions {
    fn default() -> Self {
        Self {
            task: AsrTask::Transcribe,
            language: None,
            initial_prompt: None,
            temperature: 0.0,
            word_timestamps: false,
            vad_filter: false,
            hotwords: None,
        }
    }
}

/// A loaded whisper.cpp model.
pub struct AsrSession {
    model_id: ModelId,
    context: WhisperContext,
}

impl AsrSession {
    pub fn model_id(&self) -> &ModelId {
        &self.model_id
    }
}

/// Construct a session from a GGML artifact. Runs for seconds; callers
/// keep it off the async scheduler (the model manager loads on a worker
/// thread).
pub fn load(
    model_id: &ModelId,
    artifact: &AsrArtifact,
    placement: &PlacementPreferences,
) -> Result<AsrSession> {
    let mut params = WhisperContextParameters::default();
    params.use_gpu(placement.wants_gpu());

    let path = artifact.weights.to_string_lossy();
    let context = WhisperContext::new_with_params(&path, params)
        .map_err(|err| Error::load_failed(model_id, err.to_string()))?;

    Ok(AsrSession {
        model_id: model_id.clone(),
        context,
    })
}

/// A running transcription: metadata plus a lazy segment stream.
pub struct Transcription {
    pub info: TranscriptionInfo,
    pub segments: mpsc::Receiver<Result<TranscriptionSegment>>,
}

/// Transcribe mono f32 PCM at [`SAMPLE_RATE`].
///
/// The session must stay leased until the segment stream is drained or
/// abandoned; the stream holds its own `Arc` to the session memory but
/// not to the lease.
pub async fn transcribe(
    session: Arc<AsrSession>,
    audio: Vec<f32>,
    options: TranscribeOptions,
) -> Result<Transcription> {
    let duration = audio.len() as f64 / SAMPLE_RATE as f64;
    let (segment_tx, segment_rx) = mpsc::channel::<Result<TranscriptionSegment>>(32);
    let (info_tx, info_rx) = tokio::sync::oneshot::channel::<Result<TranscriptionInfo>>();

    tokio::task::spawn_blocking(move || {
        let outcome = run_transcription(&session, &audio, &options, duration);
        match outcome {
            Ok((info, segments)) => {
                let _ = info_tx.send(Ok(info));
                for segment in segments {
                    // The receiver went away (client disconnect); stop.
                    if segment_tx.blocking_send(Ok(segment)).is_err() {
                        break;
                    }
                }
            }
            Err(err) => {
                let _ = info_tx.send(Err(err));
            }
        }
    });

    let info = info_rx
        .await
        .map_err(|_| Error::Inference("transcription worker vanished".to_string()))??;
    Ok(Transcription {
        info,
        segments: segment_rx,
    })
}

fn run_transcription(
    session: &AsrSession,
    audio: &[f32],
    options: &TranscribeOptions,
    duration: f64,
) -> Result<(TranscriptionInfo, Vec<TranscriptionSegment>)> {
    let inference_error = |err: whisper_rs::WhisperError| Error::Inference(err.to_string());

    let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
    params.set_print_special(false);
    params.set_print_progress(false);
    params.set_print_realtime(false);
    params.set_print_timestamps(false);
    params.set_translate(options.task == AsrTask::Translate);
    params.set_temperature(options.temperature);
    params.set_token_timestamps(options.word_timestamps);

    match options.language.as_deref() {
        Some(language) => params.set_language(Some(language)),
        None => params.set_language(Some("auto")),
    }

    // whisper.cpp has no separate hotword channel; fold them into the
    // prompt next to the caller's own.
    let prompt = match (&options.initial_prompt, &options.hotwords) {
        (Some(prompt), Some(hotwords)) => Some(format!("{prompt} {hotwords}")),
        (Some(prompt), None) => Some(prompt.clone()),
        (None, Some(hotwords)) => Some(hotwords.clone()),
        (None, None) => None,
    };
    if let Some(prompt) = &prompt {
        params.set_initial_prompt(prompt);
    }
    if options.vad_filter {
        debug!("vad_filter requested; this backend decodes the full input");
    }

    let started = Instant::now();
    let mut state = session.context.create_state().map_err(inference_error)?;
    state.full(params, audio).map_err(inference_error)?;

    let language = match options.language.clone() {
        Some(language) => language,
        None => state
            .full_lang_id_from_state()
            .ok()
            .and_then(whisper_rs::get_lang_str)
            .unwrap_or("en")
            .to_string(),
    };

    let token_eot = session.context.token_eot();
    let segment_count = state.full_n_segments().map_err(inference_error)?;
    let mut segments = Vec::with_capacity(segment_count.max(0) as usize);

    for index in 0..segment_count {
        let text = state.full_get_segment_text(index).map_err(inference_error)?;
        let start_cs = state.full_get_segment_t0(index).map_err(inference_error)?;
        let end_cs = state.full_get_segment_t1(index).map_err(inference_error)?;

        let token_count = state.full_n_tokens(index).map_err(inference_error)?;
        let mut tokens = Vec::with_capacity(token_count.max(0) as usize);
        let mut logprob_sum = 0.0f32;
        let mut words: Vec<TranscriptionWord> = Vec::new();

        for token_index in 0..token_count {
            let token_id = state
                .full_get_token_id(index, token_index)
                .map_err(inference_error)?;
            if token_id >= token_eot {
                continue;
            }
            let data = state
                .full_get_token_data(index, token_index)
                .map_err(inference_error)?;
            let token_text = state
                .full_get_token_text(index, token_index)
                .map_err(inference_error)?;

            tokens.push(token_id);
            logprob_sum += data.plog;

            if options.word_timestamps {
                push_token_into_words(&mut words, &token_text, &data);
            }
        }

        let avg_logprob = if tokens.is_empty() {
            0.0
        } else {
            logprob_sum / tokens.len() as f32
        };

        segments.push(TranscriptionSegment {
            id: index,
            seek: 0,
            start: start_cs as f64 / CS_PER_SECOND,
            end: end_cs as f64 / CS_PER_SECOND,
            text,
            tokens,
            temperature: options.temperature,
            avg_logprob,
            compression_ratio: 1.0,
            no_speech_prob: 0.0,
            words: options.word_timestamps.then_some(words),
        });
    }

    info!(
        model = %session.model_id,
        task = options.task.as_str(),
        language,
        segments = segments.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "transcription finished"
    );

    Ok((
        TranscriptionInfo {
            language,
            duration,
            word_timestamps: options.word_timestamps,
        },
        segments,
    ))
}

/// Tokens starting with whitespace open a new word; the rest extend the
/// previous one.
fn push_token_into_words(
    words: &mut Vec<TranscriptionWord>,
    token_text: &str,
    data: &whisper_rs::WhisperTokenData,
) {
    let starts_word = token_text.starts_with(' ') || words.is_empty();
    if starts_word {
        words.push(TranscriptionWord {
            start: data.t0 as f64 / CS_PER_SECOND,
            end: data.t1 as f64 / CS_PER_SECOND,
            word: token_text.trim_start().to_string(),
            probability: data.p,
        });
    } else if let Some(word) = words.last_mut() {
        word.word.push_str(token_text);
        word.end = data.t1 as f64 / CS_PER_SECOND;
        word.probability = (word.probability + data.p) / 2.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_data(t0: i64, t1: i64, p: f32) -> whisper_rs::WhisperTokenData {
        whisper_rs::WhisperTokenData {
            id: 0,
            tid: 0,
            p,
            plog: p.ln(),
            pt: 0.0,
            ptsum: 0.0,
            t0,
            t1,
            vlen: 0.0,
        }
    }

    #[test]
    fn test_tokens_merge_into_words() {
        let mut words = Vec::new();
        push_token_into_words(&mut words, " hel", &token_data(0, 10, 0.9));
        push_token_into_words(&mut words, "lo", &token_data(10, 20, 0.8));
        push_token_into_words(&mut words, " world", &token_data(20, 40, 0.95));

        assert_eq!(words.len(), 2);
        assert_eq!(words[0].word, "hello");
        assert_eq!(words[0].start, 0.0);
        assert_eq!(words[0].end, 0.2);
        assert_eq!(words[1].word, "world");
        assert_eq!(words[1].end, 0.4);
    }

    #[test]
    fn test_task_labels() {
        assert_eq!(AsrTask::Transcribe.as_str(), "transcribe");
        assert_eq!(AsrTask::Translate.as_str(), "translate");
    }

    #[test]
    fn test_default_options() {
        let options = TranscribeOptions::default();
        assert_eq!(options.task, AsrTask::Transcribe);
        assert!(options.language.is_none());
        assert_eq!(options.temperature, 0.0);
        assert!(!options.word_timestamps);
    }
}
