//! OpenAI-shaped types for the audio endpoints

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::transcript::{
    segments_to_text, segments_to_words, TranscriptionInfo, TranscriptionSegment,
    TranscriptionWord,
};

pub const MIN_SAMPLE_RATE: u32 = 8_000;
pub const MAX_SAMPLE_RATE: u32 = 48_000;

/// Default speech response format, per the OpenAI API.
pub const DEFAULT_SPEECH_FORMAT: AudioFormat = AudioFormat::Mp3;

/// Output container/codec for `/v1/audio/speech`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Flac,
    Wav,
    Pcm,
}

impl AudioFormat {
    pub fn media_type(self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "audio/mp3",
            AudioFormat::Flac => "audio/flac",
            AudioFormat::Wav => "audio/wav",
            AudioFormat::Pcm => "audio/pcm",
        }
    }

    /// Formats with headers or global metadata (wav, flac) must be muxed
    /// from the complete PCM stream; the rest stream chunk by chunk.
    pub fn is_streamable(self) -> bool {
        matches!(self, AudioFormat::Mp3 | AudioFormat::Pcm)
    }
}

fn default_speed() -> f32 {
    1.0
}

fn default_speech_format() -> AudioFormat {
    DEFAULT_SPEECH_FORMAT
}

/// Body of `POST /v1/audio/speech`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSpeechRequest {
    pub model: String,
    /// The text to generate audio for.
    pub input: String,
    pub voice: String,
    #[serde(default = "default_speech_format")]
    pub response_format: AudioFormat,
    /// Supported range differs per model family.
    #[serde(default = "default_speed")]
    pub speed: f32,
    /// Desired output sample rate; the model's native rate when absent.
    #[serde(default)]
    pub sample_rate: Option<u32>,
}

impl CreateSpeechRequest {
    /// Range-check `sample_rate`. Family-specific checks (voice, speed)
    /// live with the executors.
    pub fn validate_sample_rate(&self) -> Result<()> {
        if let Some(rate) = self.sample_rate {
            if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&rate) {
                return Err(Error::invalid_param(
                    "sample_rate",
                    format!("must be between {MIN_SAMPLE_RATE} and {MAX_SAMPLE_RATE}, got {rate}"),
                ));
            }
        }
        Ok(())
    }
}

/// Output rendering for transcriptions and translations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptionResponseFormat {
    Text,
    #[default]
    Json,
    VerboseJson,
    Srt,
    Vtt,
}

impl TranscriptionResponseFormat {
    pub fn media_type(self) -> &'static str {
        match self {
            TranscriptionResponseFormat::Text | TranscriptionResponseFormat::Srt => "text/plain",
            TranscriptionResponseFormat::Json | TranscriptionResponseFormat::VerboseJson => {
                "application/json"
            }
            TranscriptionResponseFormat::Vtt => "text/vtt",
        }
    }
}

/// `timestamp_granularities[]` entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampGranularity {
    Segment,
    Word,
}

/// The OpenAI API accepts exactly these combinations; anything else
/// (duplicates, unknown entries) is rejected. An empty list is treated as
/// `["segment"]`.
pub const TIMESTAMP_GRANULARITY_COMBINATIONS: &[&[TimestampGranularity]] = &[
    &[],
    &[TimestampGranularity::Segment],
    &[TimestampGranularity::Word],
    &[TimestampGranularity::Word, TimestampGranularity::Segment],
    &[TimestampGranularity::Segment, TimestampGranularity::Word],
];

pub fn validate_timestamp_granularities(granularities: &[TimestampGranularity]) -> Result<()> {
    if TIMESTAMP_GRANULARITY_COMBINATIONS
        .iter()
        .any(|combination| *combination == granularities)
    {
        Ok(())
    } else {
        Err(Error::invalid_param(
            "timestamp_granularities[]",
            format!("{granularities:?} is not a valid combination"),
        ))
    }
}

/// `json` transcription response: just the text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionJson {
    pub text: String,
}

impl TranscriptionJson {
    pub fn from_segments(segments: &[TranscriptionSegment]) -> Self {
        Self {
            text: segments_to_text(segments),
        }
    }
}

/// `verbose_json` transcription response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionVerboseJson {
    pub task: String,
    pub language: String,
    pub duration: f64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub words: Option<Vec<TranscriptionWord>>,
    pub segments: Vec<TranscriptionSegment>,
}

impl TranscriptionVerboseJson {
    pub fn from_segments(
        segments: Vec<TranscriptionSegment>,
        info: &TranscriptionInfo,
        task: &str,
    ) -> Self {
        Self {
            task: task.to_string(),
            language: info.language.clone(),
            duration: info.duration,
            text: segments_to_text(&segments),
            words: info
                .word_timestamps
                .then(|| segments_to_words(&segments)),
            segments,
        }
    }

    /// A verbose body for a single streamed segment.
    pub fn from_segment(segment: TranscriptionSegment, info: &TranscriptionInfo, task: &str) -> Self {
        Self {
            task: task.to_string(),
            language: info.language.clone(),
            duration: segment.end - segment.start,
            text: segment.text.clone(),
            words: info.word_timestamps.then(|| segment.words.clone().unwrap_or_default()),
            segments: vec![segment],
        }
    }
}

/// Task a model performs, as listed by `/v1/models`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelTask {
    #[serde(rename = "automatic-speech-recognition")]
    AutomaticSpeechRecognition,
    #[serde(rename = "text-to-speech")]
    TextToSpeech,
}

/// One entry of `/v1/models`.
#[derive(Debug, Clone, Serialize)]
pub struct Model {
    pub id: String,
    /// Unix timestamp (seconds) the local artifacts were created.
    pub created: i64,
    pub object: &'static str,
    pub owned_by: String,
    /// ISO 639 languages, possibly empty. Not part of the OpenAI spec.
    pub language: Vec<String>,
    pub task: ModelTask,
}

impl Model {
    pub fn new(id: String, created: i64, language: Vec<String>, task: ModelTask) -> Self {
        let owned_by = id.split('/').next().unwrap_or(&id).to_string();
        Self {
            id,
            created,
            object: "model",
            owned_by,
            language,
            task,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListModelsResponse {
    pub data: Vec<Model>,
    pub object: &'static str,
}

impl ListModelsResponse {
    pub fn new(data: Vec<Model>) -> Self {
        Self {
            data,
            object: "list",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streamable_formats() {
        assert!(AudioFormat::Mp3.is_streamable());
        assert!(AudioFormat::Pcm.is_streamable());
        assert!(!AudioFormat::Wav.is_streamable());
        assert!(!AudioFormat::Flac.is_streamable());
    }

    #[test]
    fn test_sample_rate_bounds() {
        let mut request = CreateSpeechRequest {
            model: "m".into(),
            input: "hi".into(),
            voice: "af_heart".into(),
            response_format: AudioFormat::Pcm,
            speed: 1.0,
            sample_rate: Some(8_000),
        };
        assert!(request.validate_sample_rate().is_ok());
        request.sample_rate = Some(48_000);
        assert!(request.validate_sample_rate().is_ok());
        request.sample_rate = Some(7_999);
        assert!(request.validate_sample_rate().is_err());
        request.sample_rate = Some(48_001);
        assert!(request.validate_sample_rate().is_err());
        request.sample_rate = None;
        assert!(request.validate_sample_rate().is_ok());
    }

    #[test]
    fn test_granularity_combinations() {
        use TimestampGranularity::{Segment, Word};
        assert!(validate_timestamp_granularities(&[]).is_ok());
        assert!(validate_timestamp_granularities(&[Segment]).is_ok());
        assert!(validate_timestamp_granularities(&[Word]).is_ok());
        assert!(validate_timestamp_granularities(&[Word, Segment]).is_ok());
        assert!(validate_timestamp_granularities(&[Segment, Word]).is_ok());
        assert!(validate_timestamp_granularities(&[Segment, Segment]).is_err());
        assert!(validate_timestamp_granularities(&[Word, Word]).is_err());
    }

    #[test]
    fn test_speech_request_defaults() {
        let request: CreateSpeechRequest = serde_json::from_str(
            r#"{"model":"acme/tts","input":"Hello.","voice":"af_heart"}"#,
        )
        .unwrap();
        assert_eq!(request.response_format, AudioFormat::Mp3);
        assert_eq!(request.speed, 1.0);
        assert_eq!(request.sample_rate, None);
    }

    #[test]
    fn test_response_format_parses_snake_case() {
        let format: TranscriptionResponseFormat = serde_json::from_str("\"verbose_json\"").unwrap();
        assert_eq!(format, TranscriptionResponseFormat::VerboseJson);
    }
}
