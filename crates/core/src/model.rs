//! Model identity and family classification

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a model in `owner/name` form.
///
/// The id is opaque to most of the gateway; alias resolution happens at
/// request ingress, before the id is used for anything else.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(String);

impl ModelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The part before the first `/`, or the whole id when there is none.
    pub fn owner(&self) -> &str {
        self.0.split('/').next().unwrap_or(&self.0)
    }

    /// The part after the first `/`.
    pub fn name(&self) -> &str {
        self.0.split_once('/').map(|(_, name)| name).unwrap_or(&self.0)
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModelId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ModelId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// What kind of inference a model performs, derived from its local
/// side-car metadata. Routing and parameter validation branch on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    /// Speech recognition (transcribe / translate).
    Asr,
    /// A TTS model whose single artifact supplies many named voices.
    TtsVoicePack,
    /// A TTS model whose identity encodes exactly one voice.
    TtsSingleVoice,
    /// Metadata present but matched no executor.
    Unknown,
}

impl ModelFamily {
    pub fn is_tts(self) -> bool {
        matches!(self, ModelFamily::TtsVoicePack | ModelFamily::TtsSingleVoice)
    }
}

/// Voice names from the OpenAI speech API. A request naming one of these
/// against a voice-pack model is remapped to the model's default voice
/// instead of being rejected, so stock OpenAI clients keep working.
pub const OPENAI_VOICE_ALIASES: &[&str] = &[
    "alloy", "ash", "ballad", "coral", "echo", "fable", "onyx", "nova", "sage", "shimmer", "verse",
];

/// Resolved on-disk files of an ASR model.
#[derive(Debug, Clone)]
pub struct AsrArtifact {
    /// GGML/GGUF weights consumed by whisper.cpp.
    pub weights: std::path::PathBuf,
}

/// Resolved on-disk files of a voice-pack TTS model.
#[derive(Debug, Clone)]
pub struct VoicePackArtifact {
    pub weights: std::path::PathBuf,
    pub tokenizer: std::path::PathBuf,
    /// Directory of per-voice style tensors (`<voice>.bin`).
    pub voices_dir: std::path::PathBuf,
}

/// Resolved on-disk files of a single-voice TTS model.
#[derive(Debug, Clone)]
pub struct SingleVoiceArtifact {
    pub weights: std::path::PathBuf,
    /// JSON side-car carrying sample rate, phoneme table and scales.
    pub config: std::path::PathBuf,
}
