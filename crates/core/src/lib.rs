//! Core types for the speaches gateway
//!
//! This crate provides the foundational types shared by all other crates:
//! - Model identity and family classification
//! - The error taxonomy surfaced over HTTP
//! - Transcription data model (segments, words, metadata)
//! - OpenAI-shaped request/response types for the audio and chat endpoints

pub mod api;
pub mod chat;
pub mod error;
pub mod model;
pub mod transcript;

pub use api::{
    validate_timestamp_granularities, AudioFormat, CreateSpeechRequest, ListModelsResponse, Model,
    ModelTask, TimestampGranularity, TranscriptionJson, TranscriptionResponseFormat,
    TranscriptionVerboseJson, DEFAULT_SPEECH_FORMAT, MAX_SAMPLE_RATE, MIN_SAMPLE_RATE,
};
pub use chat::{
    generate_audio_id, generate_chat_completion_id, AssistantAudio, AssistantAudioRef, AudioParams,
    ChatCompletion, ChatCompletionChunk, ChatCompletionRequest, ChatMessage, Choice, ChoiceDelta,
    ChunkChoice, ContentPart, DeltaAudio, InputAudio, MessageContent, Modality, ResponseMessage,
};
pub use error::{Error, Result};
pub use model::{
    AsrArtifact, ModelFamily, ModelId, SingleVoiceArtifact, VoicePackArtifact,
    OPENAI_VOICE_ALIASES,
};
pub use transcript::{segments_to_text, TranscriptionInfo, TranscriptionSegment, TranscriptionWord};
