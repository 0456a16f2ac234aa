//! Streaming text pipeline
//!
//! This crate provides the text side of the audio pipeline:
//! - Incremental text chunkers feeding sentence-sized slices to TTS
//! - Text cleanup before synthesis (markdown emphasis, emoji)
//! - SRT/VTT rendering of transcription segments
//! - The fan-out that merges upstream chat chunks and synthesized audio
//!   into one SSE stream

pub mod chat_stream;
pub mod chunker;
pub mod text;

pub use chat_stream::{collect_pcm, error_chunk, AudioChatFanout, SpeechFn};
pub use chunker::{ChunkerClosed, EofChunker, SentenceChunker, TextChunker, MIN_SENTENCE_LENGTH};
pub use text::{
    clean_for_synthesis, segments_to_srt, segments_to_vtt, srt_format_timestamp, strip_emojis,
    strip_markdown_emphasis, vtt_format_timestamp,
};
