//! Transcription data model
//!
//! Segments and words follow the OpenAI `verbose_json` transcription
//! object; the ASR executor produces them lazily.

use serde::{Deserialize, Serialize};

/// A single word with timing, produced when word timestamps are requested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionWord {
    /// Start time in seconds.
    pub start: f64,
    /// End time in seconds.
    pub end: f64,
    pub word: String,
    pub probability: f32,
}

/// One segment (roughly a breath group) of transcribed speech.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionSegment {
    pub id: i32,
    pub seek: i32,
    /// Start time in seconds.
    pub start: f64,
    /// End time in seconds.
    pub end: f64,
    pub text: String,
    pub tokens: Vec<i32>,
    pub temperature: f32,
    /// If lower than -1, consider the decode unreliable.
    pub avg_logprob: f32,
    /// If greater than 2.4, consider the segment degenerate.
    pub compression_ratio: f32,
    pub no_speech_prob: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub words: Option<Vec<TranscriptionWord>>,
}

/// Metadata about a finished (or in-flight) transcription run.
#[derive(Debug, Clone)]
pub struct TranscriptionInfo {
    /// ISO-639-1 language, detected or requested.
    pub language: String,
    /// Input audio duration in seconds.
    pub duration: f64,
    /// Whether word timestamps were requested.
    pub word_timestamps: bool,
}

/// Concatenate segment texts, trimming the ends.
pub fn segments_to_text(segments: &[TranscriptionSegment]) -> String {
    segments
        .iter()
        .map(|segment| segment.text.as_str())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Collect all words across segments, in order.
pub fn segments_to_words(segments: &[TranscriptionSegment]) -> Vec<TranscriptionWord> {
    segments
        .iter()
        .filter_map(|segment| segment.words.as_deref())
        .flatten()
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(text: &str) -> TranscriptionSegment {
        TranscriptionSegment {
            id: 0,
            seek: 0,
            start: 0.0,
            end: 1.0,
            text: text.to_string(),
            tokens: vec![],
            temperature: 0.0,
            avg_logprob: -0.2,
            compression_ratio: 1.1,
            no_speech_prob: 0.01,
            words: None,
        }
    }

    #[test]
    fn test_segments_to_text_trims_ends() {
        let segments = vec![segment(" Hello"), segment(" world. ")];
        assert_eq!(segments_to_text(&segments), "Hello world.");
    }

    #[test]
    fn test_segments_to_text_empty() {
        assert_eq!(segments_to_text(&[]), "");
    }

    #[test]
    fn test_words_omitted_from_json_when_absent() {
        let json = serde_json::to_value(segment("hi")).unwrap();
        assert!(json.get("words").is_none());
        assert_eq!(json["text"], "hi");
    }
}
