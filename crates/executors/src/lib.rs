//! Inference executors
//!
//! One executor per model family, each wrapping its inference library
//! behind a `load` + family-specific operation pair:
//! - [`whisper`]: speech recognition over whisper.cpp
//! - [`kokoro`]: voice-pack synthesis over ONNX Runtime
//! - [`piper`]: single-voice synthesis over ONNX Runtime
//!
//! Executors are pure with respect to the model lifecycle: loading
//! produces a session, operations borrow one. Leasing and unloading are
//! the model manager's business.

pub mod device;
pub mod kokoro;
pub mod piper;
pub mod whisper;

pub use device::PlacementPreferences;

use bytes::Bytes;
use futures::Stream;
use speaches_core::Result;

/// Lazy sequence of PCM16 chunks produced by a TTS executor.
pub type PcmChunkStream = std::pin::Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Split text into sentence-sized slices for chunked synthesis. The
/// split is inclusive of the terminator; fragments without a terminator
/// come out as one trailing slice.
pub(crate) fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            let sentence = current.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            current.clear();
        }
    }
    let tail = current.trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_sentences_basic() {
        assert_eq!(
            split_sentences("Hello there. How are you? Fine!"),
            vec!["Hello there.", "How are you?", "Fine!"]
        );
    }

    #[test]
    fn test_split_sentences_keeps_tail() {
        assert_eq!(
            split_sentences("One. two without end"),
            vec!["One.", "two without end"]
        );
    }

    #[test]
    fn test_split_sentences_empty() {
        assert!(split_sentences("   ").is_empty());
    }
}
