//! Incremental text chunkers
//!
//! A producer feeds tokens in as they arrive from the upstream
//! completion; a single consumer pulls completed chunks out, suspending
//! while none are ready. [`SentenceChunker`] yields sentence-sized
//! slices for low-latency synthesis, [`EofChunker`] yields everything at
//! once on close.

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;

/// Feeding a chunker after `close` is a programming error on the
/// producer side and is surfaced instead of silently dropped.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("cannot add tokens to a closed chunker")]
pub struct ChunkerClosed;

/// Single-producer, single-consumer incremental text chunker.
#[async_trait]
pub trait TextChunker: Send + Sync {
    /// Append a token of upstream text.
    fn add_token(&self, token: &str) -> Result<(), ChunkerClosed>;

    /// Stop accepting tokens; the consumer drains what is left.
    fn close(&self);

    /// The next chunk, or `None` once the chunker is closed and drained.
    /// Suspends while no chunk is ready.
    async fn next_chunk(&self) -> Option<String>;
}

struct SentenceState {
    content: String,
    /// Byte offset scanning resumes from. Always on a char boundary:
    /// terminators and the whitespace consumed after them are ASCII.
    cursor: usize,
    accumulated: String,
    closed: bool,
}

/// Yields text sentence by sentence. A sentence ends at the first
/// `.`/`!`/`?` at or after the cursor, plus any whitespace already
/// buffered behind it. Sentences shorter (trimmed) than the minimum
/// length are folded into the next one to avoid pathological
/// per-fragment synthesis calls; the remainder is flushed on close.
pub struct SentenceChunker {
    state: Mutex<SentenceState>,
    notify: Notify,
    min_sentence_length: usize,
}

/// Default minimum trimmed sentence length.
pub const MIN_SENTENCE_LENGTH: usize = 20;

impl SentenceChunker {
    pub fn new() -> Self {
        Self::with_min_length(MIN_SENTENCE_LENGTH)
    }

    pub fn with_min_length(min_sentence_length: usize) -> Self {
        Self {
            state: Mutex::new(SentenceState {
                content: String::new(),
                cursor: 0,
                accumulated: String::new(),
                closed: false,
            }),
            notify: Notify::new(),
            min_sentence_length,
        }
    }

    /// Scan for the next complete sentence; advances the cursor past the
    /// terminator and any buffered trailing whitespace.
    fn scan_sentence(state: &mut SentenceState) -> Option<String> {
        let rest = &state.content[state.cursor..];
        let terminator = rest.find(['.', '!', '?'])?;
        let mut end = state.cursor + terminator + 1;
        let bytes = state.content.as_bytes();
        while end < bytes.len() && bytes[end].is_ascii_whitespace() {
            end += 1;
        }
        let sentence = state.content[state.cursor..end].to_string();
        state.cursor = end;
        Some(sentence)
    }
}

impl Default for SentenceChunker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextChunker for SentenceChunker {
    fn add_token(&self, token: &str) -> Result<(), ChunkerClosed> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(ChunkerClosed);
            }
            state.content.push_str(token);
        }
        self.notify.notify_one();
        Ok(())
    }

    fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_one();
    }

    async fn next_chunk(&self) -> Option<String> {
        loop {
            {
                let mut state = self.state.lock();
                while let Some(sentence) = Self::scan_sentence(&mut state) {
                    let combined = format!("{}{}", state.accumulated, sentence);
                    if combined.trim().len() >= self.min_sentence_length {
                        state.accumulated.clear();
                        return Some(combined);
                    }
                    // Too short on its own; carry it into the next one.
                    state.accumulated = combined;
                }

                if state.closed {
                    let remainder =
                        format!("{}{}", state.accumulated, &state.content[state.cursor..]);
                    state.cursor = state.content.len();
                    state.accumulated.clear();
                    if remainder.trim().is_empty() {
                        return None;
                    }
                    return Some(remainder);
                }
            }
            self.notify.notified().await;
        }
    }
}

struct EofState {
    content: String,
    closed: bool,
    drained: bool,
}

/// Yields the concatenation of every token exactly once, after close.
/// Used for non-streaming synthesis of a complete assistant message.
pub struct EofChunker {
    state: Mutex<EofState>,
    notify: Notify,
}

impl EofChunker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EofState {
                content: String::new(),
                closed: false,
                drained: false,
            }),
            notify: Notify::new(),
        }
    }
}

impl Default for EofChunker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextChunker for EofChunker {
    fn add_token(&self, token: &str) -> Result<(), ChunkerClosed> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(ChunkerClosed);
            }
            state.content.push_str(token);
        }
        self.notify.notify_one();
        Ok(())
    }

    fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_one();
    }

    async fn next_chunk(&self) -> Option<String> {
        loop {
            {
                let mut state = self.state.lock();
                if state.closed {
                    if state.drained || state.content.is_empty() {
                        return None;
                    }
                    state.drained = true;
                    return Some(state.content.clone());
                }
            }
            self.notify.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    async fn drain(chunker: &impl TextChunker) -> Vec<String> {
        let mut chunks = Vec::new();
        while let Some(chunk) = chunker.next_chunk().await {
            chunks.push(chunk);
        }
        chunks
    }

    #[tokio::test]
    async fn test_sentences_split_without_accumulation() {
        let chunker = SentenceChunker::with_min_length(0);
        chunker.add_token("Hi. Yes. ").unwrap();
        chunker.close();

        assert_eq!(drain(&chunker).await, vec!["Hi. ", "Yes. "]);
    }

    #[tokio::test]
    async fn test_short_sentences_accumulate() {
        let chunker = SentenceChunker::with_min_length(7);
        chunker.add_token("Hi. Yes. ").unwrap();
        chunker.close();

        assert_eq!(drain(&chunker).await, vec!["Hi. Yes. "]);
    }

    #[tokio::test]
    async fn test_remainder_flushes_on_close() {
        let chunker = SentenceChunker::with_min_length(0);
        chunker.add_token("Done. And a trailing fragment").unwrap();
        chunker.close();

        assert_eq!(
            drain(&chunker).await,
            vec!["Done. ", "And a trailing fragment"]
        );
    }

    #[tokio::test]
    async fn test_consumer_suspends_until_tokens_arrive() {
        let chunker = Arc::new(SentenceChunker::with_min_length(0));

        let consumer = {
            let chunker = Arc::clone(&chunker);
            tokio::spawn(async move { chunker.next_chunk().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        chunker.add_token("Streamed in").unwrap();
        chunker.add_token(" later.").unwrap();
        let chunk = consumer.await.unwrap();
        assert_eq!(chunk.as_deref(), Some("Streamed in later."));
    }

    #[tokio::test]
    async fn test_sentence_chunker_rejects_tokens_after_close() {
        let chunker = SentenceChunker::new();
        chunker.close();
        assert_eq!(chunker.add_token("late"), Err(ChunkerClosed));
    }

    #[tokio::test]
    async fn test_terminators_other_than_period() {
        let chunker = SentenceChunker::with_min_length(0);
        chunker.add_token("Really?! Yes").unwrap();
        chunker.close();

        assert_eq!(drain(&chunker).await, vec!["Really?", "! ", "Yes"]);
    }

    #[tokio::test]
    async fn test_eof_chunker_yields_once_after_close() {
        let chunker = Arc::new(EofChunker::new());
        chunker.add_token("Hello ").unwrap();
        chunker.add_token("world!").unwrap();

        let consumer = {
            let chunker = Arc::clone(&chunker);
            tokio::spawn(async move { chunker.next_chunk().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        // Nothing yielded before close.
        assert!(!consumer.is_finished());

        chunker.close();
        assert_eq!(consumer.await.unwrap().as_deref(), Some("Hello world!"));
        assert_eq!(chunker.next_chunk().await, None);
    }

    #[tokio::test]
    async fn test_eof_chunker_empty_close_yields_nothing() {
        let chunker = EofChunker::new();
        chunker.close();
        assert_eq!(chunker.next_chunk().await, None);
    }

    #[tokio::test]
    async fn test_eof_chunker_rejects_tokens_after_close() {
        let chunker = EofChunker::new();
        chunker.close();
        assert_eq!(chunker.add_token("This should fail"), Err(ChunkerClosed));
    }
}
