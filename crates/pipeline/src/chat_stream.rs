//! Streaming chat fan-out
//!
//! Two producers write into one bounded channel of chat-completion
//! chunks: the text producer re-emits upstream chunks (feeding the
//! sentence chunker and rewriting content into audio-transcript deltas
//! when audio is requested), the audio producer drains the chunker, runs
//! synthesis per sentence and emits base64 audio-data deltas under the
//! same audio id. Ordering between the two producers is unspecified;
//! within each it is FIFO.

use std::pin::Pin;
use std::sync::{Arc, OnceLock};

use base64::Engine;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, warn};

use speaches_core::{
    ChatCompletionChunk, ChoiceDelta, DeltaAudio, Error, Result,
};

use crate::chunker::{SentenceChunker, TextChunker};
use crate::text::clean_for_synthesis;

/// Synthesizes one cleaned sentence to PCM16 bytes.
pub type SpeechFn = Arc<dyn Fn(String) -> BoxFuture<'static, Result<Bytes>> + Send + Sync>;

/// Identity of the upstream completion, captured from its first chunk
/// and reused for synthesized audio chunks.
#[derive(Debug, Clone)]
struct StreamMeta {
    id: String,
    created: i64,
    model: String,
}

type ChunkStream = Pin<Box<dyn Stream<Item = Result<ChatCompletionChunk>> + Send>>;

/// Fan-out of one streamed chat completion.
pub struct AudioChatFanout {
    audio_id: String,
    expires_at: i64,
    /// `None` turns the fan-out into a plain pass-through (text-only
    /// modality).
    speech: Option<SpeechFn>,
}

impl AudioChatFanout {
    pub fn new(audio_id: String, expires_at: i64, speech: Option<SpeechFn>) -> Self {
        Self {
            audio_id,
            expires_at,
            speech,
        }
    }

    /// Spawn the producers and return the merged chunk stream.
    ///
    /// When audio is on, the chunk carrying a `finish_reason` is held
    /// back and re-emitted after both producers finish, so it stays the
    /// last event of the merged stream even though audio deltas trail
    /// the text they voice.
    pub fn run(self, upstream: ChunkStream) -> ReceiverStream<Result<ChatCompletionChunk>> {
        let (tx, rx) = mpsc::channel::<Result<ChatCompletionChunk>>(64);
        let chunker = Arc::new(SentenceChunker::new());
        let meta: Arc<OnceLock<StreamMeta>> = Arc::new(OnceLock::new());
        let finish_chunk: Arc<parking_lot::Mutex<Option<ChatCompletionChunk>>> =
            Arc::new(parking_lot::Mutex::new(None));

        let Self {
            audio_id,
            expires_at,
            speech,
        } = self;

        let text_tx = tx.clone();
        let text_chunker = Arc::clone(&chunker);
        let text_meta = Arc::clone(&meta);
        let text_finish = Arc::clone(&finish_chunk);
        let text_audio_id = audio_id.clone();
        let wants_audio = speech.is_some();
        let text_task = tokio::spawn(async move {
            let mut upstream = upstream;
            while let Some(chunk) = upstream.next().await {
                match chunk {
                    Ok(mut chunk) => {
                        text_meta.get_or_init(|| StreamMeta {
                            id: chunk.id.clone(),
                            created: chunk.created,
                            model: chunk.model.clone(),
                        });
                        if wants_audio {
                            rewrite_text_chunk(&mut chunk, &text_chunker, &text_audio_id, expires_at);
                            if chunk
                                .choices
                                .iter()
                                .any(|choice| choice.finish_reason.is_some())
                            {
                                *text_finish.lock() = Some(chunk);
                                continue;
                            }
                        }
                        if text_tx.send(Ok(chunk)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        let _ = text_tx.send(Err(err)).await;
                        break;
                    }
                }
            }
            text_chunker.close();
        });

        let audio_task = speech.map(|speech| {
            let audio_tx = tx.clone();
            let audio_chunker = Arc::clone(&chunker);
            let audio_meta = Arc::clone(&meta);
            let audio_id = audio_id.clone();
            tokio::spawn(async move {
                while let Some(sentence) = audio_chunker.next_chunk().await {
                    let cleaned = clean_for_synthesis(&sentence);
                    if cleaned.is_empty() {
                        warn!(original = sentence, "skipping empty sentence");
                        continue;
                    }
                    let pcm = match speech(cleaned).await {
                        Ok(pcm) => pcm,
                        Err(err) => {
                            error!(%err, "sentence synthesis failed, stopping audio producer");
                            break;
                        }
                    };
                    let meta = audio_meta.get().cloned().unwrap_or_else(|| StreamMeta {
                        id: speaches_core::generate_chat_completion_id(),
                        created: 0,
                        model: String::new(),
                    });
                    let chunk = ChatCompletionChunk::audio_delta(
                        &meta.id,
                        meta.created,
                        &meta.model,
                        DeltaAudio {
                            id: Some(audio_id.clone()),
                            data: Some(
                                base64::engine::general_purpose::STANDARD.encode(&pcm),
                            ),
                            expires_at: Some(expires_at),
                            transcript: None,
                        },
                    );
                    if audio_tx.send(Ok(chunk)).await.is_err() {
                        break;
                    }
                }
            })
        });

        // Finalizer: once both producers are done, flush the held-back
        // finish chunk and close the channel.
        tokio::spawn(async move {
            let _ = text_task.await;
            if let Some(audio_task) = audio_task {
                let _ = audio_task.await;
            }
            let held = finish_chunk.lock().take();
            if let Some(chunk) = held {
                let _ = tx.send(Ok(chunk)).await;
            }
        });

        ReceiverStream::new(rx)
    }
}

/// Feed assistant text into the chunker and rewrite the delta so its
/// content travels as an audio transcript keyed to this response's
/// audio id.
fn rewrite_text_chunk(
    chunk: &mut ChatCompletionChunk,
    chunker: &SentenceChunker,
    audio_id: &str,
    expires_at: i64,
) {
    for choice in &mut chunk.choices {
        let Some(content) = choice.delta.content.take() else {
            continue;
        };
        if chunker.add_token(&content).is_err() {
            warn!("chunker closed before the upstream finished");
        }
        choice.delta = ChoiceDelta {
            role: choice.delta.role.take(),
            content: None,
            audio: Some(DeltaAudio {
                id: Some(audio_id.to_string()),
                transcript: Some(content),
                data: None,
                expires_at: Some(expires_at),
            }),
            extra: std::mem::take(&mut choice.delta.extra),
        };
    }
}

/// Collect a PCM chunk stream into one buffer; shared by the speech
/// closures the server injects.
pub async fn collect_pcm(
    mut chunks: Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>,
) -> Result<Bytes> {
    let mut buffer = Vec::new();
    while let Some(chunk) = chunks.next().await {
        buffer.extend_from_slice(&chunk?);
    }
    Ok(Bytes::from(buffer))
}

/// Map a fan-out error into one terminal SSE payload.
pub fn error_chunk(err: &Error) -> serde_json::Value {
    serde_json::json!({
        "error": {
            "message": err.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use speaches_core::ChunkChoice;

    fn text_chunk(id: &str, content: Option<&str>, finish: Option<&str>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: id.to_string(),
            object: "chat.completion.chunk".to_string(),
            created: 1_700_000_000,
            model: "upstream-model".to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChoiceDelta {
                    role: None,
                    content: content.map(str::to_string),
                    audio: None,
                    extra: Map::new(),
                },
                finish_reason: finish.map(str::to_string),
                extra: Map::new(),
            }],
            extra: Map::new(),
        }
    }

    fn upstream(chunks: Vec<ChatCompletionChunk>) -> ChunkStream {
        Box::pin(futures::stream::iter(
            chunks.into_iter().map(Ok).collect::<Vec<_>>(),
        ))
    }

    #[tokio::test]
    async fn test_text_only_passthrough() {
        let fanout = AudioChatFanout::new("audio_x".to_string(), 0, None);
        let stream = fanout.run(upstream(vec![
            text_chunk("chatcmpl-1", Some("Hello."), None),
            text_chunk("chatcmpl-1", None, Some("stop")),
        ]));
        let chunks: Vec<_> = stream.collect::<Vec<_>>().await;

        assert_eq!(chunks.len(), 2);
        let first = chunks[0].as_ref().unwrap();
        assert_eq!(first.choices[0].delta.content.as_deref(), Some("Hello."));
        assert!(first.choices[0].delta.audio.is_none());
    }

    #[tokio::test]
    async fn test_audio_fanout_interleaves_with_stable_id() {
        let speech: SpeechFn = Arc::new(|_sentence| {
            Box::pin(async { Ok(Bytes::from_static(&[0u8, 1, 2, 3])) })
        });
        let fanout = AudioChatFanout::new("audio_stable".to_string(), 42, Some(speech));
        let stream = fanout.run(upstream(vec![
            text_chunk("chatcmpl-9", Some("This is a full sentence. "), None),
            text_chunk("chatcmpl-9", Some("And a second one here."), None),
            text_chunk("chatcmpl-9", None, Some("stop")),
        ]));
        let chunks: Vec<ChatCompletionChunk> = stream
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .map(|chunk| chunk.unwrap())
            .collect();

        // Every text delta was rewritten into a transcript delta.
        let transcripts: Vec<_> = chunks
            .iter()
            .filter_map(|chunk| chunk.choices[0].delta.audio.as_ref())
            .filter_map(|audio| audio.transcript.clone())
            .collect();
        assert_eq!(
            transcripts,
            vec!["This is a full sentence. ", "And a second one here."]
        );

        // Audio data deltas arrived, tagged to the upstream completion.
        let data_chunks: Vec<_> = chunks
            .iter()
            .filter(|chunk| {
                chunk.choices[0]
                    .delta
                    .audio
                    .as_ref()
                    .is_some_and(|audio| audio.data.is_some())
            })
            .collect();
        assert_eq!(data_chunks.len(), 2);
        for chunk in &data_chunks {
            assert_eq!(chunk.id, "chatcmpl-9");
            assert_eq!(
                chunk.choices[0].delta.audio.as_ref().unwrap().id.as_deref(),
                Some("audio_stable")
            );
        }

        // No chunk kept a raw content field.
        assert!(chunks
            .iter()
            .all(|chunk| chunk.choices[0].delta.content.is_none()));

        // Every audio delta across the stream carries the same id.
        let audio_ids: std::collections::HashSet<_> = chunks
            .iter()
            .filter_map(|chunk| chunk.choices[0].delta.audio.as_ref())
            .filter_map(|audio| audio.id.clone())
            .collect();
        assert_eq!(audio_ids.len(), 1);

        // The finish_reason chunk closes the stream.
        let last = chunks.last().unwrap();
        assert_eq!(last.choices[0].finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn test_synthesis_failure_keeps_text_flowing() {
        let speech: SpeechFn = Arc::new(|_sentence| {
            Box::pin(async { Err(Error::Inference("model exploded".to_string())) })
        });
        let fanout = AudioChatFanout::new("audio_x".to_string(), 0, Some(speech));
        let stream = fanout.run(upstream(vec![
            text_chunk("chatcmpl-2", Some("A complete sentence right here."), None),
            text_chunk("chatcmpl-2", None, Some("stop")),
        ]));
        let chunks: Vec<_> = stream.collect::<Vec<_>>().await;

        // Both text chunks made it through despite the audio producer
        // giving up.
        assert_eq!(
            chunks
                .iter()
                .filter(|chunk| chunk.as_ref().is_ok_and(|c| c
                    .choices
                    .first()
                    .is_some_and(|choice| choice
                        .delta
                        .audio
                        .as_ref()
                        .is_some_and(|audio| audio.transcript.is_some())
                        || choice.finish_reason.is_some())))
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn test_upstream_error_propagates() {
        let fanout = AudioChatFanout::new("audio_x".to_string(), 0, None);
        let upstream: ChunkStream = Box::pin(futures::stream::iter(vec![
            Ok(text_chunk("chatcmpl-3", Some("partial"), None)),
            Err(Error::Upstream {
                status: 502,
                message: "bad gateway".to_string(),
            }),
        ]));
        let chunks: Vec<_> = fanout.run(upstream).collect::<Vec<_>>().await;

        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].is_err());
    }
}
