//! OpenAI chat-completion types
//!
//! Only the fields the gateway inspects or rewrites are typed; everything
//! else is preserved through `#[serde(flatten)]` maps so the proxy stays
//! transparent to upstream extensions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Response modalities a client may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Audio,
}

/// `audio` parameter of a chat request: output voice and wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioParams {
    pub voice: String,
    pub format: String,
}

/// Base64 input audio inside a user message content part.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputAudio {
    pub data: String,
    pub format: String,
}

/// One element of a list-valued message `content`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    InputAudio { input_audio: InputAudio },
}

/// Message content: either a plain string or a list of typed parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// Reference to a previous audio response inside an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantAudioRef {
    pub id: String,
}

/// A request message. Role stays a plain string so unknown roles pass
/// through to the upstream untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AssistantAudioRef>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatMessage {
    pub fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(MessageContent::Text(content.into())),
            audio: None,
            extra: Map::new(),
        }
    }
}

/// Body of `POST /v1/chat/completions`.
///
/// `transcription_model` and `speech_model` are gateway extensions naming
/// the local models used for input-audio transcription and output speech;
/// they default from the server configuration and are stripped before the
/// request is forwarded upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<Modality>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<u8>,
    #[serde(default, skip_serializing)]
    pub transcription_model: Option<String>,
    #[serde(default, skip_serializing)]
    pub speech_model: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatCompletionRequest {
    /// Whether the client asked for audio output.
    pub fn wants_audio(&self) -> bool {
        self.modalities
            .as_deref()
            .is_some_and(|modalities| modalities.contains(&Modality::Audio))
    }
}

/// Audio attached to a non-streaming assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantAudio {
    pub id: String,
    /// Base64 audio bytes in the requested format.
    pub data: String,
    pub transcript: String,
    /// Unix timestamp after which the id can no longer be referenced.
    pub expires_at: i64,
}

/// Assistant message of a non-streaming response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub role: String,
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AssistantAudio>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: ResponseMessage,
    pub finish_reason: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Non-streaming chat completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Audio fields of a streamed delta. `transcript` deltas carry the text
/// that is being spoken; `data` deltas carry base64 PCM.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeltaAudio {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChoiceDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<DeltaAudio>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChoiceDelta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One streamed chunk (`object = "chat.completion.chunk"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatCompletionChunk {
    /// A synthetic chunk carrying only an audio delta, tagged to an
    /// existing completion.
    pub fn audio_delta(id: &str, created: i64, model: &str, audio: DeltaAudio) -> Self {
        Self {
            id: id.to_string(),
            object: "chat.completion.chunk".to_string(),
            created,
            model: model.to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChoiceDelta {
                    audio: Some(audio),
                    ..Default::default()
                },
                finish_reason: None,
                extra: Map::new(),
            }],
            extra: Map::new(),
        }
    }
}

/// OpenAI does not use bare UUIDs; ids carry a type prefix.
pub fn generate_audio_id() -> String {
    format!("audio_{}", Uuid::new_v4())
}

pub fn generate_chat_completion_id() -> String {
    format!("chatcmpl-{}", Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_roundtrip_preserves_unknown_fields() {
        let body = r#"{
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "temperature": 0.3,
            "modalities": ["text", "audio"],
            "audio": {"voice": "af_heart", "format": "pcm16"}
        }"#;
        let request: ChatCompletionRequest = serde_json::from_str(body).unwrap();
        assert!(request.wants_audio());
        assert_eq!(request.extra["temperature"], 0.3);

        let forwarded = serde_json::to_value(&request).unwrap();
        assert_eq!(forwarded["temperature"], 0.3);
    }

    #[test]
    fn test_gateway_extensions_are_not_forwarded() {
        let body = r#"{
            "model": "gpt-4o",
            "messages": [],
            "transcription_model": "acme/asr-tiny",
            "speech_model": "acme/tts"
        }"#;
        let request: ChatCompletionRequest = serde_json::from_str(body).unwrap();
        assert_eq!(request.transcription_model.as_deref(), Some("acme/asr-tiny"));

        let forwarded = serde_json::to_value(&request).unwrap();
        assert!(forwarded.get("transcription_model").is_none());
        assert!(forwarded.get("speech_model").is_none());
    }

    #[test]
    fn test_content_parts_parse() {
        let message: ChatMessage = serde_json::from_str(
            r#"{
                "role": "user",
                "content": [
                    {"type": "text", "text": "what does this say?"},
                    {"type": "input_audio", "input_audio": {"data": "QUJD", "format": "wav"}}
                ]
            }"#,
        )
        .unwrap();
        match message.content {
            Some(MessageContent::Parts(parts)) => {
                assert_eq!(parts.len(), 2);
                assert!(matches!(parts[1], ContentPart::InputAudio { .. }));
            }
            other => panic!("expected parts, got {other:?}"),
        }
    }

    #[test]
    fn test_audio_delta_chunk_shape() {
        let chunk = ChatCompletionChunk::audio_delta(
            "chatcmpl-1",
            1700000000,
            "tts-1",
            DeltaAudio {
                id: Some("audio_1".into()),
                data: Some("AAAA".into()),
                ..Default::default()
            },
        );
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["object"], "chat.completion.chunk");
        assert_eq!(json["choices"][0]["delta"]["audio"]["id"], "audio_1");
        assert!(json["choices"][0]["delta"].get("content").is_none());
    }

    #[test]
    fn test_generated_ids_are_prefixed() {
        assert!(generate_audio_id().starts_with("audio_"));
        assert!(generate_chat_completion_id().starts_with("chatcmpl-"));
    }
}
