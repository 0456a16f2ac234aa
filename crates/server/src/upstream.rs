//! Upstream chat-completions client
//!
//! The gateway proxies `/v1/chat/completions` onto a configured
//! OpenAI-compatible endpoint. Non-streaming calls are plain JSON;
//! streaming calls parse the SSE byte stream into chunks, ending at the
//! `[DONE]` sentinel.

use std::pin::Pin;

use futures::{Stream, StreamExt};
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use speaches_core::{ChatCompletion, ChatCompletionChunk, Error, Result};

pub type UpstreamChunkStream = Pin<Box<dyn Stream<Item = Result<ChatCompletionChunk>> + Send>>;

#[derive(Clone)]
pub struct UpstreamClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl UpstreamClient {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn request(&self, payload: &Value) -> reqwest::RequestBuilder {
        let mut request = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .json(payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        request
    }

    async fn send(&self, payload: &Value) -> Result<reqwest::Response> {
        let response = self.request(payload).send().await.map_err(|err| {
            Error::Upstream {
                status: 502,
                message: format!(
                    "could not reach the chat completion endpoint ({err}). \
                     Check the configured base URL and network"
                ),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::Upstream {
                status: status.as_u16(),
                message: format!(
                    "{message} (verify the upstream API key and endpoint configuration)"
                ),
            });
        }
        Ok(response)
    }

    /// One non-streaming completion.
    pub async fn chat_completion(&self, payload: &Value) -> Result<ChatCompletion> {
        let response = self.send(payload).await?;
        response
            .json::<ChatCompletion>()
            .await
            .map_err(|err| Error::Upstream {
                status: 502,
                message: format!("unparsable completion payload: {err}"),
            })
    }

    /// A streaming completion as a lazy chunk stream.
    pub async fn chat_completion_stream(&self, payload: &Value) -> Result<UpstreamChunkStream> {
        let response = self.send(payload).await?;
        let mut bytes = response.bytes_stream();

        let stream = async_stream::stream! {
            let mut buffer = String::new();
            'outer: while let Some(piece) = bytes.next().await {
                let piece = match piece {
                    Ok(piece) => piece,
                    Err(err) => {
                        yield Err(Error::Upstream {
                            status: 502,
                            message: format!("stream interrupted: {err}"),
                        });
                        break;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&piece));

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim_end_matches('\r').to_string();
                    buffer.drain(..=newline);

                    let Some(data) = line.strip_prefix("data:").map(str::trim_start) else {
                        continue;
                    };
                    if data == "[DONE]" {
                        debug!("upstream stream finished");
                        break 'outer;
                    }
                    match serde_json::from_str::<ChatCompletionChunk>(data) {
                        Ok(chunk) => yield Ok(chunk),
                        Err(err) => {
                            warn!(%err, "skipping unparsable upstream chunk");
                        }
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_non_streaming_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "chatcmpl-1",
                "object": "chat.completion",
                "created": 1700000000,
                "model": "gpt-4o",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": "Hello!"},
                    "finish_reason": "stop"
                }]
            })))
            .mount(&server)
            .await;

        let client = UpstreamClient::new(server.uri(), None);
        let completion = client
            .chat_completion(&serde_json::json!({"model": "gpt-4o", "messages": []}))
            .await
            .unwrap();
        assert_eq!(completion.id, "chatcmpl-1");
        assert_eq!(
            completion.choices[0].message.content.as_deref(),
            Some("Hello!")
        );
    }

    #[tokio::test]
    async fn test_upstream_error_carries_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let client = UpstreamClient::new(server.uri(), Some("wrong".to_string()));
        let err = client
            .chat_completion(&serde_json::json!({"model": "gpt-4o", "messages": []}))
            .await
            .unwrap_err();
        match err {
            Error::Upstream { status, message } => {
                assert_eq!(status, 401);
                assert!(message.contains("bad key"));
            }
            other => panic!("expected upstream error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_streaming_chunks_parse_until_done() {
        let body = concat!(
            "data: {\"id\":\"chatcmpl-2\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hi\"}}]}\n\n",
            "data: {\"id\":\"chatcmpl-2\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let client = UpstreamClient::new(server.uri(), None);
        let stream = client
            .chat_completion_stream(&serde_json::json!({"model": "m", "messages": []}))
            .await
            .unwrap();
        let chunks: Vec<_> = stream.collect::<Vec<_>>().await;

        assert_eq!(chunks.len(), 2);
        let first = chunks[0].as_ref().unwrap();
        assert_eq!(first.choices[0].delta.content.as_deref(), Some("Hi"));
        let last = chunks[1].as_ref().unwrap();
        assert_eq!(last.choices[0].finish_reason.as_deref(), Some("stop"));
    }
}
