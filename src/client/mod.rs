//! JSON-RPC/SSE client bound to one agent's backend endpoint.
//!
//! Each [`BackendClient`] carries its own endpoint and bearer token, so calls
//! are always scoped to exactly one agent; credentials are never shared
//! across agents.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;

use crate::a2a::{
    JsonRpcId, JsonRpcRequest, JsonRpcResponse, Message, MessageSendParams, SendMessageResult,
    StreamEvent,
};
use crate::errors::{RouterError, RouterResult};
use crate::processor::MessageBackend;
use crate::registrar::AgentSpec;

/// Buffered events between the SSE pump and the stream consumer.
const STREAM_BUFFER: usize = 64;

/// Protocol client for one remote agent.
#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    endpoint: String,
    auth_token: Option<String>,
    request_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for BackendClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The bearer token must never reach logs or panic output.
        f.debug_struct("BackendClient")
            .field("endpoint", &self.endpoint)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl BackendClient {
    /// Creates a client for the agent served at `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            auth_token: None,
            request_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Binds the per-agent bearer token (builder pattern).
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Builds a client from an inventory spec, validating the endpoint and
    /// binding the spec's credential to this client only.
    pub fn from_spec(spec: &AgentSpec) -> RouterResult<Self> {
        if spec.url.is_empty() {
            return Err(RouterError::InvalidConfiguration {
                field: "spec.url".to_string(),
                reason: "agent spec has no url".to_string(),
            });
        }
        let mut client = Self::new(&spec.url);
        if let Some(token) = &spec.auth_token {
            client = client.with_auth_token(token);
        }
        Ok(client)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn next_request_id(&self) -> JsonRpcId {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        JsonRpcId::Number(id as i64)
    }

    /// Sends one JSON-RPC request and unwraps the response envelope.
    async fn post_rpc(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> RouterResult<serde_json::Value> {
        let request = JsonRpcRequest::new(self.next_request_id(), method, params);

        let mut builder = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .json(&request);
        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(|e| RouterError::Network {
            operation: method.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| RouterError::Network {
            operation: method.to_string(),
            reason: e.to_string(),
        })?;

        // Error envelopes may arrive with a non-success HTTP status.
        let envelope: JsonRpcResponse =
            serde_json::from_slice(&body).map_err(|e| RouterError::Network {
                operation: method.to_string(),
                reason: if status.is_success() {
                    format!("malformed response: {e}")
                } else {
                    format!("HTTP {status}")
                },
            })?;

        if let Some(error) = envelope.error {
            return Err(RouterError::Backend {
                message: error.message,
            });
        }
        envelope.result.ok_or_else(|| RouterError::Serialization {
            format: "json".to_string(),
            reason: format!("{method} response carried neither result nor error"),
        })
    }

    /// Non-streaming `message/send` call.
    pub async fn send_message(&self, params: MessageSendParams) -> RouterResult<SendMessageResult> {
        let value = serde_json::to_value(&params)?;
        let result = self.post_rpc("message/send", value).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Streaming `message/stream` call; the receiver yields events in
    /// server-emission order and closes when the SSE stream ends.
    pub async fn send_streaming_message(
        &self,
        params: MessageSendParams,
    ) -> RouterResult<mpsc::Receiver<StreamEvent>> {
        let value = serde_json::to_value(&params)?;
        let request = JsonRpcRequest::new(self.next_request_id(), "message/stream", value);

        let mut builder = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&request);
        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(|e| RouterError::Network {
            operation: "message/stream".to_string(),
            reason: e.to_string(),
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RouterError::Network {
                operation: "message/stream".to_string(),
                reason: format!("HTTP {status}: {body}"),
            });
        }

        let content_type = response
            .headers()
            .get("Content-Type")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        if !content_type.starts_with("text/event-stream") {
            return Err(RouterError::Network {
                operation: "message/stream".to_string(),
                reason: format!("expected text/event-stream, got {content_type:?}"),
            });
        }

        let (sender, receiver) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(pump_sse(Box::pin(response.bytes_stream()), sender));
        Ok(receiver)
    }
}

/// Reads an SSE byte stream, decoding each `data:` event into a
/// [`StreamEvent`] and forwarding it in order.
async fn pump_sse(
    mut bytes: impl futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Unpin,
    sender: mpsc::Sender<StreamEvent>,
) {
    let mut buffer = String::new();
    let mut data = String::new();

    while let Some(chunk) = bytes.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!(error = %e, "backend event stream terminated");
                return;
            }
        };
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(newline) = buffer.find('\n') {
            let line = buffer[..newline].trim_end_matches('\r').to_string();
            buffer.drain(..=newline);

            if line.is_empty() {
                // Blank line terminates one SSE event.
                if !data.is_empty() {
                    match decode_sse_event(&data) {
                        Ok(event) => {
                            if sender.send(event).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "skipping malformed stream event"),
                    }
                    data.clear();
                }
            } else if let Some(rest) = line.strip_prefix("data:") {
                if !data.is_empty() {
                    data.push('\n');
                }
                data.push_str(rest.trim_start());
            }
            // comments and other SSE fields (event:, id:, retry:) are ignored
        }
    }
}

fn decode_sse_event(data: &str) -> RouterResult<StreamEvent> {
    let envelope: JsonRpcResponse = serde_json::from_str(data)?;
    if let Some(error) = envelope.error {
        return Err(RouterError::Backend {
            message: error.message,
        });
    }
    let result = envelope.result.ok_or_else(|| RouterError::Serialization {
        format: "json".to_string(),
        reason: "stream event carried neither result nor error".to_string(),
    })?;
    Ok(serde_json::from_value(result)?)
}

#[async_trait::async_trait]
impl MessageBackend for BackendClient {
    async fn handle_message(&self, text: &str, context_id: &str) -> RouterResult<Vec<Message>> {
        let mut message = Message::user_text(text);
        message.context_id = Some(context_id.to_string());

        match self.send_message(MessageSendParams::from(message)).await? {
            SendMessageResult::Message(message) => Ok(vec![message]),
            SendMessageResult::Task(task) => {
                let mut messages = task.history;
                if let Some(status_message) = task.status.message {
                    messages.push(status_message);
                }
                Ok(messages)
            }
        }
    }

    async fn handle_message_stream(
        &self,
        text: &str,
        context_id: &str,
    ) -> RouterResult<mpsc::Receiver<StreamEvent>> {
        let mut message = Message::user_text(text);
        message.context_id = Some(context_id.to_string());
        self.send_streaming_message(MessageSendParams::from(message))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_sse_event_unwraps_the_rpc_envelope() {
        let data = r#"{"jsonrpc":"2.0","result":{"kind":"message","messageId":"m1","role":"agent","parts":[{"kind":"text","text":"hi"}]},"id":1}"#;
        let event = decode_sse_event(data).unwrap();
        assert!(matches!(event, StreamEvent::Message(_)));
    }

    #[test]
    fn decode_sse_event_surfaces_rpc_errors() {
        let data = r#"{"jsonrpc":"2.0","error":{"code":-32603,"message":"boom"},"id":1}"#;
        let err = decode_sse_event(data).unwrap_err();
        assert!(matches!(err, RouterError::Backend { .. }));
    }

    #[test]
    fn from_spec_binds_the_agents_token() {
        let spec = AgentSpec {
            url: "http://echo:8080".to_string(),
            description: String::new(),
            auth_token: Some("s3cret".to_string()),
        };
        let client = BackendClient::from_spec(&spec).unwrap();
        assert_eq!(client.endpoint(), "http://echo:8080");
        assert_eq!(client.auth_token.as_deref(), Some("s3cret"));
    }

    #[test]
    fn debug_output_redacts_the_token() {
        let client = BackendClient::new("http://echo:8080").with_auth_token("s3cret");
        let rendered = format!("{client:?}");
        assert!(rendered.contains("http://echo:8080"));
        assert!(!rendered.contains("s3cret"));
    }

    #[test]
    fn from_spec_rejects_an_empty_endpoint() {
        let spec = AgentSpec {
            url: String::new(),
            description: String::new(),
            auth_token: None,
        };
        let err = BackendClient::from_spec(&spec).unwrap_err();
        assert!(matches!(err, RouterError::InvalidConfiguration { .. }));
    }
}
