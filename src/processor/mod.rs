//! Per-invocation task lifecycle execution.
//!
//! The [`MessageProcessor`] runs one invocation against a backend: it
//! validates the inbound message, drives the task through
//! Working → Completed/Failed, and guarantees the task is cleaned exactly
//! once on every exit path. Synchronous invocations block the caller for the
//! duration of the backend call; streaming invocations hand back a
//! subscription immediately and finish in a detached worker.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::a2a::{Message, MessageSendParams, Part, StreamEvent, TaskState};
use crate::errors::{RouterError, RouterResult};
use crate::tasks::{TaskCleaner, TaskHandle, TaskSubscription};

/// Reply text when the inbound message carries no textual parts.
const NO_TEXT_PARTS: &str = "no text parts found in message";

/// Execution backend for one agent.
///
/// Implemented by [`BackendClient`](crate::client::BackendClient) for remote
/// agents and by scripted fakes in tests.
#[async_trait::async_trait]
pub trait MessageBackend: Send + Sync {
    /// Executes one synchronous invocation; returns the backend's messages.
    async fn handle_message(&self, text: &str, context_id: &str) -> RouterResult<Vec<Message>>;

    /// Starts one streaming invocation; the receiver yields events in
    /// backend-emission order and closes when the backend is done.
    async fn handle_message_stream(
        &self,
        text: &str,
        context_id: &str,
    ) -> RouterResult<mpsc::Receiver<StreamEvent>>;
}

/// Concatenates the textual parts of a message in order.
///
/// Pure and total: non-text parts are skipped, a message with no text parts
/// yields the empty string.
pub fn extract_text(message: &Message) -> String {
    message
        .parts
        .iter()
        .filter_map(|part| match part {
            Part::Text { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

/// Last textual content among a batch of backend messages.
fn last_text(messages: &[Message]) -> String {
    messages
        .iter()
        .rev()
        .map(extract_text)
        .find(|text| !text.is_empty())
        .unwrap_or_default()
}

/// Executes invocations for one agent.
#[derive(Clone)]
pub struct MessageProcessor {
    backend: Arc<dyn MessageBackend>,
    tasks: Arc<dyn TaskHandle>,
}

impl MessageProcessor {
    pub fn new(backend: Arc<dyn MessageBackend>, tasks: Arc<dyn TaskHandle>) -> Self {
        Self { backend, tasks }
    }

    pub fn tasks(&self) -> &Arc<dyn TaskHandle> {
        &self.tasks
    }

    /// Synchronous invocation: blocks until the backend answers.
    ///
    /// Backend failures are folded into an ordinary protocol reply carrying
    /// the error text, so the caller always gets a well-formed message.
    pub async fn process(&self, params: MessageSendParams) -> RouterResult<Message> {
        let inbound = params.message;
        let text = extract_text(&inbound);
        if text.is_empty() {
            // Validation precedes task construction: no task may leak here.
            return Ok(Message::agent_text(format!("Error: {NO_TEXT_PARTS}")));
        }

        let context_id = inbound
            .context_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let task_id = self
            .tasks
            .build_task(inbound.task_id.as_deref(), Some(&context_id))
            .await;
        let _cleaner = TaskCleaner::new(self.tasks.clone(), task_id.clone());

        self.mark(&task_id, TaskState::Working, None).await;

        match self.backend.handle_message(&text, &context_id).await {
            Ok(messages) => {
                let reply =
                    Message::agent_text(last_text(&messages)).for_task(&task_id, &context_id);
                self.mark(&task_id, TaskState::Completed, Some(reply.clone()))
                    .await;
                Ok(reply)
            }
            Err(e) => {
                let reply = Message::agent_text(e.to_string()).for_task(&task_id, &context_id);
                self.mark(&task_id, TaskState::Failed, Some(reply.clone()))
                    .await;
                Ok(reply)
            }
        }
    }

    /// Streaming invocation: returns a subscription once the backend stream
    /// is established, then finishes in a detached worker.
    ///
    /// A setup failure never yields a subscription; the task is marked Failed
    /// and cleaned before the error propagates.
    pub async fn process_streaming(
        &self,
        params: MessageSendParams,
        cancel: CancellationToken,
    ) -> RouterResult<TaskSubscription> {
        let inbound = params.message;
        let text = extract_text(&inbound);
        if text.is_empty() {
            return Err(RouterError::MissingInput(NO_TEXT_PARTS.to_string()));
        }

        let context_id = inbound
            .context_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let task_id = self
            .tasks
            .build_task(inbound.task_id.as_deref(), Some(&context_id))
            .await;
        let cleaner = TaskCleaner::new(self.tasks.clone(), task_id.clone());

        let subscription = self.tasks.subscribe(&task_id).await;

        let events = match self.backend.handle_message_stream(&text, &context_id).await {
            Ok(events) => events,
            Err(e) => {
                let failure =
                    Message::agent_text(e.to_string()).for_task(&task_id, &context_id);
                self.mark(&task_id, TaskState::Failed, Some(failure)).await;
                // cleaner drops here: the task is gone before the caller
                // sees the error, and no subscription escapes.
                return Err(e);
            }
        };

        let tasks = self.tasks.clone();
        tokio::spawn(run_stream_worker(tasks, task_id, events, cancel, cleaner));

        Ok(subscription)
    }

    /// Best-effort state transition; failures are logged, never fatal.
    async fn mark(&self, task_id: &str, state: TaskState, message: Option<Message>) {
        if let Err(e) = self.tasks.update_state(task_id, state, message).await {
            tracing::warn!(task = %task_id, state = %state, error = %e, "failed to update task state");
        }
    }
}

/// Detached worker for one streaming invocation.
///
/// Forwards backend events to subscribers strictly in emission order, marks
/// the task Completed when the channel closes (or Canceled when the request
/// context is cancelled), and cleans the task exactly once via the moved-in
/// guard.
async fn run_stream_worker(
    tasks: Arc<dyn TaskHandle>,
    task_id: String,
    mut events: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
    cleaner: TaskCleaner,
) {
    let _cleaner = cleaner;

    if let Err(e) = tasks.update_state(&task_id, TaskState::Working, None).await {
        tracing::warn!(task = %task_id, error = %e, "failed to mark streaming task working");
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(task = %task_id, "streaming invocation cancelled");
                if let Err(e) = tasks.update_state(&task_id, TaskState::Canceled, None).await {
                    tracing::warn!(task = %task_id, error = %e, "failed to mark task canceled");
                }
                break;
            }
            event = events.recv() => match event {
                Some(event) => {
                    if let Err(e) = tasks.publish(&task_id, event).await {
                        tracing::warn!(task = %task_id, error = %e, "failed to forward stream event");
                    }
                }
                None => {
                    if let Err(e) = tasks.update_state(&task_id, TaskState::Completed, None).await {
                        tracing::warn!(task = %task_id, error = %e, "failed to mark task completed");
                    }
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::a2a::FileContent;

    fn message_with_parts(parts: Vec<Part>) -> Message {
        Message {
            kind: "message".to_string(),
            message_id: "m1".to_string(),
            role: crate::a2a::MessageRole::User,
            parts,
            context_id: None,
            task_id: None,
            metadata: None,
        }
    }

    #[test]
    fn extract_text_concatenates_in_order() {
        let message = message_with_parts(vec![
            Part::Text {
                text: "a".to_string(),
                metadata: None,
            },
            Part::File {
                file: FileContent::Uri {
                    uri: "https://example.com/image.png".to_string(),
                    mime_type: Some("image/png".to_string()),
                },
                metadata: None,
            },
            Part::Text {
                text: "b".to_string(),
                metadata: None,
            },
        ]);
        assert_eq!(extract_text(&message), "ab");
    }

    #[test]
    fn extract_text_is_empty_without_text_parts() {
        let message = message_with_parts(vec![Part::Data {
            data: serde_json::json!({"k": "v"}),
            metadata: None,
        }]);
        assert_eq!(extract_text(&message), "");
    }

    #[test]
    fn last_text_prefers_the_final_textual_message() {
        let messages = vec![
            Message::agent_text("first"),
            message_with_parts(vec![Part::Data {
                data: serde_json::json!(1),
                metadata: None,
            }]),
            Message::agent_text("final"),
        ];
        assert_eq!(last_text(&messages), "final");
    }
}
