//! Task lifecycle management for agent invocations.
//!
//! A [`TaskHandle`] owns the per-invocation task records: the message
//! processor only *requests* state transitions and never mutates task state
//! directly. Transitions are monotonic: once a task reaches a terminal state
//! (`Completed`, `Canceled`, `Failed`) it never leaves it.
//!
//! [`TaskHandle::clean`] is deliberately synchronous so that [`TaskCleaner`]
//! can invoke it from `Drop`, which is what guarantees a task is cleaned
//! exactly once on every exit path, including cancellation.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::a2a::{Message, StreamEvent, Task, TaskState, TaskStatus, TaskStatusUpdateEvent};
use crate::errors::{RouterError, RouterResult};

/// Buffered events per subscriber before forwarding starts dropping.
const SUBSCRIBER_BUFFER: usize = 256;

/// Receiving side of one task's event stream.
///
/// Returned to streaming callers; events arrive strictly in the order they
/// were published for this task.
pub struct TaskSubscription {
    task_id: String,
    receiver: mpsc::Receiver<StreamEvent>,
}

impl TaskSubscription {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Receives the next event; `None` once the task has been cleaned.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.receiver.recv().await
    }

    /// Converts the subscription into a `futures` stream.
    pub fn into_stream(self) -> ReceiverStream<StreamEvent> {
        ReceiverStream::new(self.receiver)
    }
}

/// Per-invocation task primitive: build, transition, subscribe, clean.
#[async_trait::async_trait]
pub trait TaskHandle: Send + Sync {
    /// Creates a task record, honoring caller-supplied task and context ids
    /// when present. Returns the task id.
    async fn build_task(&self, task_id: Option<&str>, context_id: Option<&str>) -> String;

    /// Requests a state transition, best effort. The new status (with an
    /// optional accompanying message) is published to subscribers as a
    /// status-update event.
    async fn update_state(
        &self,
        task_id: &str,
        state: TaskState,
        message: Option<Message>,
    ) -> RouterResult<()>;

    /// Forwards one stream event to the task's subscribers.
    async fn publish(&self, task_id: &str, event: StreamEvent) -> RouterResult<()>;

    /// Opens a subscription to the task's event stream.
    async fn subscribe(&self, task_id: &str) -> TaskSubscription;

    /// Returns a snapshot of the task, if it still exists.
    async fn get_task(&self, task_id: &str) -> Option<Task>;

    /// Removes the task record and closes its subscriber channels.
    ///
    /// Synchronous so it can run from a `Drop` impl.
    fn clean(&self, task_id: &str);
}

/// Drop guard that cleans a task exactly once, whatever the exit path.
pub struct TaskCleaner {
    tasks: Arc<dyn TaskHandle>,
    task_id: String,
}

impl TaskCleaner {
    pub fn new(tasks: Arc<dyn TaskHandle>, task_id: impl Into<String>) -> Self {
        Self {
            tasks,
            task_id: task_id.into(),
        }
    }
}

impl Drop for TaskCleaner {
    fn drop(&mut self) {
        self.tasks.clean(&self.task_id);
    }
}

// ============================================================================
// In-memory implementation
// ============================================================================

struct TaskEntry {
    task: Task,
    subscribers: Vec<mpsc::Sender<StreamEvent>>,
}

/// Thread-safe in-memory [`TaskHandle`] backed by a concurrent map.
#[derive(Default)]
pub struct InMemoryTaskHandle {
    entries: DashMap<String, TaskEntry>,
}

impl InMemoryTaskHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live task records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn forward(subscribers: &mut Vec<mpsc::Sender<StreamEvent>>, event: &StreamEvent) {
    // try_send keeps forwarding non-blocking; a full or closed subscriber
    // loses the event rather than stalling the invocation.
    subscribers.retain(|sender| !sender.is_closed());
    for sender in subscribers.iter() {
        if let Err(e) = sender.try_send(event.clone()) {
            tracing::warn!(error = %e, "failed to forward task event to subscriber");
        }
    }
}

#[async_trait::async_trait]
impl TaskHandle for InMemoryTaskHandle {
    async fn build_task(&self, task_id: Option<&str>, context_id: Option<&str>) -> String {
        let id = task_id
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let context_id = context_id
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let task = Task {
            kind: "task".to_string(),
            id: id.clone(),
            context_id,
            status: TaskStatus::now(TaskState::Working, None),
            history: Vec::new(),
            artifacts: Vec::new(),
        };
        self.entries.insert(
            id.clone(),
            TaskEntry {
                task,
                subscribers: Vec::new(),
            },
        );
        id
    }

    async fn update_state(
        &self,
        task_id: &str,
        state: TaskState,
        message: Option<Message>,
    ) -> RouterResult<()> {
        let mut entry = self
            .entries
            .get_mut(task_id)
            .ok_or_else(|| RouterError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;

        let current = entry.task.status.state;
        if current.is_terminal() && state != current {
            return Err(RouterError::InvalidTaskStateTransition {
                from: current.to_string(),
                to: state.to_string(),
            });
        }

        entry.task.status = TaskStatus::now(state, message);

        let event = StreamEvent::StatusUpdate(TaskStatusUpdateEvent {
            kind: "status-update".to_string(),
            task_id: entry.task.id.clone(),
            context_id: entry.task.context_id.clone(),
            status: entry.task.status.clone(),
            is_final: state.is_terminal(),
        });
        forward(&mut entry.subscribers, &event);
        Ok(())
    }

    async fn publish(&self, task_id: &str, event: StreamEvent) -> RouterResult<()> {
        let mut entry = self
            .entries
            .get_mut(task_id)
            .ok_or_else(|| RouterError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;

        if let StreamEvent::Message(message) = &event {
            entry.task.history.push(message.clone());
        }
        forward(&mut entry.subscribers, &event);
        Ok(())
    }

    async fn subscribe(&self, task_id: &str) -> TaskSubscription {
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_BUFFER);
        if let Some(mut entry) = self.entries.get_mut(task_id) {
            entry.subscribers.push(sender);
        }
        // A missing task yields a subscription that closes immediately.
        TaskSubscription {
            task_id: task_id.to_string(),
            receiver,
        }
    }

    async fn get_task(&self, task_id: &str) -> Option<Task> {
        self.entries.get(task_id).map(|entry| entry.task.clone())
    }

    fn clean(&self, task_id: &str) {
        // Dropping the entry drops its senders, which closes every
        // subscription for this task.
        self.entries.remove(task_id);
    }
}
