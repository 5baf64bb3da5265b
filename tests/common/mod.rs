//! Shared fakes for integration tests: a spy task handle that records every
//! lifecycle call while delegating to the real in-memory store, and a
//! scripted backend with pre-seeded replies.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::mpsc;

use a2a_router::a2a::{Message, StreamEvent, Task, TaskState};
use a2a_router::errors::{RouterError, RouterResult};
use a2a_router::processor::MessageBackend;
use a2a_router::tasks::{InMemoryTaskHandle, TaskHandle, TaskSubscription};

/// Records every task-handle call while behaving like the real store.
#[derive(Default)]
pub struct SpyTaskHandle {
    inner: InMemoryTaskHandle,
    build_calls: Mutex<Vec<String>>,
    clean_calls: Mutex<Vec<String>>,
    transitions: Mutex<Vec<(String, TaskState)>>,
}

impl SpyTaskHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build_count(&self) -> usize {
        self.build_calls.lock().unwrap().len()
    }

    pub fn clean_count(&self) -> usize {
        self.clean_calls.lock().unwrap().len()
    }

    pub fn transitions(&self) -> Vec<TaskState> {
        self.transitions
            .lock()
            .unwrap()
            .iter()
            .map(|(_, state)| *state)
            .collect()
    }
}

#[async_trait::async_trait]
impl TaskHandle for SpyTaskHandle {
    async fn build_task(&self, task_id: Option<&str>, context_id: Option<&str>) -> String {
        let id = self.inner.build_task(task_id, context_id).await;
        self.build_calls.lock().unwrap().push(id.clone());
        id
    }

    async fn update_state(
        &self,
        task_id: &str,
        state: TaskState,
        message: Option<Message>,
    ) -> RouterResult<()> {
        self.transitions
            .lock()
            .unwrap()
            .push((task_id.to_string(), state));
        self.inner.update_state(task_id, state, message).await
    }

    async fn publish(&self, task_id: &str, event: StreamEvent) -> RouterResult<()> {
        self.inner.publish(task_id, event).await
    }

    async fn subscribe(&self, task_id: &str) -> TaskSubscription {
        self.inner.subscribe(task_id).await
    }

    async fn get_task(&self, task_id: &str) -> Option<Task> {
        self.inner.get_task(task_id).await
    }

    fn clean(&self, task_id: &str) {
        self.clean_calls.lock().unwrap().push(task_id.to_string());
        self.inner.clean(task_id);
    }
}

enum Script {
    Reply(Vec<Message>),
    Fail(String),
    Stream(Vec<StreamEvent>),
    StreamPending,
    StreamSetupFail(String),
}

/// Backend with pre-seeded behavior; records the texts it was invoked with.
pub struct ScriptedBackend {
    script: Script,
    calls: Mutex<Vec<String>>,
    // Kept alive so a pending stream never closes on its own.
    held_senders: Mutex<VecDeque<mpsc::Sender<StreamEvent>>>,
}

impl ScriptedBackend {
    fn with_script(script: Script) -> Self {
        Self {
            script,
            calls: Mutex::new(Vec::new()),
            held_senders: Mutex::new(VecDeque::new()),
        }
    }

    /// Synchronous calls answer with agent messages carrying these texts.
    pub fn replying<I: IntoIterator<Item = &'static str>>(texts: I) -> Self {
        let messages = texts.into_iter().map(Message::agent_text).collect();
        Self::with_script(Script::Reply(messages))
    }

    /// Synchronous calls fail with a backend error.
    pub fn failing(message: &str) -> Self {
        Self::with_script(Script::Fail(message.to_string()))
    }

    /// Streaming calls emit these events and then close.
    pub fn streaming(events: Vec<StreamEvent>) -> Self {
        Self::with_script(Script::Stream(events))
    }

    /// Streaming calls succeed but the stream never produces or closes.
    pub fn stream_pending() -> Self {
        Self::with_script(Script::StreamPending)
    }

    /// Streaming setup fails before any event is produced.
    pub fn stream_setup_failing(message: &str) -> Self {
        Self::with_script(Script::StreamSetupFail(message.to_string()))
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl MessageBackend for ScriptedBackend {
    async fn handle_message(&self, text: &str, _context_id: &str) -> RouterResult<Vec<Message>> {
        self.calls.lock().unwrap().push(text.to_string());
        match &self.script {
            Script::Reply(messages) => Ok(messages.clone()),
            Script::Fail(message) => Err(RouterError::Backend {
                message: message.clone(),
            }),
            _ => panic!("scripted backend was not seeded for synchronous calls"),
        }
    }

    async fn handle_message_stream(
        &self,
        text: &str,
        _context_id: &str,
    ) -> RouterResult<mpsc::Receiver<StreamEvent>> {
        self.calls.lock().unwrap().push(text.to_string());
        match &self.script {
            Script::Stream(events) => {
                let (sender, receiver) = mpsc::channel(events.len().max(1));
                for event in events {
                    sender.try_send(event.clone()).unwrap();
                }
                // sender drops here, closing the stream after the last event.
                Ok(receiver)
            }
            Script::StreamPending => {
                let (sender, receiver) = mpsc::channel(1);
                self.held_senders.lock().unwrap().push_back(sender);
                Ok(receiver)
            }
            Script::StreamSetupFail(message) => Err(RouterError::Backend {
                message: message.clone(),
            }),
            _ => panic!("scripted backend was not seeded for streaming calls"),
        }
    }
}
