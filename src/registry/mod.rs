//! Concurrent directory of agent request handlers plus request dispatch.
//!
//! The registry's map is the only shared mutable state in the router core.
//! The reader-writer lock is scoped tightly to the map operation itself:
//! dispatch clones the handler `Arc` under a read guard and executes the
//! request after the guard is dropped, so a long-lived streaming session
//! never blocks registrations or other dispatches.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tokio::sync::RwLock;

use crate::a2a::AgentCard;
use crate::errors::{RouterError, RouterResult};
use crate::processor::MessageBackend;
use crate::server::{AgentServer, AuthExtractor};
use crate::tasks::TaskHandle;

/// Composite (namespace, name) agent identity.
///
/// The stable string form `namespace/name` is what appears in request paths
/// and tombstone keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AgentKey {
    pub namespace: String,
    pub name: String,
}

impl AgentKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parses the stable `namespace/name` form.
    pub fn parse(value: &str) -> RouterResult<Self> {
        match value.split_once('/') {
            Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => {
                Ok(Self::new(namespace, name))
            }
            _ => Err(RouterError::InvalidParams(format!(
                "malformed agent key: {value:?}"
            ))),
        }
    }
}

impl fmt::Display for AgentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Capability interface every per-agent server implements.
///
/// The registry stores only abstract references, so new transports plug in
/// without touching the registry.
#[async_trait::async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handles one protocol request end to end, streaming included.
    async fn handle_request(&self, request: Request) -> Response;
}

/// Thread-safe map from agent identity to request handler.
pub struct HandlerRegistry {
    base_path: String,
    auth: Arc<dyn AuthExtractor>,
    tasks: Arc<dyn TaskHandle>,
    handlers: RwLock<HashMap<AgentKey, Arc<dyn RequestHandler>>>,
}

impl HandlerRegistry {
    /// Creates a registry dispatching under `base_path` (for example
    /// `/api/a2a`). The authenticator and task handle are shared by every
    /// per-agent server the registry constructs.
    pub fn new(
        base_path: impl Into<String>,
        auth: Arc<dyn AuthExtractor>,
        tasks: Arc<dyn TaskHandle>,
    ) -> Self {
        let mut base_path = base_path.into();
        while base_path.ends_with('/') {
            base_path.pop();
        }
        Self {
            base_path,
            auth,
            tasks,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Constructs a per-agent server for `backend` described by `card` and
    /// installs it under `key`, atomically replacing any previous entry.
    ///
    /// Replacement never errors; only handler construction can fail (for
    /// example a malformed descriptor), in which case the previous entry is
    /// left untouched.
    pub async fn set_handler(
        &self,
        key: &AgentKey,
        backend: Arc<dyn MessageBackend>,
        card: &AgentCard,
    ) -> RouterResult<()> {
        // Construction happens outside the lock.
        let server = AgentServer::new(backend, self.tasks.clone(), card.clone(), self.auth.clone())
            .map_err(|e| RouterError::HandlerConstruction {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        self.register(key, Arc::new(server)).await;
        Ok(())
    }

    /// Installs a pre-built handler under `key`.
    pub async fn register(&self, key: &AgentKey, handler: Arc<dyn RequestHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.insert(key.clone(), handler);
    }

    /// Removes the handler for `key`; a no-op when absent.
    pub async fn remove_handler(&self, key: &AgentKey) {
        let mut handlers = self.handlers.write().await;
        handlers.remove(key);
    }

    /// Returns the handler currently installed for `key`.
    pub async fn handler(&self, key: &AgentKey) -> Option<Arc<dyn RequestHandler>> {
        let handlers = self.handlers.read().await;
        handlers.get(key).cloned()
    }

    /// Number of registered agents.
    pub async fn len(&self) -> usize {
        self.handlers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.handlers.read().await.is_empty()
    }

    /// Routes one inbound request to the agent addressed by its path.
    ///
    /// The path layout is `<base_path>/<namespace>/<name>/<rest>`; everything
    /// after the name segment belongs to the per-agent handler.
    pub async fn dispatch(&self, request: Request) -> Response {
        let path = request.uri().path();
        let Some(rest) = path.strip_prefix(self.base_path.as_str()) else {
            // Not under our prefix: never interpret foreign paths as agents.
            return StatusCode::NOT_FOUND.into_response();
        };
        if !rest.is_empty() && !rest.starts_with('/') {
            // Prefix match must end on a segment boundary.
            return StatusCode::NOT_FOUND.into_response();
        }

        let mut segments = rest.split('/').filter(|segment| !segment.is_empty());
        let Some(namespace) = segments.next() else {
            return RouterError::NamespaceMissing.into_response();
        };
        let Some(name) = segments.next() else {
            return RouterError::NameMissing.into_response();
        };
        let key = AgentKey::new(namespace, name);

        let handler = {
            let handlers = self.handlers.read().await;
            handlers.get(&key).cloned()
        };
        // The read guard is gone: request handling never holds the lock.
        match handler {
            Some(handler) => handler.handle_request(request).await,
            None => RouterError::AgentNotFound {
                key: key.to_string(),
            }
            .into_response(),
        }
    }
}
