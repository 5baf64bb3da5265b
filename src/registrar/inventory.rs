//! Agent inventory watch interface.
//!
//! The inventory is the declaratively-managed source of truth for which
//! agents exist. It delivers add/update/delete events over a channel, with a
//! blocking initial-sync barrier; deletes may arrive as tombstones when the
//! final state of the object is unknown to the watch source.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, RwLock};

use crate::errors::{RouterError, RouterResult};
use crate::registry::AgentKey;

/// Buffered events per watch subscriber.
const WATCH_BUFFER: usize = 64;

/// Declarative description of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    /// Backend endpoint the agent is served from.
    pub url: String,
    #[serde(default)]
    pub description: String,
    /// Per-agent credential; never shared across agents.
    #[serde(skip_serializing_if = "Option::is_none", rename = "authToken")]
    pub auth_token: Option<String>,
}

/// One inventory item.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentResource {
    pub namespace: String,
    pub name: String,
    /// Bumped by the inventory on every spec change.
    pub generation: i64,
    pub spec: AgentSpec,
}

impl AgentResource {
    pub fn key(&self) -> AgentKey {
        AgentKey::new(&self.namespace, &self.name)
    }
}

/// Payload of a delete event.
#[derive(Debug, Clone)]
pub enum DeletedObject {
    /// The final state of the object was known to the watch source.
    Resource(AgentResource),
    /// Final state unknown; only the stable `namespace/name` key survives.
    Tombstone { key: String },
}

impl DeletedObject {
    /// Resolves the agent identity, unwrapping tombstones, so downstream
    /// logic never special-cases them.
    pub fn key(&self) -> RouterResult<AgentKey> {
        match self {
            Self::Resource(resource) => Ok(resource.key()),
            Self::Tombstone { key } => AgentKey::parse(key),
        }
    }
}

/// One inventory change notification.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Added(AgentResource),
    Updated {
        old: AgentResource,
        new: AgentResource,
    },
    Deleted(DeletedObject),
}

/// Watchable agent inventory.
#[async_trait::async_trait]
pub trait AgentInventory: Send + Sync {
    /// Opens a watch. The current inventory contents are replayed as `Added`
    /// events first; live events then arrive in the order the inventory
    /// applied them.
    async fn subscribe(&self) -> mpsc::Receiver<WatchEvent>;

    /// Blocks until the inventory's initial sync completes; errors when the
    /// sync cannot succeed.
    async fn wait_for_sync(&self) -> RouterResult<()>;
}

#[derive(Debug, Clone, PartialEq)]
enum SyncState {
    Pending,
    Ready,
    Failed(String),
}

/// In-memory inventory for embedding and tests.
pub struct InMemoryInventory {
    resources: RwLock<HashMap<AgentKey, AgentResource>>,
    subscribers: RwLock<Vec<mpsc::Sender<WatchEvent>>>,
    sync: watch::Sender<SyncState>,
}

impl Default for InMemoryInventory {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryInventory {
    pub fn new() -> Self {
        let (sync, _) = watch::channel(SyncState::Pending);
        Self {
            resources: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(Vec::new()),
            sync,
        }
    }

    /// Marks the initial sync as complete, releasing `wait_for_sync` callers.
    pub fn mark_synced(&self) {
        self.sync.send_replace(SyncState::Ready);
    }

    /// Marks the initial sync as failed; `wait_for_sync` callers fail fast.
    pub fn fail_sync(&self, reason: impl Into<String>) {
        self.sync.send_replace(SyncState::Failed(reason.into()));
    }

    /// Upserts a resource, emitting `Added` or `Updated`.
    pub async fn apply(&self, resource: AgentResource) {
        let event = {
            let mut resources = self.resources.write().await;
            match resources.insert(resource.key(), resource.clone()) {
                Some(old) => WatchEvent::Updated { old, new: resource },
                None => WatchEvent::Added(resource),
            }
        };
        self.broadcast(event).await;
    }

    /// Removes a resource, emitting `Deleted` with the final state.
    pub async fn remove(&self, key: &AgentKey) {
        let removed = {
            let mut resources = self.resources.write().await;
            resources.remove(key)
        };
        if let Some(resource) = removed {
            self.broadcast(WatchEvent::Deleted(DeletedObject::Resource(resource)))
                .await;
        }
    }

    /// Removes a resource whose final state is unknown, emitting a tombstone.
    pub async fn remove_unknown(&self, key: &AgentKey) {
        {
            let mut resources = self.resources.write().await;
            resources.remove(key);
        }
        self.broadcast(WatchEvent::Deleted(DeletedObject::Tombstone {
            key: key.to_string(),
        }))
        .await;
    }

    async fn broadcast(&self, event: WatchEvent) {
        let mut subscribers = self.subscribers.write().await;
        subscribers.retain(|sender| !sender.is_closed());
        for sender in subscribers.iter() {
            if sender.send(event.clone()).await.is_err() {
                // Closed subscribers are pruned on the next broadcast.
                continue;
            }
        }
    }
}

#[async_trait::async_trait]
impl AgentInventory for InMemoryInventory {
    async fn subscribe(&self) -> mpsc::Receiver<WatchEvent> {
        let (sender, receiver) = mpsc::channel(WATCH_BUFFER);
        // Replay the current state so late subscribers start complete. The
        // resources lock is held across the replay, so no live event can
        // interleave with it.
        let resources = self.resources.read().await;
        for resource in resources.values() {
            if sender.send(WatchEvent::Added(resource.clone())).await.is_err() {
                return receiver;
            }
        }
        self.subscribers.write().await.push(sender);
        receiver
    }

    async fn wait_for_sync(&self) -> RouterResult<()> {
        let mut state = self.sync.subscribe();
        loop {
            let current = state.borrow_and_update().clone();
            match current {
                SyncState::Ready => return Ok(()),
                SyncState::Failed(reason) => return Err(RouterError::SyncFailed(reason)),
                SyncState::Pending => {
                    state.changed().await.map_err(|_| {
                        RouterError::SyncFailed("inventory dropped before initial sync".to_string())
                    })?;
                }
            }
        }
    }
}
