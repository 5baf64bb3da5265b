//! Keeps the handler registry synchronized with the agent inventory.
//!
//! The registrar subscribes to inventory watch events, builds a backend
//! client and per-agent server for every live agent, and installs or removes
//! registry entries as agents come and go. A failure while processing one
//! resource is logged and never aborts the watch loop; the registry simply
//! keeps (or lacks) its previous entry until a later event succeeds.

pub mod inventory;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::a2a::{AgentCapabilities, AgentCard};
use crate::client::BackendClient;
use crate::errors::RouterResult;
use crate::registry::{AgentKey, HandlerRegistry};

pub use inventory::{
    AgentInventory, AgentResource, AgentSpec, DeletedObject, InMemoryInventory, WatchEvent,
};

/// Drives the registry from inventory watch events.
pub struct Registrar {
    registry: Arc<HandlerRegistry>,
    inventory: Arc<dyn AgentInventory>,
}

impl Registrar {
    pub fn new(registry: Arc<HandlerRegistry>, inventory: Arc<dyn AgentInventory>) -> Self {
        Self {
            registry,
            inventory,
        }
    }

    /// Subscribes to the inventory, blocks until its initial sync completes
    /// (failing fast when it cannot), then processes events until `shutdown`
    /// fires or the watch closes.
    pub async fn run(&self, shutdown: CancellationToken) -> RouterResult<()> {
        let mut events = self.inventory.subscribe().await;
        self.inventory.wait_for_sync().await?;
        tracing::info!("agent inventory synced, watching for changes");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("registrar shutting down");
                    return Ok(());
                }
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        tracing::warn!("inventory watch closed");
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn handle_event(&self, event: WatchEvent) {
        match event {
            WatchEvent::Added(resource) => self.upsert(resource).await,
            WatchEvent::Updated { old, new } => {
                // Diff by generation and spec content to avoid useless churn.
                if old.generation == new.generation && old.spec == new.spec {
                    tracing::debug!(agent = %new.key(), "agent unchanged, keeping handler");
                    return;
                }
                self.upsert(new).await;
            }
            WatchEvent::Deleted(object) => match object.key() {
                Ok(key) => {
                    self.registry.remove_handler(&key).await;
                    tracing::info!(agent = %key, "agent handler removed");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "could not resolve deleted agent, skipping");
                }
            },
        }
    }

    async fn upsert(&self, resource: AgentResource) {
        let key = resource.key();
        match self.try_upsert(&key, &resource).await {
            Ok(()) => {
                tracing::info!(agent = %key, endpoint = %resource.spec.url, "agent handler registered");
            }
            Err(e) => {
                // Per-resource failure: previous handler (if any) stays.
                tracing::error!(agent = %key, error = %e, "failed to register agent handler");
            }
        }
    }

    async fn try_upsert(&self, key: &AgentKey, resource: &AgentResource) -> RouterResult<()> {
        let client = BackendClient::from_spec(&resource.spec)?;

        let card = AgentCard {
            name: key.to_string(),
            description: resource.spec.description.clone(),
            url: resource.spec.url.clone(),
            version: String::new(),
            capabilities: AgentCapabilities {
                streaming: Some(true),
                push_notifications: Some(false),
            },
        };

        self.registry.set_handler(key, Arc::new(client), &card).await
    }
}
