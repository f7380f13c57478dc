//! Active/standby failover per worker shard
//!
//! Two provider instances (`host0`/`host1`) share a worker shard; only the
//! active one fires. The coordination store holds the shard's `activeHost`
//! field, and role changes are announced on a pub/sub channel named after
//! the shard key. Subscription happens before the initial read so an
//! announcement landing in between is not lost.

use std::sync::Arc;

use shared::{CoordinationStore, Result};

use crate::manager::TriggerManager;

const ACTIVE_HOST_FIELD: &str = "activeHost";

/// The other instance of a host pair: `host0` for `host1` and vice versa
pub fn sibling_host(host: &str) -> String {
    let prefix = host.trim_end_matches(|c: char| c.is_ascii_digit());
    if host.ends_with('0') {
        format!("{}1", prefix)
    } else {
        format!("{}0", prefix)
    }
}

pub struct FailoverCoordinator {
    store: Arc<dyn CoordinationStore>,
    shard_key: String,
}

impl FailoverCoordinator {
    pub fn new(store: Arc<dyn CoordinationStore>, shard_key: impl Into<String>) -> Self {
        Self {
            store,
            shard_key: shard_key.into(),
        }
    }

    /// Resolve the shard's active host and keep the manager's cached copy
    /// converged on announcements.
    ///
    /// A shard with no coordination record yet is claimed by whichever
    /// instance reads it first.
    pub async fn start(&self, manager: Arc<TriggerManager>) -> Result<()> {
        let mut rx = self.store.subscribe(&self.shard_key).await?;

        match self
            .store
            .get_field(&self.shard_key, ACTIVE_HOST_FIELD)
            .await?
        {
            Some(host) => {
                tracing::info!(shard = %self.shard_key, active_host = %host, "Adopted recorded active host");
                manager.set_active_host(&host);
            }
            None => {
                self.store
                    .set_field(&self.shard_key, ACTIVE_HOST_FIELD, manager.host())
                    .await?;
                tracing::info!(shard = %self.shard_key, host = %manager.host(), "Claimed active role for shard");
                manager.set_active_host(manager.host());
            }
        }

        let shard_key = self.shard_key.clone();
        tokio::spawn(async move {
            while let Some(host) = rx.recv().await {
                if host != manager.active_host() {
                    tracing::info!(shard = %shard_key, active_host = %host, "Active host changed");
                    manager.set_active_host(&host);
                }
            }
            tracing::warn!(shard = %shard_key, "Active-host subscription ended");
        });

        Ok(())
    }

    /// Hand the active role to the sibling instance on graceful shutdown.
    /// A standby shutting down leaves the record alone.
    pub async fn handover(&self, manager: &TriggerManager) -> Result<()> {
        if !manager.is_active_host() {
            return Ok(());
        }

        let sibling = sibling_host(manager.host());
        tracing::info!(shard = %self.shard_key, sibling = %sibling, "Handing active role to sibling host");

        self.store
            .set_field(&self.shard_key, ACTIVE_HOST_FIELD, &sibling)
            .await?;
        self.store.publish(&self.shard_key, &sibling).await?;
        Ok(())
    }
}
