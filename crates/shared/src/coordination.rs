//! Coordination-store client for active-host failover state
//!
//! Each worker shard keeps a single hash field naming its active host,
//! plus a pub/sub channel (same name as the key) used to announce
//! handovers. The store is advisory: readers cache the value and
//! converge on published changes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::{mpsc, Mutex};

use crate::error::{Error, Result};

/// Buffer for subscription channels; handover announcements are rare
const SUBSCRIPTION_BUFFER: usize = 16;

/// Abstract coordination store interface for testability
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Read a hash field, `None` when the key or field is absent
    async fn get_field(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// Write a hash field
    async fn set_field(&self, key: &str, field: &str, value: &str) -> Result<()>;

    /// Announce a value on the key's channel
    async fn publish(&self, key: &str, value: &str) -> Result<()>;

    /// Subscribe to the key's channel; published values arrive on the
    /// returned receiver until the store is dropped
    async fn subscribe(&self, key: &str) -> Result<mpsc::Receiver<String>>;
}

/// Redis-backed coordination store
pub struct RedisCoordination {
    client: redis::Client,
    conn: ConnectionManager,
}

impl RedisCoordination {
    /// Connect to Redis; supports `redis://` and `rediss://` URLs
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::config(format!("Invalid Redis URL: {}", e)))?;

        let conn = ConnectionManager::new(client.clone()).await?;

        Ok(Self { client, conn })
    }
}

#[async_trait]
impl CoordinationStore for RedisCoordination {
    async fn get_field(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.hget(key, field).await?;
        Ok(value)
    }

    async fn set_field(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(key, field, value).await?;
        Ok(())
    }

    async fn publish(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn subscribe(&self, key: &str) -> Result<mpsc::Receiver<String>> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(key).await?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let channel = key.to_string();

        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::error!(channel = %channel, error = %e, "Bad coordination payload");
                        continue;
                    }
                };
                if tx.send(payload).await.is_err() {
                    // Receiver dropped; stop forwarding
                    break;
                }
            }
            tracing::warn!(channel = %channel, "Coordination subscription ended");
        });

        Ok(rx)
    }
}

/// In-memory coordination store
///
/// Used for tests and for single-instance deployments running without
/// Redis (no standby to coordinate with).
#[derive(Default)]
pub struct MemoryCoordination {
    fields: Mutex<HashMap<(String, String), String>>,
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<String>>>>,
}

impl MemoryCoordination {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl CoordinationStore for MemoryCoordination {
    async fn get_field(&self, key: &str, field: &str) -> Result<Option<String>> {
        let fields = self.fields.lock().await;
        Ok(fields.get(&(key.to_string(), field.to_string())).cloned())
    }

    async fn set_field(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut fields = self.fields.lock().await;
        fields.insert((key.to_string(), field.to_string()), value.to_string());
        Ok(())
    }

    async fn publish(&self, key: &str, value: &str) -> Result<()> {
        let mut subscribers = self.subscribers.lock().await;
        if let Some(senders) = subscribers.get_mut(key) {
            senders.retain(|tx| tx.try_send(value.to_string()).is_ok());
        }
        Ok(())
    }

    async fn subscribe(&self, key: &str) -> Result<mpsc::Receiver<String>> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let mut subscribers = self.subscribers.lock().await;
        subscribers.entry(key.to_string()).or_default().push(tx);
        Ok(rx)
    }
}
