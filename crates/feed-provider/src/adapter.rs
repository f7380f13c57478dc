//! Event-source adapter contract
//!
//! Adapters translate a specific upstream feed (webhook, polling source,
//! message bus) into normalized trigger events. One adapter is selected by
//! configuration at startup and lives for the whole process. Events flow
//! back into the core exclusively through the [`SourceHandle`] the adapter
//! is constructed with; the manager drains the paired receiver.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use shared::TriggerRecord;
use tokio::sync::mpsc;

use crate::error::AdapterError;
use crate::manager::TriggerManager;

/// Buffer for adapter-to-core events
const SOURCE_EVENT_BUFFER: usize = 256;

/// Events an adapter pushes into the core
#[derive(Debug)]
pub enum SourceEvent {
    /// The upstream source produced an event for a registered trigger
    Fire { id: String, event: Value },
    /// The upstream source reports the trigger as permanently broken
    Disable {
        id: String,
        status_code: Option<u16>,
        message: String,
    },
}

/// Clonable sender an adapter uses to call back into the core
#[derive(Clone)]
pub struct SourceHandle {
    tx: mpsc::Sender<SourceEvent>,
}

impl SourceHandle {
    /// Create a handle and the receiver the manager will drain
    pub fn channel() -> (Self, mpsc::Receiver<SourceEvent>) {
        let (tx, rx) = mpsc::channel(SOURCE_EVENT_BUFFER);
        (Self { tx }, rx)
    }

    pub async fn fire_trigger(&self, id: impl Into<String>, event: Value) {
        let id = id.into();
        if self
            .tx
            .send(SourceEvent::Fire { id: id.clone(), event })
            .await
            .is_err()
        {
            tracing::error!(trigger_id = %id, "Core event loop gone; dropping fire event");
        }
    }

    pub async fn disable_trigger(
        &self,
        id: impl Into<String>,
        status_code: Option<u16>,
        message: impl Into<String>,
    ) {
        let id = id.into();
        if self
            .tx
            .send(SourceEvent::Disable {
                id: id.clone(),
                status_code,
                message: message.into(),
            })
            .await
            .is_err()
        {
            tracing::error!(trigger_id = %id, "Core event loop gone; dropping disable event");
        }
    }
}

/// Capability contract every event-source adapter implements
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Validate and normalize raw feed parameters from a management call
    async fn validate(&self, params: &Value) -> Result<Value, AdapterError>;

    /// Start serving events for a trigger; failure disables the trigger
    async fn add(&self, id: &str, trigger: &TriggerRecord) -> Result<(), AdapterError>;

    /// Best-effort cleanup when a trigger leaves the registry
    async fn remove(&self, id: &str);
}

/// Adapter that accepts every trigger and never produces events.
///
/// Used by integration tests and as a deployment smoke-test feed.
#[derive(Default)]
pub struct NoopSource;

#[async_trait]
impl EventSource for NoopSource {
    async fn validate(&self, params: &Value) -> Result<Value, AdapterError> {
        Ok(params.clone())
    }

    async fn add(&self, id: &str, _trigger: &TriggerRecord) -> Result<(), AdapterError> {
        tracing::debug!(trigger_id = %id, "noop adapter accepted trigger");
        Ok(())
    }

    async fn remove(&self, id: &str) {
        tracing::debug!(trigger_id = %id, "noop adapter removed trigger");
    }
}

/// Resolve the configured adapter, once, at process start
pub fn build_event_source(
    kind: &str,
    _handle: SourceHandle,
) -> shared::Result<Arc<dyn EventSource>> {
    match kind {
        "noop" => Ok(Arc::new(NoopSource)),
        other => Err(shared::Error::config(format!(
            "Unknown event provider: {}",
            other
        ))),
    }
}

/// Drain adapter events into the manager for the life of the process
pub async fn run_source_events(
    manager: Arc<TriggerManager>,
    mut rx: mpsc::Receiver<SourceEvent>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            SourceEvent::Fire { id, event } => {
                let outcome = manager.fire_trigger(&id, &event).await;
                tracing::debug!(trigger_id = %id, outcome = ?outcome, "Source fire handled");
            }
            SourceEvent::Disable {
                id,
                status_code,
                message,
            } => {
                manager.disable_trigger(&id, status_code, &message).await;
            }
        }
    }
    tracing::warn!("Source event channel closed");
}
