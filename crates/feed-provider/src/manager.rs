//! Trigger manager
//!
//! Owns the registry, the storage/router/adapter handles, and this
//! instance's shard identity. The fire engine (`fire.rs`) and the
//! reconciliation loop (`reconcile.rs`) are implemented as further impl
//! blocks on this struct.

use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;
use shared::{TriggerKey, TriggerRecord, TriggerStatus};

use crate::adapter::EventSource;
use crate::registry::TriggerRegistry;
use crate::router::RouterClient;
use crate::store::TriggerStore;

/// Most recent canary observations for this process, reported by the
/// health endpoint
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStatus {
    /// Name of the canary trigger currently being watched
    pub trigger_name: Option<String>,
    pub trigger_started: Option<String>,
    pub trigger_fired: Option<String>,
    pub trigger_stopped: Option<String>,
}

pub struct TriggerManager {
    registry: TriggerRegistry,
    store: Arc<dyn TriggerStore>,
    router: Arc<dyn RouterClient>,
    adapter: Arc<dyn EventSource>,
    worker: String,
    host: String,
    active_host: RwLock<String>,
    retry_attempts: u32,
    monitor_status: Mutex<MonitorStatus>,
}

impl TriggerManager {
    pub fn new(
        worker: impl Into<String>,
        host: impl Into<String>,
        retry_attempts: u32,
        store: Arc<dyn TriggerStore>,
        router: Arc<dyn RouterClient>,
        adapter: Arc<dyn EventSource>,
    ) -> Self {
        let host = host.into();
        // Default until the coordination record is read: the shard's
        // zeroth host is assumed active.
        let prefix: String = host
            .trim_end_matches(|c: char| c.is_ascii_digit())
            .to_string();

        Self {
            registry: TriggerRegistry::new(),
            store,
            router,
            adapter,
            worker: worker.into(),
            active_host: RwLock::new(format!("{}0", prefix)),
            host,
            retry_attempts,
            monitor_status: Mutex::new(MonitorStatus::default()),
        }
    }

    pub fn registry(&self) -> &TriggerRegistry {
        &self.registry
    }

    pub(crate) fn store(&self) -> &dyn TriggerStore {
        self.store.as_ref()
    }

    pub(crate) fn router(&self) -> &dyn RouterClient {
        self.router.as_ref()
    }

    pub(crate) fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    pub fn worker(&self) -> &str {
        &self.worker
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Locally cached active host for this worker shard
    pub fn active_host(&self) -> String {
        self.active_host.read().expect("active host lock poisoned").clone()
    }

    pub fn set_active_host(&self, host: &str) {
        *self.active_host.write().expect("active host lock poisoned") = host.to_string();
    }

    pub fn is_active_host(&self) -> bool {
        *self.active_host.read().expect("active host lock poisoned") == self.host
    }

    /// Monitor triggers bypass the active/standby gate so every instance
    /// keeps exercising the canary path
    pub(crate) fn should_fire(&self, trigger: &TriggerRecord) -> bool {
        trigger.doc.monitor || self.is_active_host()
    }

    /// Register a trigger and hand it to the event-source adapter. On
    /// adapter failure the entry is not retained: the trigger is disabled
    /// with the adapter's message as reason.
    pub async fn add_trigger(&self, record: TriggerRecord) {
        let id = record.id().to_string();
        self.registry.add(record.clone());

        match self.adapter.add(&id, &record).await {
            Ok(()) => {
                tracing::info!(trigger_id = %id, "Added trigger to event provider");
                if self.is_watched_monitor(record.doc.monitor, &id) {
                    self.monitor_status.lock().expect("monitor lock poisoned").trigger_started =
                        Some("success".to_string());
                }
            }
            Err(e) => {
                let message = format!(
                    "Automatically disabled after receiving exception on init trigger: {}",
                    e
                );
                tracing::error!(trigger_id = %id, error = %e, "Disabling trigger after adapter failure");
                self.disable_trigger(&id, None, &message).await;
                self.registry.remove(&id);
            }
        }
    }

    /// Persist the terminal disabled status. Removal from memory happens
    /// when the change feed delivers the resulting update; a document
    /// missing from storage is evicted from memory immediately.
    pub async fn disable_trigger(&self, id: &str, status_code: Option<u16>, message: &str) {
        match self.store.get(id).await {
            Ok(Some(mut doc)) => {
                if doc.is_active() {
                    doc.status = Some(TriggerStatus::disabled(status_code, message));
                    match self.store.upsert(id, &doc).await {
                        Ok(()) => {
                            tracing::info!(trigger_id = %id, "Trigger successfully disabled in database");
                        }
                        Err(e) => {
                            tracing::error!(trigger_id = %id, error = %e, "Error while disabling trigger in database");
                        }
                    }
                }
            }
            Ok(None) => {
                tracing::info!(trigger_id = %id, "Could not find trigger in database");
                // make sure it is removed from memory as well
                self.delete_trigger(id).await;
            }
            Err(e) => {
                tracing::error!(trigger_id = %id, error = %e, "Error fetching trigger for disable");
            }
        }
    }

    /// Drop the in-memory entry and tell the adapter to stop serving it
    pub async fn delete_trigger(&self, id: &str) {
        if let Some(record) = self.registry.remove(id) {
            self.adapter.remove(id).await;
            tracing::info!(trigger_id = %id, "Trigger successfully deleted from memory");

            if self.is_watched_monitor(record.doc.monitor, id) {
                self.monitor_status.lock().expect("monitor lock poisoned").trigger_stopped =
                    Some("success".to_string());
            }
        }
    }

    /// Start watching a canary trigger by name, resetting any previous
    /// observations.
    ///
    /// Not called inside this process: the canary driver is external
    /// deployment tooling that creates a short-lived monitor trigger
    /// through the management surface and reads the resulting
    /// started/fired/stopped markers back from `/health`.
    pub fn watch_monitor(&self, trigger_name: &str) {
        let mut status = self.monitor_status.lock().expect("monitor lock poisoned");
        *status = MonitorStatus {
            trigger_name: Some(trigger_name.to_string()),
            ..MonitorStatus::default()
        };
    }

    pub fn monitor_status(&self) -> MonitorStatus {
        self.monitor_status.lock().expect("monitor lock poisoned").clone()
    }

    pub(crate) fn note_monitor_fired(&self, monitor: bool, id: &str) {
        if self.is_watched_monitor(monitor, id) {
            self.monitor_status.lock().expect("monitor lock poisoned").trigger_fired =
                Some("success".to_string());
        }
    }

    /// Whether this id is the canary currently under observation
    fn is_watched_monitor(&self, monitor: bool, id: &str) -> bool {
        if !monitor {
            return false;
        }
        let status = self.monitor_status.lock().expect("monitor lock poisoned");
        status.trigger_name.as_deref() == Some(TriggerKey::parse(id).name.as_str())
    }
}
