//! Reconciliation against persisted state
//!
//! Two paths keep the in-memory registry converged with the trigger
//! documents in Postgres: a full shard scan at startup, and a notification
//! feed (`LISTEN trigger_change`, emitted by a row trigger on the table)
//! applied incrementally for the life of the process.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use shared::{DbPool, TriggerDoc, TriggerRecord};
use sqlx::postgres::PgListener;

use crate::fire::should_disable;
use crate::manager::TriggerManager;

pub const CHANGE_CHANNEL: &str = "trigger_change";

/// Consecutive listener failures tolerated before the loop bails and
/// lets process supervision restart us with a clean connection
const MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// Notification payload emitted by the `triggers` table on every
/// insert and update
#[derive(Debug, Clone, Deserialize)]
pub struct TriggerChange {
    pub id: String,
    pub worker: String,
    pub active: bool,
}

impl TriggerManager {
    /// Load and register every active trigger assigned to this worker
    /// shard. Run once at startup, after the change feed is listening, so
    /// updates arriving during the scan are not lost.
    pub async fn init_all_triggers(&self) -> shared::Result<()> {
        let docs = self.store().query_by_worker(self.worker()).await?;
        tracing::info!(
            count = docs.len(),
            worker = %self.worker(),
            "Initializing triggers for worker"
        );

        for doc in docs {
            // The change feed runs during the scan and may have gotten
            // here first
            if self.registry().contains(&doc.id) {
                continue;
            }
            self.init_trigger(doc).await;
        }
        Ok(())
    }

    /// Probe the trigger's endpoint before registering it. A permanently
    /// broken trigger (deleted on the router, bad credential) is disabled
    /// here instead of failing on its first fire.
    async fn init_trigger(&self, doc: TriggerDoc) {
        let id = doc.id.clone();
        let record = TriggerRecord::from_doc(doc);

        match self.router().probe(&record).await {
            Ok(status) if should_disable(status) => {
                tracing::warn!(trigger_id = %id, status, "Trigger failed initialization probe");
                let message = format!(
                    "Automatically disabled after receiving a {} status code on trigger initialization",
                    status
                );
                self.disable_trigger(&id, Some(status), &message).await;
            }
            Ok(_) => self.add_trigger(record).await,
            Err(e) => {
                // Transient network trouble; register and let the fire
                // path retry.
                tracing::warn!(trigger_id = %id, error = %e, "Initialization probe failed; registering anyway");
                self.add_trigger(record).await;
            }
        }
    }

    /// Fold one change notification into the registry
    pub async fn apply_change(&self, change: TriggerChange) {
        if change.worker != self.worker() {
            // Reassigned to another shard; drop it if we were serving it.
            if self.registry().contains(&change.id) {
                tracing::info!(
                    trigger_id = %change.id,
                    new_worker = %change.worker,
                    "Trigger reassigned to another worker"
                );
                self.delete_trigger(&change.id).await;
            }
            return;
        }

        if !change.active {
            self.delete_trigger(&change.id).await;
            return;
        }

        // Redundant active/active transition. Re-adding would rebuild the
        // record from the persisted document and reset the in-memory
        // quota, letting the trigger over-deliver.
        if self.registry().contains(&change.id) {
            tracing::debug!(trigger_id = %change.id, "Ignoring change for already-registered trigger");
            return;
        }

        match self.store().get(&change.id).await {
            Ok(Some(doc)) => {
                self.add_trigger(TriggerRecord::from_doc(doc)).await;
            }
            Ok(None) => {
                // Deleted between notification and read
                self.delete_trigger(&change.id).await;
            }
            Err(e) => {
                tracing::error!(trigger_id = %change.id, error = %e, "Error reading changed trigger");
            }
        }
    }
}

/// Connect and subscribe the change-feed listener.
///
/// Separate from [`run_change_feed`] so startup can establish the LISTEN
/// before scanning persisted state; changes landing during the scan then
/// arrive through the feed instead of being lost.
pub async fn connect_change_feed(pool: &DbPool) -> anyhow::Result<PgListener> {
    let mut listener = PgListener::connect_with(pool)
        .await
        .context("Failed to connect change-feed listener")?;
    listener
        .listen(CHANGE_CHANNEL)
        .await
        .context("Failed to LISTEN on change channel")?;

    tracing::info!(channel = CHANGE_CHANNEL, "Listening for trigger changes");
    Ok(listener)
}

/// Run the change feed until the listener fails persistently.
///
/// `PgListener` reconnects and re-subscribes on its own; the backoff here
/// only spaces out receive errors, and the loop gives up after
/// [`MAX_CONSECUTIVE_ERRORS`] in a row.
pub async fn run_change_feed(
    manager: Arc<TriggerManager>,
    mut listener: PgListener,
) -> anyhow::Result<()> {
    let mut consecutive_errors: u32 = 0;
    loop {
        match listener.recv().await {
            Ok(notification) => {
                consecutive_errors = 0;
                match serde_json::from_str::<TriggerChange>(notification.payload()) {
                    Ok(change) => {
                        tracing::debug!(
                            trigger_id = %change.id,
                            active = change.active,
                            "Received trigger change"
                        );
                        manager.apply_change(change).await;
                    }
                    Err(e) => {
                        tracing::error!(
                            payload = notification.payload(),
                            error = %e,
                            "Malformed change notification"
                        );
                    }
                }
            }
            Err(e) => {
                consecutive_errors += 1;
                if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    return Err(e).context("Change feed failed repeatedly; giving up");
                }
                let backoff = Duration::from_secs(2u64.pow(consecutive_errors).min(60));
                tracing::error!(
                    error = %e,
                    consecutive_errors,
                    backoff_secs = backoff.as_secs(),
                    "Change feed error; backing off"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}
