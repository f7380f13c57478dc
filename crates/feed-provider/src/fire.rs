//! Fire engine
//!
//! Delivery of one event to the router, with quota accounting, status
//! classification, and bounded retries. The quota debit happens before the
//! request goes out and is credited back on any non-success outcome, so a
//! trigger's remaining count only ever drops on an accepted delivery.

use std::time::Duration;

use serde_json::Value;

use crate::manager::TriggerManager;

/// Back-pressure pause when the very first attempt is throttled
const THROTTLE_DELAY: Duration = Duration::from_millis(60_000);

/// Terminal result of one fire request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    /// The router accepted the event
    Fired { status: u16 },
    /// The router rejected the trigger permanently; it has been disabled
    Disabled { status: u16 },
    /// All attempts failed with transient errors
    RetriesExhausted,
    /// This instance is the standby for the shard
    Skipped,
    /// The trigger is not (or no longer) in the registry
    NotRegistered,
}

/// 4xx responses mean the trigger itself is broken and firing again is
/// pointless, except for timeout (408), conflict (409) and throttling
/// (429), which are worth retrying.
pub(crate) fn should_disable(status: u16) -> bool {
    (400..500).contains(&status) && !matches!(status, 408 | 409 | 429)
}

/// Quadratic backoff, with a long flat pause when the first attempt was
/// throttled by the router
pub(crate) fn retry_delay(attempt: u32, throttled: bool) -> Duration {
    if attempt == 0 && throttled {
        THROTTLE_DELAY
    } else {
        Duration::from_millis(1000 * (u64::from(attempt) + 1).pow(2))
    }
}

impl TriggerManager {
    /// Deliver one event for a registered trigger.
    ///
    /// Retries transient failures up to the configured attempt count. A
    /// disabling status persists the terminal state; quota exhaustion on a
    /// successful fire disables (or, for canary triggers, deletes) the
    /// trigger after the event is accepted.
    pub async fn fire_trigger(&self, id: &str, event: &Value) -> FireOutcome {
        let Some(trigger) = self.registry().get(id) else {
            tracing::debug!(trigger_id = %id, "Ignoring fire for unregistered trigger");
            return FireOutcome::NotRegistered;
        };

        if !self.should_fire(&trigger) {
            tracing::debug!(
                trigger_id = %id,
                active_host = %self.active_host(),
                "Not the active host; skipping fire"
            );
            return FireOutcome::Skipped;
        }

        // A document can arrive with its quota already spent; resolve with
        // no effect instead of letting the count go negative. Disablement
        // happens only on the success path, when a delivery drains the
        // quota to zero.
        if !trigger.has_triggers_remaining() {
            tracing::warn!(trigger_id = %id, "Fire request for trigger with no quota remaining");
            return FireOutcome::Skipped;
        }

        let mut attempt: u32 = 0;
        loop {
            // The entry can disappear between attempts when a delete races
            // an in-flight fire; that fire just stops.
            let Some(remaining) = self.registry().debit(id) else {
                tracing::debug!(trigger_id = %id, "Trigger deleted while firing");
                return FireOutcome::NotRegistered;
            };

            let status = match self.router().fire(&trigger, event).await {
                Ok(status) => Some(status),
                Err(e) => {
                    tracing::warn!(trigger_id = %id, error = %e, "Network error firing trigger");
                    None
                }
            };

            match status {
                Some(s) if s < 400 => {
                    tracing::info!(trigger_id = %id, status = s, "Fired trigger");
                    self.note_monitor_fired(trigger.doc.monitor, id);

                    if remaining == 0 {
                        tracing::warn!(trigger_id = %id, "No fires remaining for trigger");
                        if trigger.doc.monitor {
                            self.delete_trigger(id).await;
                        } else {
                            self.disable_trigger(
                                id,
                                None,
                                "Automatically disabled after reaching max triggers",
                            )
                            .await;
                        }
                    }
                    return FireOutcome::Fired { status: s };
                }
                Some(s) if should_disable(s) => {
                    self.registry().credit(id);
                    let message = format!(
                        "Automatically disabled after receiving a {} status code when firing the trigger",
                        s
                    );
                    self.disable_trigger(id, Some(s), &message).await;
                    return FireOutcome::Disabled { status: s };
                }
                _ => {
                    self.registry().credit(id);
                    if attempt >= self.retry_attempts() {
                        tracing::error!(
                            trigger_id = %id,
                            attempts = attempt + 1,
                            "Gave up firing trigger after transient failures"
                        );
                        return FireOutcome::RetriesExhausted;
                    }
                    let delay = retry_delay(attempt, status == Some(429));
                    tracing::debug!(
                        trigger_id = %id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying trigger fire"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::json;
    use shared::{Result, TriggerDoc, TriggerRecord};

    use crate::adapter::NoopSource;
    use crate::error::RouterError;
    use crate::router::RouterClient;
    use crate::store::TriggerStore;

    #[test]
    fn test_should_disable_classification() {
        assert!(should_disable(400));
        assert!(should_disable(401));
        assert!(should_disable(404));
        assert!(should_disable(410));

        assert!(!should_disable(408));
        assert!(!should_disable(409));
        assert!(!should_disable(429));
        assert!(!should_disable(200));
        assert!(!should_disable(500));
        assert!(!should_disable(503));
    }

    #[test]
    fn test_retry_delay_progression() {
        assert_eq!(retry_delay(0, false), Duration::from_millis(1000));
        assert_eq!(retry_delay(1, false), Duration::from_millis(4000));
        assert_eq!(retry_delay(2, false), Duration::from_millis(9000));

        // throttled first attempt gets the long pause, later ones do not
        assert_eq!(retry_delay(0, true), Duration::from_millis(60_000));
        assert_eq!(retry_delay(1, true), Duration::from_millis(4000));
    }

    /// Router stub that replays a scripted response sequence
    struct ScriptedRouter {
        responses: Mutex<VecDeque<std::result::Result<u16, RouterError>>>,
    }

    impl ScriptedRouter {
        fn new(responses: Vec<std::result::Result<u16, RouterError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
            }
        }
    }

    #[async_trait]
    impl RouterClient for ScriptedRouter {
        async fn fire(
            &self,
            _trigger: &TriggerRecord,
            _event: &serde_json::Value,
        ) -> std::result::Result<u16, RouterError> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(200))
        }

        async fn probe(
            &self,
            _trigger: &TriggerRecord,
        ) -> std::result::Result<u16, RouterError> {
            Ok(200)
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        docs: Mutex<HashMap<String, TriggerDoc>>,
    }

    #[async_trait]
    impl TriggerStore for MemoryStore {
        async fn get(&self, id: &str) -> Result<Option<TriggerDoc>> {
            Ok(self.docs.lock().unwrap().get(id).cloned())
        }

        async fn upsert(&self, id: &str, doc: &TriggerDoc) -> Result<()> {
            self.docs
                .lock()
                .unwrap()
                .insert(id.to_string(), doc.clone());
            Ok(())
        }

        async fn query_by_worker(&self, worker: &str) -> Result<Vec<TriggerDoc>> {
            Ok(self
                .docs
                .lock()
                .unwrap()
                .values()
                .filter(|d| d.worker() == worker && d.is_active())
                .cloned()
                .collect())
        }
    }

    fn doc(id: &str, max_triggers: i64, monitor: bool) -> TriggerDoc {
        serde_json::from_value(json!({
            "id": id,
            "apikey": "uuid:key",
            "maxTriggers": max_triggers,
            "monitor": monitor,
            "worker": "worker0"
        }))
        .unwrap()
    }

    fn manager_with(
        responses: Vec<std::result::Result<u16, RouterError>>,
        retry_attempts: u32,
    ) -> (TriggerManager, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::default());
        let manager = TriggerManager::new(
            "worker0",
            "host0",
            retry_attempts,
            store.clone(),
            Arc::new(ScriptedRouter::new(responses)),
            Arc::new(NoopSource),
        );
        (manager, store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_fire_decrements_quota_once() {
        let (manager, _store) = manager_with(vec![Ok(429), Ok(200)], 10);
        manager
            .registry()
            .add(TriggerRecord::from_doc(doc(":guest:t1", 5, false)));

        let outcome = manager.fire_trigger(":guest:t1", &json!({"n": 1})).await;

        assert_eq!(outcome, FireOutcome::Fired { status: 200 });
        assert_eq!(manager.registry().get(":guest:t1").unwrap().triggers_left, 4);
    }

    #[tokio::test]
    async fn test_disabling_status_credits_quota_and_persists() {
        let (manager, store) = manager_with(vec![Ok(404)], 10);
        store
            .upsert(":guest:t1", &doc(":guest:t1", 5, false))
            .await
            .unwrap();
        manager
            .registry()
            .add(TriggerRecord::from_doc(doc(":guest:t1", 5, false)));

        let outcome = manager.fire_trigger(":guest:t1", &json!({})).await;

        assert_eq!(outcome, FireOutcome::Disabled { status: 404 });
        // quota untouched and entry still registered; the change feed will
        // evict it once the disabled document comes back around
        assert_eq!(manager.registry().get(":guest:t1").unwrap().triggers_left, 5);

        let stored = store.get(":guest:t1").await.unwrap().unwrap();
        assert!(!stored.is_active());
        let reason = stored.status.unwrap().reason.unwrap();
        assert_eq!(reason.status_code, Some(404));
        assert_eq!(
            reason.message,
            "Automatically disabled after receiving a 404 status code when firing the trigger"
        );
    }

    #[tokio::test]
    async fn test_quota_exhaustion_disables_trigger() {
        let (manager, store) = manager_with(vec![Ok(200)], 10);
        store
            .upsert(":guest:t1", &doc(":guest:t1", 1, false))
            .await
            .unwrap();
        manager
            .registry()
            .add(TriggerRecord::from_doc(doc(":guest:t1", 1, false)));

        let outcome = manager.fire_trigger(":guest:t1", &json!({})).await;

        assert_eq!(outcome, FireOutcome::Fired { status: 200 });
        let stored = store.get(":guest:t1").await.unwrap().unwrap();
        assert!(!stored.is_active());
        assert_eq!(
            stored.status.unwrap().reason.unwrap().message,
            "Automatically disabled after reaching max triggers"
        );
    }

    #[tokio::test]
    async fn test_exhausted_monitor_trigger_is_deleted() {
        let (manager, _store) = manager_with(vec![Ok(200)], 10);
        manager.watch_monitor("canary");
        manager
            .registry()
            .add(TriggerRecord::from_doc(doc(":guest:canary", 1, true)));

        let outcome = manager.fire_trigger(":guest:canary", &json!({})).await;

        assert_eq!(outcome, FireOutcome::Fired { status: 200 });
        assert!(manager.registry().is_empty());

        let status = manager.monitor_status();
        assert_eq!(status.trigger_fired.as_deref(), Some("success"));
        assert_eq!(status.trigger_stopped.as_deref(), Some("success"));
    }

    #[tokio::test]
    async fn test_standby_host_does_not_fire() {
        let (manager, _store) = manager_with(vec![], 10);
        manager.set_active_host("host1");
        manager
            .registry()
            .add(TriggerRecord::from_doc(doc(":guest:t1", 5, false)));

        let outcome = manager.fire_trigger(":guest:t1", &json!({})).await;

        assert_eq!(outcome, FireOutcome::Skipped);
        assert_eq!(manager.registry().get(":guest:t1").unwrap().triggers_left, 5);
    }

    #[tokio::test]
    async fn test_monitor_trigger_fires_on_standby_host() {
        let (manager, _store) = manager_with(vec![Ok(200)], 10);
        manager.set_active_host("host1");
        manager
            .registry()
            .add(TriggerRecord::from_doc(doc(":guest:canary", -1, true)));

        let outcome = manager.fire_trigger(":guest:canary", &json!({})).await;
        assert_eq!(outcome, FireOutcome::Fired { status: 200 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_exhaust_retries() {
        let responses = vec![
            Err(RouterError::Network("connection refused".into())),
            Ok(503),
            Err(RouterError::Network("connection reset".into())),
        ];
        let (manager, _store) = manager_with(responses, 2);
        manager
            .registry()
            .add(TriggerRecord::from_doc(doc(":guest:t1", 5, false)));

        let outcome = manager.fire_trigger(":guest:t1", &json!({})).await;

        assert_eq!(outcome, FireOutcome::RetriesExhausted);
        assert_eq!(manager.registry().get(":guest:t1").unwrap().triggers_left, 5);
    }

    #[tokio::test]
    async fn test_spent_quota_on_arrival_is_a_noop() {
        let (manager, store) = manager_with(vec![], 10);
        let spent: TriggerDoc = serde_json::from_value(json!({
            "id": ":guest:t1",
            "apikey": "uuid:key",
            "maxTriggers": 3,
            "triggersLeft": 0,
            "worker": "worker0"
        }))
        .unwrap();
        store.upsert(":guest:t1", &spent).await.unwrap();
        manager.registry().add(TriggerRecord::from_doc(spent));

        let outcome = manager.fire_trigger(":guest:t1", &json!({})).await;

        // precondition short-circuits: nothing fired, nothing persisted,
        // nothing evicted
        assert_eq!(outcome, FireOutcome::Skipped);
        assert!(store.get(":guest:t1").await.unwrap().unwrap().is_active());
        assert_eq!(manager.registry().get(":guest:t1").unwrap().triggers_left, 0);
    }

    #[tokio::test]
    async fn test_unregistered_trigger_is_ignored() {
        let (manager, _store) = manager_with(vec![], 10);
        let outcome = manager.fire_trigger(":guest:ghost", &json!({})).await;
        assert_eq!(outcome, FireOutcome::NotRegistered);
    }
}
