//! In-memory trigger registry
//!
//! The authoritative view of live triggers for this worker shard. Entries
//! are a rebuildable cache over the persisted documents; the registry never
//! touches storage. Quota bookkeeping (`debit`/`credit`) lives here so the
//! fire engine never holds a map guard across an await point.

use dashmap::DashMap;
use shared::TriggerRecord;

#[derive(Default)]
pub struct TriggerRegistry {
    triggers: DashMap<String, TriggerRecord>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent upsert: a second add for the same id overwrites
    pub fn add(&self, record: TriggerRecord) {
        self.triggers.insert(record.id().to_string(), record);
    }

    /// Remove an entry, returning it; a no-op on an absent id
    pub fn remove(&self, id: &str) -> Option<TriggerRecord> {
        self.triggers.remove(id).map(|(_, record)| record)
    }

    /// Snapshot of an entry
    pub fn get(&self, id: &str) -> Option<TriggerRecord> {
        self.triggers.get(id).map(|entry| entry.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.triggers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// Optimistically consume one fire from a finite quota, returning the
    /// remaining count. Unlimited triggers are left untouched. `None` when
    /// the trigger is no longer registered.
    pub fn debit(&self, id: &str) -> Option<i64> {
        let mut entry = self.triggers.get_mut(id)?;
        if !entry.unlimited() {
            entry.triggers_left -= 1;
        }
        Some(entry.triggers_left)
    }

    /// Restore a consumed fire after a failed delivery. A no-op for
    /// unlimited quotas and for entries deleted while the fire was in
    /// flight (a completing fire never resurrects a deleted trigger).
    pub fn credit(&self, id: &str) {
        if let Some(mut entry) = self.triggers.get_mut(id) {
            if !entry.unlimited() {
                entry.triggers_left += 1;
            }
        }
    }
}
