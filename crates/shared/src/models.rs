//! Trigger document and status models
//!
//! The persisted trigger document (`TriggerDoc`) is the durable source of
//! truth; the registry entry (`TriggerRecord`) is a derived, rebuildable
//! cache with the remaining-fire quota resolved to a concrete count.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel for an unlimited fire quota
pub const UNLIMITED_TRIGGERS: i64 = -1;

/// Shard assigned to documents that predate explicit worker assignment
pub const DEFAULT_WORKER: &str = "worker0";

const DEFAULT_NAMESPACE: &str = "_";
const QNAME_SEPARATOR: char = ':';

/// Qualified trigger name: namespace + name, stored as `:{namespace}:{name}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TriggerKey {
    pub namespace: String,
    pub name: String,
}

impl TriggerKey {
    /// Parse a qualified name. A bare name (no leading separator) falls
    /// into the default namespace.
    pub fn parse(qname: &str) -> Self {
        if qname.starts_with(QNAME_SEPARATOR) {
            let mut parts = qname.splitn(3, QNAME_SEPARATOR);
            parts.next(); // leading empty segment
            let namespace = parts.next().unwrap_or(DEFAULT_NAMESPACE).to_string();
            let name = parts.next().unwrap_or("").to_string();
            Self { namespace, name }
        } else {
            Self {
                namespace: DEFAULT_NAMESPACE.to_string(),
                name: qname.to_string(),
            }
        }
    }
}

impl std::fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, ":{}:{}", self.namespace, self.name)
    }
}

/// Cause recorded when a trigger is disabled automatically
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReasonKind {
    #[serde(rename = "AUTO")]
    Auto,
}

/// Disablement reason attached to a terminal status
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReason {
    pub kind: ReasonKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub message: String,
}

/// Trigger lifecycle status. Once persisted inactive with a reason, the
/// trigger never reactivates itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerStatus {
    pub active: bool,
    pub date_changed: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<StatusReason>,
}

impl TriggerStatus {
    /// Build the terminal disabled status with an AUTO reason
    pub fn disabled(status_code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            active: false,
            date_changed: Utc::now(),
            reason: Some(StatusReason {
                kind: ReasonKind::Auto,
                status_code,
                message: message.into(),
            }),
        }
    }
}

/// Persisted trigger document (stored as JSONB)
///
/// Provider-specific configuration validated by the event-source adapter
/// is carried in the flattened `extra` map and never interpreted here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerDoc {
    pub id: String,

    /// Opaque `uuid:key` credential used to sign fire/probe requests
    #[serde(rename = "apikey")]
    pub credential: String,

    #[serde(default = "unlimited")]
    pub max_triggers: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggers_left: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TriggerStatus>,

    /// Shard assignment, fixed at creation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,

    /// Synthetic canary trigger, exempt from active/standby gating
    #[serde(default)]
    pub monitor: bool,

    /// Adapter-owned fields (`additionalData` and friends)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn unlimited() -> i64 {
    UNLIMITED_TRIGGERS
}

impl TriggerDoc {
    /// A document with no status, or an active status, is live
    pub fn is_active(&self) -> bool {
        self.status.as_ref().map(|s| s.active).unwrap_or(true)
    }

    pub fn worker(&self) -> &str {
        self.worker.as_deref().unwrap_or(DEFAULT_WORKER)
    }

    pub fn key(&self) -> TriggerKey {
        TriggerKey::parse(&self.id)
    }
}

/// In-memory registry entry with the fire quota resolved
#[derive(Debug, Clone)]
pub struct TriggerRecord {
    pub doc: TriggerDoc,
    pub triggers_left: i64,
}

impl TriggerRecord {
    /// Build the live record, deriving `triggers_left` from `max_triggers`
    /// when the persisted document does not carry one
    pub fn from_doc(doc: TriggerDoc) -> Self {
        let triggers_left = doc.triggers_left.unwrap_or(doc.max_triggers);
        Self { doc, triggers_left }
    }

    pub fn id(&self) -> &str {
        &self.doc.id
    }

    pub fn key(&self) -> TriggerKey {
        self.doc.key()
    }

    pub fn unlimited(&self) -> bool {
        self.doc.max_triggers == UNLIMITED_TRIGGERS
    }

    pub fn has_triggers_remaining(&self) -> bool {
        self.unlimited() || self.triggers_left > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_qualified_name() {
        let key = TriggerKey::parse(":guest:my-trigger");
        assert_eq!(key.namespace, "guest");
        assert_eq!(key.name, "my-trigger");
        assert_eq!(key.to_string(), ":guest:my-trigger");
    }

    #[test]
    fn test_parse_bare_name_uses_default_namespace() {
        let key = TriggerKey::parse("my-trigger");
        assert_eq!(key.namespace, "_");
        assert_eq!(key.name, "my-trigger");
    }

    #[test]
    fn test_parse_name_containing_separator() {
        let key = TriggerKey::parse(":ns:pkg:trigger");
        assert_eq!(key.namespace, "ns");
        assert_eq!(key.name, "pkg:trigger");
    }

    #[test]
    fn test_record_derives_quota_from_max() {
        let doc: TriggerDoc = serde_json::from_value(json!({
            "id": ":guest:t1",
            "apikey": "uuid:key",
            "maxTriggers": 5
        }))
        .unwrap();

        let record = TriggerRecord::from_doc(doc);
        assert_eq!(record.triggers_left, 5);
        assert!(record.has_triggers_remaining());
    }

    #[test]
    fn test_record_keeps_persisted_quota() {
        let doc: TriggerDoc = serde_json::from_value(json!({
            "id": ":guest:t1",
            "apikey": "uuid:key",
            "maxTriggers": 5,
            "triggersLeft": 2
        }))
        .unwrap();

        let record = TriggerRecord::from_doc(doc);
        assert_eq!(record.triggers_left, 2);
    }

    #[test]
    fn test_unlimited_always_has_triggers_remaining() {
        let doc: TriggerDoc = serde_json::from_value(json!({
            "id": ":guest:t1",
            "apikey": "uuid:key"
        }))
        .unwrap();

        let mut record = TriggerRecord::from_doc(doc);
        assert_eq!(record.doc.max_triggers, UNLIMITED_TRIGGERS);
        record.triggers_left = -5;
        assert!(record.has_triggers_remaining());
    }

    #[test]
    fn test_doc_without_status_is_active() {
        let doc: TriggerDoc = serde_json::from_value(json!({
            "id": ":guest:t1",
            "apikey": "uuid:key"
        }))
        .unwrap();

        assert!(doc.is_active());
        assert_eq!(doc.worker(), "worker0");
    }

    #[test]
    fn test_disabled_status_serialization() {
        let status = TriggerStatus::disabled(Some(410), "gone");
        let value = serde_json::to_value(&status).unwrap();

        assert_eq!(value["active"], json!(false));
        assert_eq!(value["reason"]["kind"], json!("AUTO"));
        assert_eq!(value["reason"]["statusCode"], json!(410));
        assert_eq!(value["reason"]["message"], json!("gone"));
    }

    #[test]
    fn test_adapter_fields_survive_round_trip() {
        let doc: TriggerDoc = serde_json::from_value(json!({
            "id": ":guest:t1",
            "apikey": "uuid:key",
            "additionalData": {"topic": "orders"},
            "url": "https://feed.example.com"
        }))
        .unwrap();

        assert_eq!(doc.extra["additionalData"]["topic"], json!("orders"));

        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["url"], json!("https://feed.example.com"));
    }
}
