//! Persistence boundary for trigger documents
//!
//! The full trigger document lives in a JSONB column; the `worker` and
//! `active` columns are denormalized for shard filtering through a partial
//! index, and a row trigger emits the `trigger_change` notification the
//! reconciliation loop listens on (see `migrations/001_triggers.sql`).

use async_trait::async_trait;
use shared::{DbPool, Result, TriggerDoc};

/// Abstract persistence interface for testability
#[async_trait]
pub trait TriggerStore: Send + Sync {
    /// Fetch a trigger document by id
    async fn get(&self, id: &str) -> Result<Option<TriggerDoc>>;

    /// Insert or replace the document for an id
    async fn upsert(&self, id: &str, doc: &TriggerDoc) -> Result<()>;

    /// All currently eligible (active) documents assigned to a worker shard
    async fn query_by_worker(&self, worker: &str) -> Result<Vec<TriggerDoc>>;
}

/// Postgres-backed trigger store
#[derive(Clone)]
pub struct PgTriggerStore {
    pool: DbPool,
}

impl PgTriggerStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TriggerStore for PgTriggerStore {
    async fn get(&self, id: &str) -> Result<Option<TriggerDoc>> {
        let row: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT doc FROM triggers WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(value) => {
                let doc = serde_json::from_value(value)
                    .map_err(|e| shared::Error::internal(format!("Corrupt trigger doc {}: {}", id, e)))?;
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }

    async fn upsert(&self, id: &str, doc: &TriggerDoc) -> Result<()> {
        let value = serde_json::to_value(doc)
            .map_err(|e| shared::Error::internal(format!("Unserializable trigger doc {}: {}", id, e)))?;

        sqlx::query(
            r#"
            INSERT INTO triggers (id, worker, active, doc, updated_at)
            VALUES ($1, $2, $3, $4, now())
            ON CONFLICT (id) DO UPDATE
            SET worker = EXCLUDED.worker,
                active = EXCLUDED.active,
                doc = EXCLUDED.doc,
                updated_at = now()
            "#,
        )
        .bind(id)
        .bind(doc.worker())
        .bind(doc.is_active())
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn query_by_worker(&self, worker: &str) -> Result<Vec<TriggerDoc>> {
        let rows: Vec<(String, serde_json::Value)> =
            sqlx::query_as("SELECT id, doc FROM triggers WHERE worker = $1 AND active")
                .bind(worker)
                .fetch_all(&self.pool)
                .await?;

        let mut docs = Vec::with_capacity(rows.len());
        for (id, value) in rows {
            match serde_json::from_value(value) {
                Ok(doc) => docs.push(doc),
                Err(e) => {
                    // One corrupt document must not block shard recovery
                    tracing::error!(trigger_id = %id, error = %e, "Skipping corrupt trigger doc");
                }
            }
        }

        Ok(docs)
    }
}
