//! Shared library for the feed-provider service
//!
//! This crate provides common functionality used by the provider:
//! - Database connection pooling and utilities
//! - Trigger document and status models
//! - Error handling types
//! - Configuration management
//! - Logging infrastructure
//! - Coordination-store client (active-host failover state)

pub mod config;
pub mod coordination;
pub mod db;
pub mod error;
pub mod models;

// Re-export commonly used types
pub use config::{Config, DatabaseConfig, ProviderConfig, RedisConfig};
pub use coordination::{CoordinationStore, MemoryCoordination, RedisCoordination};
pub use db::DbPool;
pub use error::{Error, Result};
pub use models::{ReasonKind, StatusReason, TriggerDoc, TriggerKey, TriggerRecord, TriggerStatus};

/// Initialize tracing subscriber for structured logging
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shared=debug,feed_provider=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
