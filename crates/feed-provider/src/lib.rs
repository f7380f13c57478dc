//! Pluggable feed provider service
//!
//! Bridges external event sources to trigger endpoints on a downstream
//! router. The [`manager::TriggerManager`] holds the in-memory registry for
//! one worker shard and drives firing (`fire`), convergence with persisted
//! state (`reconcile`), and active/standby failover (`failover`). Event
//! sources plug in behind the [`adapter::EventSource`] trait.

pub mod adapter;
pub mod error;
pub mod failover;
pub mod fire;
pub mod health;
pub mod manager;
pub mod reconcile;
pub mod registry;
pub mod router;
pub mod store;

pub use adapter::{build_event_source, EventSource, NoopSource, SourceEvent, SourceHandle};
pub use failover::FailoverCoordinator;
pub use fire::FireOutcome;
pub use manager::{MonitorStatus, TriggerManager};
pub use registry::TriggerRegistry;
pub use router::{HttpRouterClient, RouterClient};
pub use store::{PgTriggerStore, TriggerStore};
