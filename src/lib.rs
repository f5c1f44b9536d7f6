//! # Routing Memory
//!
//! The persistent memory, health-monitoring, and recovery core for a local
//! AI-routing gateway: it turns a stateless request proxy into a learning
//! one.
//!
//! - [`memory`] — the routing history journal, per-user preference learner,
//!   provider quirks catalog, daily event log, and analytics engine, unified
//!   behind [`memory::MemoryManager`].
//! - [`config`] — typed configuration for the memory manager, heartbeat
//!   monitor, and recovery manager.
//! - [`domain_types`] — validated newtypes for every data-model invariant.
//! - [`error`] — the cross-cutting error classification shared by every
//!   component's own error enum.
//! - [`time_provider`] — the injectable clock used throughout for testable
//!   time-dependent behavior.
//! - [`observability`] — structured logging setup for binaries.

pub mod config;
pub mod domain_types;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod memory;
pub mod observability;
pub mod recovery;
pub mod time_provider;

pub use config::{HeartbeatConfig, MemoryConfig, RecoveryConfig};
pub use error::{ErrorClass, ErrorKind};
pub use events::EventBus;
pub use heartbeat::HeartbeatMonitor;
pub use memory::MemoryManager;
pub use recovery::RecoveryManager;
