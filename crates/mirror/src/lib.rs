//! mirror - Multi-account mailbox/calendar sync engine
//!
//! Mirrors mailbox and calendar state from a quota-limited provider API
//! into a local store, for many independent accounts under one shared
//! project-wide quota. This crate provides:
//! - A process-wide token-bucket rate limiter budgeting in quota units
//! - A persisted per-account sync state machine with resumable checkpoints
//! - Full and incremental sync against the provider's list/batch/delta API
//! - Escalating cooldown policy for repeated throttling
//! - A fleet scheduler with staleness-ordered fairness and a fleet-wide
//!   circuit breaker
//!
//! The HTTP transport behind the [`provider::Provider`] trait and the
//! durable store behind [`storage::SyncStore`] are pluggable; the engine
//! itself never performs I/O beyond those two boundaries.

pub mod backoff;
pub mod config;
pub mod limiter;
pub mod models;
pub mod provider;
pub mod scheduler;
pub mod storage;
pub mod sync;

pub use backoff::BackoffPolicy;
pub use config::SyncTuning;
pub use limiter::RateLimiter;
pub use models::{Account, AccountSyncState, ItemKind, SyncItem, SyncStatus};
pub use provider::{
    BatchPage, Change, DeltaPage, ItemRef, ListPage, Provider, ProviderError, RemoteItem,
    RetryPolicy, with_retry,
};
pub use scheduler::{FleetScheduler, TickReport};
pub use storage::{InMemorySyncStore, SqliteSyncStore, SyncStore};
pub use sync::{SyncOutcome, SyncRun, SyncStats, sync_account};
