//! Storage traits and implementations
//!
//! The sync engine only ever sees the [`SyncStore`] trait; the in-memory
//! implementation backs tests and the SQLite implementation backs real
//! deployments.

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemorySyncStore;
pub use sqlite::SqliteSyncStore;
pub use traits::SyncStore;
