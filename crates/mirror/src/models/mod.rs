//! Domain models for the sync engine

mod account;
mod item;
mod sync_state;

pub use account::Account;
pub use item::{ItemKind, SyncItem};
pub use sync_state::{AccountSyncState, SyncStatus};
