//! Storage trait definitions

use anyhow::Result;

use crate::models::{Account, AccountSyncState, SyncItem};

/// Persistence boundary consumed by the sync engine.
///
/// Items are keyed by `(account_id, external_id)`; upserts fully overwrite
/// the stored copy. Sync state is one record per account, upserted by the
/// owning sync job.
pub trait SyncStore: Send + Sync {
    // === Accounts ===

    /// Register an account (upsert by id)
    fn add_account(&self, account: Account) -> Result<()>;

    /// Get an account by id
    fn get_account(&self, id: &str) -> Result<Option<Account>>;

    /// List all registered accounts
    fn list_accounts(&self) -> Result<Vec<Account>>;

    /// Remove an account along with its items and sync state
    fn remove_account(&self, id: &str) -> Result<()>;

    // === Items ===

    /// Insert or fully overwrite an item
    fn upsert_item(&self, item: SyncItem) -> Result<()>;

    /// Delete an item; deleting a missing item is a no-op
    fn delete_item(&self, account_id: &str, external_id: &str) -> Result<()>;

    /// Get an item by identity
    fn get_item(&self, account_id: &str, external_id: &str) -> Result<Option<SyncItem>>;

    /// List all items for an account
    fn list_items(&self, account_id: &str) -> Result<Vec<SyncItem>>;

    /// Count items for an account
    fn count_items(&self, account_id: &str) -> Result<usize>;

    // === Sync state ===

    /// Get sync state for an account
    fn get_sync_state(&self, account_id: &str) -> Result<Option<AccountSyncState>>;

    /// Save sync state (upsert)
    fn save_sync_state(&self, state: AccountSyncState) -> Result<()>;

    /// List sync state for every account
    fn list_sync_states(&self) -> Result<Vec<AccountSyncState>>;
}
