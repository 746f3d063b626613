//! In-memory storage implementation
//!
//! Used by tests and as a stub where durable storage isn't needed.
//! HashMaps protected by RwLocks for thread-safe access.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::RwLock;

use super::SyncStore;
use crate::models::{Account, AccountSyncState, SyncItem};

/// In-memory implementation of [`SyncStore`]
pub struct InMemorySyncStore {
    accounts: RwLock<HashMap<String, Account>>,
    /// Items keyed by `(account_id, external_id)`
    items: RwLock<HashMap<(String, String), SyncItem>>,
    sync_states: RwLock<HashMap<String, AccountSyncState>>,
}

impl InMemorySyncStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            items: RwLock::new(HashMap::new()),
            sync_states: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemorySyncStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncStore for InMemorySyncStore {
    fn add_account(&self, account: Account) -> Result<()> {
        let mut accounts = self.accounts.write().unwrap();
        accounts.insert(account.id.clone(), account);
        Ok(())
    }

    fn get_account(&self, id: &str) -> Result<Option<Account>> {
        let accounts = self.accounts.read().unwrap();
        Ok(accounts.get(id).cloned())
    }

    fn list_accounts(&self) -> Result<Vec<Account>> {
        let accounts = self.accounts.read().unwrap();
        let mut list: Vec<_> = accounts.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(list)
    }

    fn remove_account(&self, id: &str) -> Result<()> {
        self.accounts.write().unwrap().remove(id);
        self.sync_states.write().unwrap().remove(id);
        let mut items = self.items.write().unwrap();
        items.retain(|(account_id, _), _| account_id != id);
        Ok(())
    }

    fn upsert_item(&self, item: SyncItem) -> Result<()> {
        let key = (item.account_id.clone(), item.external_id.clone());
        let mut items = self.items.write().unwrap();
        items.insert(key, item);
        Ok(())
    }

    fn delete_item(&self, account_id: &str, external_id: &str) -> Result<()> {
        let mut items = self.items.write().unwrap();
        items.remove(&(account_id.to_string(), external_id.to_string()));
        Ok(())
    }

    fn get_item(&self, account_id: &str, external_id: &str) -> Result<Option<SyncItem>> {
        let items = self.items.read().unwrap();
        Ok(items
            .get(&(account_id.to_string(), external_id.to_string()))
            .cloned())
    }

    fn list_items(&self, account_id: &str) -> Result<Vec<SyncItem>> {
        let items = self.items.read().unwrap();
        let mut list: Vec<_> = items
            .values()
            .filter(|item| item.account_id == account_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.external_id.cmp(&b.external_id));
        Ok(list)
    }

    fn count_items(&self, account_id: &str) -> Result<usize> {
        let items = self.items.read().unwrap();
        Ok(items
            .values()
            .filter(|item| item.account_id == account_id)
            .count())
    }

    fn get_sync_state(&self, account_id: &str) -> Result<Option<AccountSyncState>> {
        let states = self.sync_states.read().unwrap();
        Ok(states.get(account_id).cloned())
    }

    fn save_sync_state(&self, state: AccountSyncState) -> Result<()> {
        let mut states = self.sync_states.write().unwrap();
        states.insert(state.account_id.clone(), state);
        Ok(())
    }

    fn list_sync_states(&self) -> Result<Vec<AccountSyncState>> {
        let states = self.sync_states.read().unwrap();
        let mut list: Vec<_> = states.values().cloned().collect();
        list.sort_by(|a, b| a.account_id.cmp(&b.account_id));
        Ok(list)
    }
}
