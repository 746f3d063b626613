//! Incremental sync: apply the provider's delta feed from a checkpoint
//!
//! Changes are applied strictly in feed order, so the last entry for an
//! item within one run wins. The feed never emits both an upsert and a
//! delete for the same id in one call; deletes always remove. Applying the
//! same feed twice is idempotent (upserts overwrite, deleting a missing
//! item is a no-op).

use anyhow::anyhow;
use chrono::Utc;

use super::{SyncError, SyncOutcome, SyncStats};
use crate::config::SyncTuning;
use crate::limiter::RateLimiter;
use crate::models::AccountSyncState;
use crate::provider::{Change, Provider, quota, with_retry};
use crate::storage::SyncStore;

pub(crate) fn run(
    provider: &dyn Provider,
    store: &dyn SyncStore,
    limiter: &RateLimiter,
    tuning: &SyncTuning,
    account_id: &str,
    start_checkpoint: &str,
    state: &mut AccountSyncState,
) -> Result<SyncOutcome, SyncError> {
    let retry = tuning.retry_policy();
    let mut stats = SyncStats::default();
    let mut changed_ids: Vec<String> = Vec::new();
    let mut new_checkpoint: Option<String> = None;
    let mut page_token: Option<String> = None;

    loop {
        limiter.acquire(quota::DELTA);
        let page = with_retry(&retry, || {
            provider.delta(account_id, start_checkpoint, page_token.as_deref())
        })?;
        stats.pages += 1;

        for change in page.changes {
            match change {
                Change::Upsert { item } => {
                    let id = item.id.clone();
                    store.upsert_item(item.into_item(account_id, Utc::now()))?;
                    stats.items_upserted += 1;
                    if !changed_ids.contains(&id) {
                        changed_ids.push(id);
                    }
                }
                Change::Delete { id } => {
                    store.delete_item(account_id, &id)?;
                    stats.items_deleted += 1;
                }
            }
        }

        if page.new_checkpoint.is_some() {
            new_checkpoint = page.new_checkpoint;
        }

        state.items_synced = (stats.items_upserted + stats.items_deleted) as u64;
        store.save_sync_state(state.clone())?;

        match page.next_page_token {
            Some(token) => page_token = Some(token),
            None => break,
        }
    }

    let checkpoint = new_checkpoint
        .ok_or_else(|| SyncError::Store(anyhow!("delta feed reported no new checkpoint")))?;

    Ok(SyncOutcome {
        stats,
        changed_ids,
        checkpoint,
    })
}
