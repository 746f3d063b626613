//! Sync engine: full and incremental mirroring of one account
//!
//! [`sync_account`] is the entry point for a single account's sync job. It
//! owns every state transition for that account's [`AccountSyncState`]
//! record during the run and never panics or propagates errors past its
//! boundary: every failure mode is recorded into the state and reported
//! through [`SyncRun`].

mod full;
mod incremental;

use chrono::{DateTime, Utc};

use crate::config::SyncTuning;
use crate::limiter::RateLimiter;
use crate::models::AccountSyncState;
use crate::provider::{Provider, ProviderError};
use crate::storage::SyncStore;

/// Statistics from one sync run
#[derive(Debug, Default, Clone)]
pub struct SyncStats {
    /// Identifiers enumerated (full sync only)
    pub items_listed: usize,
    /// Items fetched and upserted
    pub items_upserted: usize,
    /// Items deleted from the local store
    pub items_deleted: usize,
    /// Provider pages walked (list or delta)
    pub pages: usize,
    /// Duration of the sync operation
    pub duration_ms: u64,
}

/// Result of a successful sync run.
///
/// `changed_ids` carries the external ids that an incremental run added or
/// updated, in feed order, for downstream subsystems (analysis,
/// notifications) to react to. A full sync baseline reports no changed ids;
/// consumers treat a new baseline as a full re-read.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub stats: SyncStats,
    pub changed_ids: Vec<String>,
    /// The checkpoint persisted for the next incremental sync
    pub checkpoint: String,
}

/// How a sync run ended. All three variants have already been recorded
/// into the account's sync state by the time the caller sees them.
#[derive(Debug, Clone)]
pub enum SyncRun {
    Completed(SyncOutcome),
    /// Provider throttled the run; the account is in cooldown
    Throttled { retry_after: DateTime<Utc> },
    /// Non-quota failure
    Failed { message: String },
}

/// Internal failure plumbing between the protocol implementations and
/// [`sync_account`].
#[derive(Debug)]
pub(crate) enum SyncError {
    Provider(ProviderError),
    Store(anyhow::Error),
}

impl From<ProviderError> for SyncError {
    fn from(err: ProviderError) -> Self {
        Self::Provider(err)
    }
}

impl From<anyhow::Error> for SyncError {
    fn from(err: anyhow::Error) -> Self {
        Self::Store(err)
    }
}

/// Run one sync for `account_id`: incremental when a checkpoint exists,
/// full otherwise, with the mandatory full-sync fallback when the provider
/// reports the checkpoint expired.
///
/// This function is the only writer to the account's sync state record
/// for the duration of the run.
pub fn sync_account(
    provider: &dyn Provider,
    store: &dyn SyncStore,
    limiter: &RateLimiter,
    tuning: &SyncTuning,
    account_id: &str,
) -> SyncRun {
    let start = std::time::Instant::now();

    let mut state = match store.get_sync_state(account_id) {
        Ok(Some(state)) => state,
        Ok(None) => AccountSyncState::new(account_id),
        Err(err) => {
            return SyncRun::Failed {
                message: format!("failed to load sync state: {err}"),
            };
        }
    };

    state.begin();
    if let Err(err) = store.save_sync_state(state.clone()) {
        return SyncRun::Failed {
            message: format!("failed to persist sync state: {err}"),
        };
    }

    let result = match state.checkpoint.clone() {
        None => {
            log::info!("[SYNC] {}: no checkpoint, running full sync", account_id);
            full::run(provider, store, limiter, tuning, account_id, &mut state)
        }
        Some(checkpoint) => {
            match incremental::run(
                provider,
                store,
                limiter,
                tuning,
                account_id,
                &checkpoint,
                &mut state,
            ) {
                Err(SyncError::Provider(ProviderError::CheckpointExpired)) => {
                    // Not retryable: the only recovery is a re-baseline.
                    log::warn!(
                        "[SYNC] {}: checkpoint {} expired, falling back to full sync",
                        account_id,
                        checkpoint
                    );
                    full::run(provider, store, limiter, tuning, account_id, &mut state)
                }
                other => other,
            }
        }
    };

    match result {
        Ok(mut outcome) => {
            outcome.stats.duration_ms = start.elapsed().as_millis() as u64;
            state.complete(outcome.checkpoint.clone(), state.items_synced);
            persist_terminal_state(store, &state);
            log::info!(
                "[SYNC] {}: completed, {} upserted, {} deleted, checkpoint {}",
                account_id,
                outcome.stats.items_upserted,
                outcome.stats.items_deleted,
                outcome.checkpoint
            );
            SyncRun::Completed(outcome)
        }
        Err(SyncError::Provider(err)) if err.is_throttle() => {
            // First detector of the throttle: drain the shared bucket so
            // concurrent callers wait out the window, then apply the
            // escalating cooldown and bump the streak exactly once.
            limiter.drain();
            let mut cooldown = tuning.backoff_policy().cooldown(state.rate_limit_streak);
            if let ProviderError::Throttled {
                retry_after: Some(hint),
                ..
            } = &err
            {
                let hinted = chrono::Duration::from_std(*hint).unwrap_or(cooldown);
                cooldown = cooldown.max(hinted);
            }
            state.throttle(cooldown);
            let retry_after = state.retry_after.unwrap_or_else(Utc::now);
            persist_terminal_state(store, &state);
            log::warn!(
                "[SYNC] {}: throttled (streak {}), retry after {}",
                account_id,
                state.rate_limit_streak,
                retry_after
            );
            SyncRun::Throttled { retry_after }
        }
        Err(err) => {
            let message = match err {
                SyncError::Provider(err) => err.to_string(),
                SyncError::Store(err) => format!("storage failure: {err}"),
            };
            state.fail(message.clone());
            persist_terminal_state(store, &state);
            log::error!("[SYNC] {}: failed: {}", account_id, message);
            SyncRun::Failed { message }
        }
    }
}

/// Best-effort save of a terminal state. A store failure here is logged,
/// not propagated: the run itself already has an outcome.
fn persist_terminal_state(store: &dyn SyncStore, state: &AccountSyncState) {
    if let Err(err) = store.save_sync_state(state.clone()) {
        log::error!(
            "[SYNC] {}: failed to persist terminal sync state: {}",
            state.account_id,
            err
        );
    }
}
