//! Per-account sync state machine
//!
//! One record per connected account, persisted through the store. The record
//! is mutated only by the sync job that owns the account for the current run,
//! with one exception: any scheduler pass may force-reset a record that has
//! been stuck in `Syncing` past the staleness threshold (a crashed worker
//! must not block its account forever).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Where an account currently is in its sync lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Connected, never picked up by a tick yet
    Idle,
    /// A sync job currently owns this account
    Syncing,
    /// Provider throttled the account; wait until `retry_after`
    RateLimited,
    /// Last run failed; eligible again after a fixed cooldown
    Error,
    /// Last run finished cleanly
    Completed,
}

/// Sync progress and failure bookkeeping for one account.
///
/// Created with [`AccountSyncState::new`] when the account is first
/// connected, deleted only when the account itself is removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSyncState {
    /// Owning account identifier
    pub account_id: String,
    pub status: SyncStatus,
    /// Opaque provider checkpoint token. Absent means no sync has ever
    /// completed, so the next run must be a full sync.
    pub checkpoint: Option<String>,
    /// Set only while `RateLimited`; earliest time a retry may be attempted
    pub retry_after: Option<DateTime<Utc>>,
    /// Consecutive throttle events with no intervening success
    pub rate_limit_streak: u32,
    /// When the current/last run started
    pub started_at: Option<DateTime<Utc>>,
    /// When the last run finished (successfully or not)
    pub completed_at: Option<DateTime<Utc>>,
    /// Items upserted/deleted so far in the current/last run
    pub items_synced: u64,
    /// Provider's estimate of the total item count, when known
    pub total_items: Option<u64>,
    /// Set only in `Error`
    pub error_message: Option<String>,
}

impl AccountSyncState {
    /// Fresh state for a newly connected account
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            status: SyncStatus::Idle,
            checkpoint: None,
            retry_after: None,
            rate_limit_streak: 0,
            started_at: None,
            completed_at: None,
            items_synced: 0,
            total_items: None,
            error_message: None,
        }
    }

    /// Transition into `Syncing` at the start of a run
    pub fn begin(&mut self) {
        self.status = SyncStatus::Syncing;
        self.started_at = Some(Utc::now());
        self.items_synced = 0;
        self.total_items = None;
        self.error_message = None;
    }

    /// Record a clean finish: advance the checkpoint and reset the throttle
    /// streak.
    pub fn complete(&mut self, checkpoint: impl Into<String>, items_synced: u64) {
        self.status = SyncStatus::Completed;
        self.checkpoint = Some(checkpoint.into());
        self.completed_at = Some(Utc::now());
        self.items_synced = items_synced;
        self.rate_limit_streak = 0;
        self.retry_after = None;
        self.error_message = None;
    }

    /// Record a non-quota failure
    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = SyncStatus::Error;
        self.completed_at = Some(Utc::now());
        self.error_message = Some(message.into());
    }

    /// Record a throttle event with the given cooldown.
    ///
    /// This is the single authoritative streak bump: exactly one call per
    /// physical throttle event, made by the code that first observed the
    /// condition. The scheduler only reads the result.
    pub fn throttle(&mut self, cooldown: Duration) {
        self.status = SyncStatus::RateLimited;
        self.retry_after = Some(Utc::now() + cooldown);
        self.rate_limit_streak += 1;
        self.completed_at = Some(Utc::now());
    }

    /// True when the record claims `Syncing` but the run started longer ago
    /// than `threshold`, meaning the worker crashed mid-run.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.status == SyncStatus::Syncing
            && self
                .started_at
                .is_none_or(|started| now - started > threshold)
    }

    /// Force a crashed run into `Error` so normal cooldown rules apply
    pub fn mark_stalled(&mut self) {
        self.fail("sync stalled: worker exceeded staleness threshold");
    }

    /// Whether the scheduler may dispatch this account right now.
    ///
    /// Stale `Syncing` records must be reset via [`mark_stalled`] before
    /// this is evaluated; a live `Syncing` record is never eligible.
    pub fn is_eligible(
        &self,
        now: DateTime<Utc>,
        safety_buffer: Duration,
        error_cooldown: Duration,
    ) -> bool {
        match self.status {
            SyncStatus::Idle | SyncStatus::Completed => true,
            SyncStatus::Syncing => false,
            SyncStatus::RateLimited => match self.retry_after {
                // The safety buffer keeps us clear of the provider's exact
                // window boundary.
                Some(after) => now >= after + safety_buffer,
                None => true,
            },
            SyncStatus::Error => match self.completed_at {
                Some(finished) => now >= finished + error_cooldown,
                None => true,
            },
        }
    }

    /// Sort key for least-recently-synced-first ordering. Never-synced
    /// accounts sort before everything else.
    pub fn staleness_key(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }
}
