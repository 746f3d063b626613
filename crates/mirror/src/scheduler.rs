//! Fleet scheduler: the periodic tick over all connected accounts
//!
//! One tick selects eligible accounts, runs them sequentially with a
//! stagger delay, and stops early when enough independent throttle signals
//! indicate the whole project's quota is exhausted rather than a single
//! account's. Ticks never overlap: a tick that fires while the previous
//! one is still running is skipped outright.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;

use crate::config::SyncTuning;
use crate::limiter::RateLimiter;
use crate::models::{Account, AccountSyncState, SyncStatus};
use crate::provider::Provider;
use crate::storage::SyncStore;
use crate::sync::{SyncRun, sync_account};

/// Summary of one fleet pass
#[derive(Debug, Default, Clone)]
pub struct TickReport {
    /// True when the tick was skipped because another was still running
    pub skipped: bool,
    /// Accounts dispatched this tick, in dispatch order
    pub attempted: Vec<String>,
    pub completed: usize,
    pub throttled: usize,
    pub failed: usize,
    /// Full-sync candidates pushed to a later tick
    pub deferred_full: usize,
    /// True when the circuit breaker aborted the remainder of the tick
    pub breaker_tripped: bool,
}

/// Decides, each tick, which accounts to sync and in what order.
///
/// All sync work (periodic and manual) funnels through the one shared
/// [`RateLimiter`] injected here, so no path can bypass the quota.
pub struct FleetScheduler {
    provider: Arc<dyn Provider>,
    store: Arc<dyn SyncStore>,
    limiter: Arc<RateLimiter>,
    tuning: SyncTuning,
    /// Non-reentrant critical section: at most one fleet pass at a time
    tick_lock: Mutex<()>,
}

impl FleetScheduler {
    pub fn new(
        provider: Arc<dyn Provider>,
        store: Arc<dyn SyncStore>,
        limiter: Arc<RateLimiter>,
        tuning: SyncTuning,
    ) -> Self {
        Self {
            provider,
            store,
            limiter,
            tuning,
            tick_lock: Mutex::new(()),
        }
    }

    /// Connect a new account: register it and seed its sync state as idle.
    pub fn connect_account(&self, account: Account) -> Result<()> {
        let state = AccountSyncState::new(&account.id);
        self.store
            .add_account(account)
            .context("Failed to register account")?;
        self.store
            .save_sync_state(state)
            .context("Failed to seed sync state")?;
        Ok(())
    }

    /// Disconnect an account, removing its items and sync state.
    pub fn disconnect_account(&self, account_id: &str) -> Result<()> {
        self.store.remove_account(account_id)
    }

    /// Run one fleet pass. Per-account errors are recorded in each
    /// account's sync state and counted in the report; they never
    /// propagate out of the tick.
    pub fn tick(&self) -> TickReport {
        let Ok(_guard) = self.tick_lock.try_lock() else {
            log::info!("[TICK] previous tick still running, skipping");
            return TickReport {
                skipped: true,
                ..TickReport::default()
            };
        };

        let mut report = TickReport::default();
        let (queue, deferred) = match self.select_accounts() {
            Ok(selection) => selection,
            Err(err) => {
                log::error!("[TICK] account selection failed: {}", err);
                return report;
            }
        };
        report.deferred_full = deferred;

        log::info!(
            "[TICK] dispatching {} accounts ({} full-sync candidates deferred)",
            queue.len(),
            deferred
        );

        for (i, account_id) in queue.into_iter().enumerate() {
            if i > 0 {
                std::thread::sleep(self.tuning.stagger());
            }

            // Re-read immediately before dispatch: stale-detection and
            // cooldown expiry can change eligibility between selection and
            // now, and a manual trigger may have claimed the account.
            if !self.still_eligible(&account_id) {
                continue;
            }

            report.attempted.push(account_id.clone());
            match sync_account(
                self.provider.as_ref(),
                self.store.as_ref(),
                &self.limiter,
                &self.tuning,
                &account_id,
            ) {
                SyncRun::Completed(_) => report.completed += 1,
                SyncRun::Throttled { .. } => {
                    report.throttled += 1;
                    // Two independently throttled accounts in one tick is
                    // evidence of project-wide exhaustion, not one
                    // account's narrow limit.
                    if report.throttled >= self.tuning.throttle_abort_threshold {
                        log::warn!(
                            "[TICK] {} accounts throttled, aborting remainder of tick",
                            report.throttled
                        );
                        report.breaker_tripped = true;
                        break;
                    }
                }
                SyncRun::Failed { .. } => report.failed += 1,
            }
        }

        report
    }

    /// Sync a single account on demand. Shares the tick's rate limiter but
    /// not its mutex; the per-account ownership check below keeps a manual
    /// trigger from racing a tick that is already syncing this account.
    pub fn sync_now(&self, account_id: &str) -> Result<SyncRun> {
        if let Some(mut state) = self.store.get_sync_state(account_id)? {
            if state.is_stale(Utc::now(), self.tuning.stale_threshold()) {
                state.mark_stalled();
                self.store.save_sync_state(state)?;
            } else if state.status == SyncStatus::Syncing {
                bail!("account {} is already syncing", account_id);
            }
        }

        Ok(sync_account(
            self.provider.as_ref(),
            self.store.as_ref(),
            &self.limiter,
            &self.tuning,
            account_id,
        ))
    }

    /// Run ticks forever at the given interval. Intended for a dedicated
    /// background thread.
    pub fn run_loop(&self, interval: Duration) -> ! {
        loop {
            self.tick();
            std::thread::sleep(interval);
        }
    }

    /// Build this tick's dispatch queue: all eligible incremental accounts
    /// ordered least-recently-synced first, then at most one full-sync
    /// account. Returns the queue and the number of deferred full syncs.
    fn select_accounts(&self) -> Result<(Vec<String>, usize)> {
        let now = Utc::now();
        let mut states = Vec::new();

        for account in self.store.list_accounts()? {
            let state = match self.store.get_sync_state(&account.id)? {
                Some(state) => state,
                // Connected but never seeded; treat as freshly idle.
                None => AccountSyncState::new(&account.id),
            };
            states.push(state);
        }

        // Stale-reset pass: crashed workers must not block their accounts.
        for state in &mut states {
            if state.is_stale(now, self.tuning.stale_threshold()) {
                log::warn!(
                    "[TICK] {}: stuck in syncing since {:?}, forcing error state",
                    state.account_id,
                    state.started_at
                );
                state.mark_stalled();
                self.store.save_sync_state(state.clone())?;
            }
        }

        let safety_buffer = self.tuning.safety_buffer();
        let error_cooldown = self.tuning.error_cooldown();

        let mut incremental: Vec<&AccountSyncState> = Vec::new();
        let mut full: Vec<&AccountSyncState> = Vec::new();
        for state in &states {
            if !state.is_eligible(now, safety_buffer, error_cooldown) {
                continue;
            }
            if state.checkpoint.is_some() {
                incremental.push(state);
            } else {
                full.push(state);
            }
        }

        // Least-recently-synced first; never-synced accounts are the most
        // stale of all.
        let staleness = |state: &&AccountSyncState| (state.staleness_key().is_some(), state.staleness_key());
        incremental.sort_by_key(staleness);
        full.sort_by_key(staleness);

        let deferred = full.len().saturating_sub(1);
        let queue = incremental
            .into_iter()
            .chain(full.into_iter().take(1))
            .map(|state| state.account_id.clone())
            .collect();

        Ok((queue, deferred))
    }

    /// Re-evaluate eligibility right before dispatch.
    fn still_eligible(&self, account_id: &str) -> bool {
        let state = match self.store.get_sync_state(account_id) {
            Ok(Some(state)) => state,
            Ok(None) => return true,
            Err(err) => {
                log::error!("[TICK] {}: failed to re-read state: {}", account_id, err);
                return false;
            }
        };

        let now = Utc::now();
        if state.is_stale(now, self.tuning.stale_threshold()) {
            // Force-reset; the error cooldown now applies, so this account
            // waits for a later tick.
            let mut state = state;
            state.mark_stalled();
            if let Err(err) = self.store.save_sync_state(state) {
                log::error!("[TICK] {}: failed to reset stale state: {}", account_id, err);
            }
            return false;
        }

        state.is_eligible(now, self.tuning.safety_buffer(), self.tuning.error_cooldown())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemKind;
    use crate::provider::{
        BatchPage, Change, DeltaPage, ItemRef, ListPage, ProviderError, RemoteItem,
    };
    use crate::storage::InMemorySyncStore;
    use chrono::Duration as ChronoDuration;
    use std::collections::HashSet;

    fn remote(id: &str) -> RemoteItem {
        RemoteItem {
            id: id.to_string(),
            kind: ItemKind::Mail,
            labels: Vec::new(),
            payload: String::new(),
        }
    }

    /// Provider whose delta feed throttles a scripted set of accounts and
    /// optionally sleeps to simulate slow calls.
    struct ScriptedProvider {
        throttle_accounts: HashSet<String>,
        delta_delay: Duration,
    }

    impl ScriptedProvider {
        fn new(throttle_accounts: &[&str]) -> Self {
            Self {
                throttle_accounts: throttle_accounts.iter().map(|s| s.to_string()).collect(),
                delta_delay: Duration::ZERO,
            }
        }
    }

    impl Provider for ScriptedProvider {
        fn list_all(
            &self,
            _account_id: &str,
            _page_token: Option<&str>,
        ) -> Result<ListPage, ProviderError> {
            Ok(ListPage {
                items: vec![ItemRef {
                    id: "m1".into(),
                    kind: ItemKind::Mail,
                }],
                next_page_token: None,
                result_size_estimate: Some(1),
                checkpoint: Some("H1".into()),
            })
        }

        fn get_one(&self, _account_id: &str, id: &str) -> Result<RemoteItem, ProviderError> {
            Ok(remote(id))
        }

        fn get_many(&self, _account_id: &str, ids: &[String]) -> Result<BatchPage, ProviderError> {
            Ok(BatchPage {
                items: ids.iter().map(|id| remote(id)).collect(),
                throttled: Vec::new(),
            })
        }

        fn delta(
            &self,
            account_id: &str,
            _checkpoint: &str,
            _page_token: Option<&str>,
        ) -> Result<DeltaPage, ProviderError> {
            if !self.delta_delay.is_zero() {
                std::thread::sleep(self.delta_delay);
            }
            if self.throttle_accounts.contains(account_id) {
                return Err(ProviderError::from_status(429, "quota exceeded"));
            }
            Ok(DeltaPage {
                changes: vec![Change::Upsert { item: remote("m2") }],
                next_page_token: None,
                new_checkpoint: Some("H2".into()),
            })
        }
    }

    fn fast_tuning() -> SyncTuning {
        SyncTuning {
            stagger_ms: 0,
            batch_retry_delay_ms: 1,
            retry_base_delay_ms: 1,
            retry_max_delay_ms: 2,
            ..SyncTuning::default()
        }
    }

    fn make_scheduler(provider: ScriptedProvider) -> (FleetScheduler, Arc<InMemorySyncStore>) {
        let store = Arc::new(InMemorySyncStore::new());
        let scheduler = FleetScheduler::new(
            Arc::new(provider),
            store.clone(),
            Arc::new(RateLimiter::new(100_000.0, 100_000.0)),
            fast_tuning(),
        );
        (scheduler, store)
    }

    /// Seed an account with a completed sync `age_minutes` ago so dispatch
    /// order (least-recently-synced first) is deterministic.
    fn seed_synced(store: &InMemorySyncStore, id: &str, age_minutes: i64) {
        store.add_account(Account::new(id, format!("{id}@example.com"))).unwrap();
        let mut state = AccountSyncState::new(id);
        state.complete("H1", 0);
        state.completed_at = Some(Utc::now() - ChronoDuration::minutes(age_minutes));
        store.save_sync_state(state).unwrap();
    }

    #[test]
    fn test_connect_account_seeds_idle_state() {
        let (scheduler, store) = make_scheduler(ScriptedProvider::new(&[]));
        scheduler
            .connect_account(Account::new("a1", "a1@example.com"))
            .unwrap();

        let state = store.get_sync_state("a1").unwrap().unwrap();
        assert_eq!(state.status, SyncStatus::Idle);
        assert!(state.checkpoint.is_none());
    }

    #[test]
    fn test_tick_processes_incrementals_and_one_full() {
        let (scheduler, store) = make_scheduler(ScriptedProvider::new(&[]));
        seed_synced(&store, "inc-1", 60);
        // Three accounts with no checkpoint: full-sync candidates.
        for id in ["full-1", "full-2", "full-3"] {
            scheduler
                .connect_account(Account::new(id, format!("{id}@example.com")))
                .unwrap();
        }

        let report = scheduler.tick();

        assert!(!report.skipped);
        assert_eq!(report.attempted.len(), 2); // inc-1 plus one full
        assert_eq!(report.attempted[0], "inc-1");
        assert_eq!(report.deferred_full, 2);
        assert_eq!(report.completed, 2);
    }

    #[test]
    fn test_staleness_ordering() {
        let (scheduler, store) = make_scheduler(ScriptedProvider::new(&[]));
        seed_synced(&store, "fresh", 1);
        seed_synced(&store, "stale", 120);
        seed_synced(&store, "mid", 30);

        let report = scheduler.tick();
        assert_eq!(report.attempted, vec!["stale", "mid", "fresh"]);
    }

    #[test]
    fn test_circuit_breaker_aborts_after_second_throttle() {
        // Dispatch order by staleness: a1, a2, a3, a4, a5. a2 and a3
        // throttle, so a4 and a5 must never be attempted.
        let (scheduler, store) = make_scheduler(ScriptedProvider::new(&["a2", "a3"]));
        for (i, id) in ["a1", "a2", "a3", "a4", "a5"].iter().enumerate() {
            seed_synced(&store, id, 100 - (i as i64) * 10);
        }

        let report = scheduler.tick();

        assert_eq!(report.attempted, vec!["a1", "a2", "a3"]);
        assert!(report.breaker_tripped);
        assert_eq!(report.completed, 1);
        assert_eq!(report.throttled, 2);

        // a1 completed; a2/a3 are rate-limited; a4/a5 untouched.
        assert_eq!(store.get_sync_state("a1").unwrap().unwrap().status, SyncStatus::Completed);
        for id in ["a2", "a3"] {
            let state = store.get_sync_state(id).unwrap().unwrap();
            assert_eq!(state.status, SyncStatus::RateLimited);
            assert_eq!(state.rate_limit_streak, 1);
        }
        for id in ["a4", "a5"] {
            let state = store.get_sync_state(id).unwrap().unwrap();
            assert_eq!(state.status, SyncStatus::Completed); // from seeding
        }
    }

    #[test]
    fn test_single_throttle_does_not_abort_tick() {
        let (scheduler, store) = make_scheduler(ScriptedProvider::new(&["a1"]));
        seed_synced(&store, "a1", 100);
        seed_synced(&store, "a2", 50);

        let report = scheduler.tick();

        assert_eq!(report.attempted, vec!["a1", "a2"]);
        assert!(!report.breaker_tripped);
        assert_eq!(report.throttled, 1);
        assert_eq!(report.completed, 1);
    }

    #[test]
    fn test_stale_syncing_reset_then_retried_after_cooldown() {
        let (scheduler, store) = make_scheduler(ScriptedProvider::new(&[]));
        store.add_account(Account::new("a1", "a1@example.com")).unwrap();
        let mut state = AccountSyncState::new("a1");
        state.begin();
        state.started_at = Some(Utc::now() - ChronoDuration::minutes(11));
        store.save_sync_state(state).unwrap();

        let report = scheduler.tick();

        // Reset happens before eligibility: the account lands in Error and
        // is not dispatched this tick (error cooldown applies).
        assert!(report.attempted.is_empty());
        let state = store.get_sync_state("a1").unwrap().unwrap();
        assert_eq!(state.status, SyncStatus::Error);
        assert!(state.error_message.as_deref().unwrap().contains("stalled"));
    }

    #[test]
    fn test_rate_limited_account_skipped_until_buffer_elapses() {
        let (scheduler, store) = make_scheduler(ScriptedProvider::new(&[]));
        store.add_account(Account::new("a1", "a1@example.com")).unwrap();
        let mut state = AccountSyncState::new("a1");
        state.checkpoint = Some("H1".into());
        state.status = SyncStatus::RateLimited;
        state.retry_after = Some(Utc::now() - ChronoDuration::seconds(30));
        store.save_sync_state(state.clone()).unwrap();

        // retry_after passed 30s ago but the 60s safety buffer hasn't.
        let report = scheduler.tick();
        assert!(report.attempted.is_empty());

        state.retry_after = Some(Utc::now() - ChronoDuration::seconds(120));
        store.save_sync_state(state).unwrap();
        let report = scheduler.tick();
        assert_eq!(report.attempted, vec!["a1"]);
    }

    #[test]
    fn test_overlapping_tick_is_skipped() {
        let provider = ScriptedProvider {
            throttle_accounts: HashSet::new(),
            delta_delay: Duration::from_millis(200),
        };
        let (scheduler, store) = make_scheduler(provider);
        seed_synced(&store, "a1", 10);

        let scheduler = Arc::new(scheduler);
        let background = {
            let scheduler = Arc::clone(&scheduler);
            std::thread::spawn(move || scheduler.tick())
        };

        // Give the background tick time to take the lock and block in the
        // provider call.
        std::thread::sleep(Duration::from_millis(50));
        let report = scheduler.tick();
        assert!(report.skipped);

        let background_report = background.join().unwrap();
        assert!(!background_report.skipped);
        assert_eq!(background_report.completed, 1);
    }

    #[test]
    fn test_sync_now_rejects_live_syncing_account() {
        let (scheduler, store) = make_scheduler(ScriptedProvider::new(&[]));
        store.add_account(Account::new("a1", "a1@example.com")).unwrap();
        let mut state = AccountSyncState::new("a1");
        state.begin(); // live, not stale
        store.save_sync_state(state).unwrap();

        assert!(scheduler.sync_now("a1").is_err());
    }

    #[test]
    fn test_sync_now_runs_account() {
        let (scheduler, store) = make_scheduler(ScriptedProvider::new(&[]));
        scheduler
            .connect_account(Account::new("a1", "a1@example.com"))
            .unwrap();

        let run = scheduler.sync_now("a1").unwrap();
        assert!(matches!(run, SyncRun::Completed(_)));
        assert_eq!(store.count_items("a1").unwrap(), 1);
    }
}
