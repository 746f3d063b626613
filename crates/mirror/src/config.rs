//! Engine tuning knobs
//!
//! Every timing and quota constant the engine uses lives here so
//! deployments can adjust them without a rebuild. Loaded from
//! `sync-tuning.json` in the mirror config directory; any missing field
//! takes its default.

use serde::{Deserialize, Serialize};
use std::time::Duration as StdDuration;

use crate::backoff::BackoffPolicy;
use crate::provider::RetryPolicy;

/// Tuning filename in the mirror config directory
const TUNING_FILE: &str = "sync-tuning.json";

/// Quota, cooldown and scheduling parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncTuning {
    /// Max burst the provider allows, in quota units
    pub quota_capacity: f64,
    /// Sustained quota refill, units per second
    pub quota_refill_per_sec: f64,
    /// Items per batched fetch during full sync
    pub batch_size: usize,
    /// Pause between accounts within one tick
    pub stagger_ms: u64,
    /// A `syncing` record older than this is considered crashed
    pub stale_threshold_secs: u64,
    /// Extra wait past `retry_after` before retrying a throttled account
    pub safety_buffer_secs: u64,
    /// Wait after a non-quota failure before the account is eligible again
    pub error_cooldown_secs: u64,
    /// Escalating throttle cooldown tiers
    pub throttle_tiers_secs: Vec<u64>,
    /// Attempt budget for a single provider call
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Fixed pause before individually retrying ids a batch throttled
    pub batch_retry_delay_ms: u64,
    /// Throttled accounts in one tick before the rest of the tick is
    /// abandoned (fleet-wide circuit breaker)
    pub throttle_abort_threshold: usize,
}

impl Default for SyncTuning {
    fn default() -> Self {
        Self {
            quota_capacity: 250.0,
            quota_refill_per_sec: 250.0,
            batch_size: 50,
            stagger_ms: 2_000,
            stale_threshold_secs: 600,
            safety_buffer_secs: 60,
            error_cooldown_secs: 300,
            throttle_tiers_secs: vec![300, 900, 1_800, 3_600],
            retry_max_attempts: 3,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 2_000,
            batch_retry_delay_ms: 500,
            throttle_abort_threshold: 2,
        }
    }
}

impl SyncTuning {
    /// Load tuning from the config directory, falling back to defaults when
    /// the file is missing or malformed.
    pub fn load() -> Self {
        if !config::config_exists(TUNING_FILE) {
            return Self::default();
        }
        match config::load_json(TUNING_FILE) {
            Ok(tuning) => tuning,
            Err(err) => {
                log::warn!("[CONFIG] ignoring malformed {}: {}", TUNING_FILE, err);
                Self::default()
            }
        }
    }

    /// Persist the current tuning to the config directory
    pub fn save(&self) -> anyhow::Result<()> {
        config::save_json(TUNING_FILE, self)
    }

    pub fn stale_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_threshold_secs as i64)
    }

    pub fn safety_buffer(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.safety_buffer_secs as i64)
    }

    pub fn error_cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.error_cooldown_secs as i64)
    }

    pub fn stagger(&self) -> StdDuration {
        StdDuration::from_millis(self.stagger_ms)
    }

    pub fn batch_retry_delay(&self) -> StdDuration {
        StdDuration::from_millis(self.batch_retry_delay_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            base_delay: StdDuration::from_millis(self.retry_base_delay_ms),
            max_delay: StdDuration::from_millis(self.retry_max_delay_ms),
        }
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::from_secs(&self.throttle_tiers_secs)
    }
}
