//! Escalating cooldown policy for throttled accounts
//!
//! Each consecutive throttle event (with no intervening success) moves the
//! account one tier up; any successful sync drops it back to tier zero.
//! The streak itself lives on [`crate::models::AccountSyncState`]; this
//! policy only maps a streak to a cooldown.

use chrono::Duration;

/// Cooldown tiers for repeated throttling
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    tiers: Vec<Duration>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            tiers: vec![
                Duration::minutes(5),
                Duration::minutes(15),
                Duration::minutes(30),
                Duration::minutes(60),
            ],
        }
    }
}

impl BackoffPolicy {
    /// Build a policy from tier durations in seconds. An empty slice falls
    /// back to the defaults.
    pub fn from_secs(tiers: &[u64]) -> Self {
        if tiers.is_empty() {
            return Self::default();
        }
        Self {
            tiers: tiers
                .iter()
                .map(|&secs| Duration::seconds(secs as i64))
                .collect(),
        }
    }

    /// Cooldown for the given consecutive-throttle streak, saturating at
    /// the last tier. `streak` is the count of throttle events observed
    /// before this one: the first throttle of a run gets tier zero.
    pub fn cooldown(&self, streak: u32) -> Duration {
        let idx = (streak as usize).min(self.tiers.len() - 1);
        self.tiers[idx]
    }
}
