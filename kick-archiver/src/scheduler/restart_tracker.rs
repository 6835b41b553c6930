//! Restart backoff for channel monitors.
//!
//! Failures inside the failure window below the threshold restart immediately.
//! From the threshold on the delay is `base * 2^(failures - threshold)`, capped at
//! `max_backoff`. Failures older than the window are forgotten.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, info};

pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(300);
pub const DEFAULT_FAILURE_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_FAILURE_THRESHOLD: usize = 3;

const MAX_EXPONENT: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartTrackerConfig {
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Window for counting failures.
    pub failure_window: Duration,
    /// Number of failures before backoff applies.
    pub failure_threshold: usize,
}

impl Default for RestartTrackerConfig {
    fn default() -> Self {
        Self {
            base_backoff: DEFAULT_BASE_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            failure_window: DEFAULT_FAILURE_WINDOW,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }
}

#[derive(Debug, Default)]
struct FailureHistory {
    recent: Vec<Instant>,
    total: u64,
}

impl FailureHistory {
    fn prune(&mut self, now: Instant, window: Duration) {
        self.recent.retain(|&t| now.duration_since(t) < window);
    }
}

/// Failure history per channel.
#[derive(Debug, Default)]
pub struct RestartTracker {
    history: HashMap<String, FailureHistory>,
    config: RestartTrackerConfig,
}

impl RestartTracker {
    pub fn new(config: RestartTrackerConfig) -> Self {
        Self {
            history: HashMap::new(),
            config,
        }
    }

    /// Record a failure of `channel` and return how long to wait before restarting it.
    pub fn record_failure(&mut self, channel: &str) -> Duration {
        let now = Instant::now();
        let history = self.history.entry(channel.to_string()).or_default();
        history.prune(now, self.config.failure_window);
        history.recent.push(now);
        history.total += 1;

        let failures = history.recent.len();
        let backoff = self.backoff_for(failures);
        if backoff.is_zero() {
            debug!(channel, failures, "Immediate monitor restart");
        } else {
            info!(channel, failures, backoff_ms = backoff.as_millis() as u64, "Delaying monitor restart");
        }
        backoff
    }

    fn backoff_for(&self, failures: usize) -> Duration {
        if failures < self.config.failure_threshold {
            return Duration::ZERO;
        }
        let exponent = (failures - self.config.failure_threshold).min(MAX_EXPONENT as usize) as u32;
        self.config
            .base_backoff
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.config.max_backoff)
    }

    pub fn recent_failures(&self, channel: &str) -> usize {
        let now = Instant::now();
        self.history.get(channel).map_or(0, |h| {
            h.recent
                .iter()
                .filter(|&&t| now.duration_since(t) < self.config.failure_window)
                .count()
        })
    }

    pub fn total_restarts(&self, channel: &str) -> u64 {
        self.history.get(channel).map_or(0, |h| h.total)
    }

    /// Forget a channel, e.g. after it was removed from the scheduler.
    pub fn remove(&mut self, channel: &str) {
        self.history.remove(channel);
    }
}
