//! Configuration for the sync engine.

use std::time::{Duration, SystemTime};

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum queue items drained into one bulk request.
    pub batch_size_limit: usize,
    /// Item-level attempt ceiling before a queue item is moved to the
    /// dead-letter pool.
    pub max_item_attempts: u32,
    /// Whole-batch retry configuration for transport failures.
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Creates a configuration with default bounds.
    pub fn new() -> Self {
        Self {
            batch_size_limit: 50,
            max_item_attempts: 5,
            retry: RetryConfig::default(),
        }
    }

    /// Sets the batch size limit.
    pub fn with_batch_size_limit(mut self, limit: usize) -> Self {
        self.batch_size_limit = limit;
        self
    }

    /// Sets the item attempt ceiling.
    pub fn with_max_item_attempts(mut self, attempts: u32) -> Self {
        self.max_item_attempts = attempts;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Backoff schedule for whole-batch resubmission after transport
/// failures.
///
/// Delays double per attempt from `initial_delay` up to `max_delay`.
/// Jitter spreads replicas that lost connectivity at the same moment;
/// a fleet of field devices regaining signal together would otherwise
/// resubmit in lockstep.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts for one batch submission.
    pub max_attempts: u32,
    /// Delay before the first resubmission.
    pub initial_delay: Duration,
    /// Ceiling on the backoff delay.
    pub max_delay: Duration,
    /// Whether to spread delays with jitter.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a retry configuration with the given attempt ceiling.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(20),
            add_jitter: true,
        }
    }

    /// Creates a configuration that submits exactly once.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            add_jitter: false,
        }
    }

    /// Sets the delay before the first resubmission.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the delay ceiling.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Disables jitter (deterministic delays, mainly for tests).
    pub fn without_jitter(mut self) -> Self {
        self.add_jitter = false;
        self
    }

    /// Delay before the given attempt (0-indexed; attempt 0 is the
    /// initial submission and never waits).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        // The doubling count is clamped so the shift cannot overflow;
        // max_delay caps the result long before 2^20 anyway.
        let doublings = attempt.saturating_sub(1).min(20);
        let base = self
            .initial_delay
            .saturating_mul(1 << doublings)
            .min(self.max_delay);

        if self.add_jitter {
            base + jitter_within(base / 4)
        } else {
            base
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Clock-derived spread in `[0, limit)`; enough to de-correlate
/// replicas without pulling in an RNG dependency.
fn jitter_within(limit: Duration) -> Duration {
    if limit.is_zero() {
        return Duration::ZERO;
    }
    let nanos = u128::from(
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos(),
    );
    Duration::from_nanos((nanos % limit.as_nanos()) as u64)
}
