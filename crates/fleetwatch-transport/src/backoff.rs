// ── Retry timing ──
//
// Two policies: `ConnectPolicy` bounds the initial `connect()` handshake
// (fails hard when exhausted), `ReconnectConfig` paces the background
// network loop after an established session drops (retries forever).

use std::time::Duration;

/// Bounded retry policy for the initial connection.
#[derive(Debug, Clone)]
pub struct ConnectPolicy {
    /// Total connection attempts before giving up. Default: 5.
    pub max_attempts: u32,

    /// Delay unit; attempt `n` waits `base_delay * n`. Default: 2s.
    pub base_delay: Duration,

    /// Sleep between checks of the acknowledgment flag. Default: 500ms.
    pub poll_interval: Duration,

    /// Checks per attempt before the attempt counts as timed out. Default: 10.
    pub poll_attempts: u32,
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            poll_interval: Duration::from_millis(500),
            poll_attempts: 10,
        }
    }
}

impl ConnectPolicy {
    /// Delay after failed attempt number `attempt` (1-based).
    ///
    /// Linear in the attempt number, so consecutive delays strictly increase.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt.max(1))
    }

    /// Upper bound on how long one attempt waits for the acknowledgment.
    pub fn attempt_timeout(&self) -> Duration {
        self.poll_interval.saturating_mul(self.poll_attempts)
    }
}

/// Exponential backoff for the background reconnection loop.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) * jitter`, jitter within +-25%.
#[allow(clippy::cast_possible_wrap)]
pub fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(attempt.min(30) as i32);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic jitter seeded from the attempt number.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();

    Duration::from_secs_f64((capped * jitter_factor).max(0.0))
}
