#[cfg(test)]
#[path = "reconnect_test.rs"]
mod reconnect_test;

use std::time::{Duration, Instant};

/// Exponential backoff policy for re-establishing the transport after an
/// unexpected close.
///
/// Defaults mirror the production service: 1s doubling per attempt, 30s
/// ceiling, at most 5 attempts before the session fails terminally.
#[derive(Clone, Copy, Debug)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Retries allowed before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

/// Attempt tracking owned by the policy's consumer.
///
/// Reset to zero on every successful open.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReconnectState {
    /// Attempts made since the last successful open.
    pub attempt: u32,
    /// When the most recent attempt was scheduled.
    pub last_attempt_at: Option<Instant>,
}

impl ReconnectPolicy {
    /// Delay before the next attempt, or `None` once the cap is exhausted.
    ///
    /// Doubles from `base_delay` per recorded attempt, clamped to
    /// `max_delay`. Records the attempt in `state` when a delay is issued.
    pub fn next_delay(&self, state: &mut ReconnectState) -> Option<Duration> {
        if state.attempt >= self.max_attempts {
            return None;
        }

        let exponent = state.attempt.min(31);
        let delay = self
            .base_delay
            .saturating_mul(2_u32.saturating_pow(exponent))
            .min(self.max_delay);

        state.attempt += 1;
        state.last_attempt_at = Some(Instant::now());
        Some(delay)
    }
}

impl ReconnectState {
    /// Forget past attempts after a successful open.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.last_attempt_at = None;
    }
}
