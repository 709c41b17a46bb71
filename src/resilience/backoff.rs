use rand::Rng;
use std::time::Duration;

/// Exponential retry policy for internal calls.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// Each delay is scaled by a random factor in `1 ± jitter` so that
    /// callers failing together do not retry in lockstep.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.clone())
    }
}

/// Tracks one call's retries against a [`RetryPolicy`].
pub struct Backoff {
    policy: RetryPolicy,
    attempt: u32,
    current: Duration,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        let current = policy.initial_backoff;
        Self {
            policy,
            attempt: 1,
            current,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    pub fn on_failure(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_attempts {
            return None;
        }
        let delay = self.current.min(self.policy.max_backoff);
        self.current = self.current.mul_f64(self.policy.multiplier).min(self.policy.max_backoff);
        self.attempt += 1;
        Some(self.jittered(delay))
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let spread = self.policy.jitter.clamp(0.0, 1.0);
        if spread == 0.0 {
            return delay;
        }
        delay.mul_f64(rand::thread_rng().gen_range(1.0 - spread..=1.0 + spread))
    }

    pub fn reset(&mut self) {
        self.attempt = 1;
        self.current = self.policy.initial_backoff;
    }
}
