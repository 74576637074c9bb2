use std::time::Duration;

/// Reconnect policy shared by every stream session. The delay doubles per
/// consecutive failure and caps at `max_delay`; a successful connect
/// resets the attempt counter (the session's job, not the policy's).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive failed attempts tolerated before giving up. 0 means
    /// retry forever.
    pub max_retries: u32,
}

impl RetryPolicy {
    /// For the single global event feed: never give up.
    pub fn persistent() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_retries: 0,
        }
    }

    /// For per-workload feeds (logs, stats, terminal): a few quick
    /// attempts, then surrender and let the owning panel show it.
    pub fn ephemeral() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    /// Whether a session may attempt retry number `attempt` (1-based).
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_retries == 0 || attempt <= self.max_retries
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let mut delay = self.initial_delay;
        for _ in 1..attempt {
            delay += delay;
            if delay >= self.max_delay {
                return self.max_delay;
            }
        }
        delay.min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::ephemeral()
    }
}
