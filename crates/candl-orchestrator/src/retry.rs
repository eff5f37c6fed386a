use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Backoff parameters: delays run `base_delay * 2^(attempt-1)` capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Delay before scheduled attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Idle,
    /// A retry timer is pending for scheduled attempt `attempt`.
    Armed { attempt: u32, delay: Duration },
    /// Auto-retry gave up; the failure stays surfaced until a manual start.
    Exhausted { attempts: u32 },
}

impl RetryState {
    pub fn attempt(&self) -> u32 {
        match self {
            RetryState::Idle => 0,
            RetryState::Armed { attempt, .. } => *attempt,
            RetryState::Exhausted { attempts } => *attempts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Schedule { attempt: u32, delay: Duration },
    GiveUp { attempts: u32 },
}

/// Exponential-backoff state machine for aggregate failures. Owns at most one
/// pending timer; the timer only re-enters the coordinator.
pub struct RetryScheduler {
    policy: RetryPolicy,
    state: RetryState,
    timer: Option<JoinHandle<()>>,
}

impl RetryScheduler {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: RetryState::Idle,
            timer: None,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    /// Advance the machine after an aggregate failure and report what to do.
    /// The caller arms the timer on `Schedule`.
    pub fn record_failure(&mut self) -> RetryDecision {
        self.cancel_timer();

        let next = match self.state {
            RetryState::Idle => 1,
            RetryState::Armed { attempt, .. } => attempt + 1,
            RetryState::Exhausted { attempts } => attempts + 1,
        };

        if next > self.policy.max_attempts {
            let attempts = next - 1;
            self.state = RetryState::Exhausted { attempts };
            return RetryDecision::GiveUp { attempts };
        }

        let delay = self.policy.delay_for(next);
        self.state = RetryState::Armed {
            attempt: next,
            delay,
        };
        RetryDecision::Schedule {
            attempt: next,
            delay,
        }
    }

    pub fn record_success(&mut self) {
        self.reset();
    }

    /// Back to `Idle`, dropping any pending timer.
    pub fn reset(&mut self) {
        self.cancel_timer();
        self.state = RetryState::Idle;
    }

    /// Spawn `task` after `delay`. Replaces any previous timer.
    pub fn arm<F>(&mut self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel_timer();
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Detach so aborting this timer never tears down the retry run itself.
            tokio::spawn(task);
        }));
    }

    pub fn cancel_timer(&mut self) {
        if let Some(handle) = self.timer.take() {
            handle.abort();
        }
    }

    /// True while a timer is waiting to fire.
    pub fn is_pending(&self) -> bool {
        matches!(self.state, RetryState::Armed { .. })
            && self.timer.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for RetryScheduler {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}
