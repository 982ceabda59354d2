use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Restart policy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RestartPolicy {
    /// Maximum consecutive restarts within the reset window
    pub max_restarts: u32,
    /// Delay before the first restart, doubled for each following one
    pub base_delay: Duration,
    /// Ceiling for the computed delay
    pub max_delay: Duration,
    /// Time after the first restart of a window at which the counter resets
    pub reset_window: Duration,
}

impl RestartPolicy {
    pub fn new(
        max_restarts: u32,
        base_delay: Duration,
        max_delay: Duration,
        reset_window: Duration,
    ) -> Self {
        Self {
            max_restarts,
            base_delay,
            max_delay,
            reset_window,
        }
    }

    /// Exponential backoff: delay = base * 2^count, capped at `max_delay`
    pub fn delay_for(&self, count: u32) -> Duration {
        let factor = 2_u32.saturating_pow(count);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::new(
            3,
            Duration::from_secs(5),
            Duration::from_secs(600),
            Duration::from_secs(3600),
        )
    }
}

/// Restart bookkeeping of one worker
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestartState {
    /// Consecutive restarts in the current window
    pub count: u32,
    /// Time of the first restart in the current window
    pub window_start: Option<DateTime<Utc>>,
    pub last_restart: Option<DateTime<Utc>>,
}

/// What the supervisor should do about an unhealthy worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartAction {
    RestartNow,
    RestartAfterDelay(Duration),
    GiveUp,
}

/// Decides restarts from per-worker restart history
#[derive(Debug, Default)]
pub struct RestartPolicyEngine {
    policy: RestartPolicy,
    states: HashMap<String, RestartState>,
}

impl RestartPolicyEngine {
    pub fn new(policy: RestartPolicy) -> Self {
        Self {
            policy,
            states: HashMap::new(),
        }
    }

    pub fn policy(&self) -> &RestartPolicy {
        &self.policy
    }

    /// Record that `worker` needs a restart and decide how to proceed
    pub fn on_unhealthy(&mut self, worker: &str) -> RestartAction {
        self.on_unhealthy_at(worker, Utc::now())
    }

    pub fn on_unhealthy_at(&mut self, worker: &str, now: DateTime<Utc>) -> RestartAction {
        let policy = &self.policy;
        let state = self.states.entry(worker.to_string()).or_default();

        if let Some(window_start) = state.window_start {
            let elapsed = now
                .signed_duration_since(window_start)
                .to_std()
                .unwrap_or_default();
            if elapsed >= policy.reset_window {
                state.count = 0;
                state.window_start = None;
            }
        }

        if state.count >= policy.max_restarts {
            return RestartAction::GiveUp;
        }

        let delay = policy.delay_for(state.count);
        state.count += 1;
        if state.window_start.is_none() {
            state.window_start = Some(now);
        }
        state.last_restart = Some(now);

        if delay.is_zero() {
            RestartAction::RestartNow
        } else {
            RestartAction::RestartAfterDelay(delay)
        }
    }

    /// Forget the restart history of a worker
    pub fn reset(&mut self, worker: &str) {
        self.states.remove(worker);
    }

    pub fn state(&self, worker: &str) -> RestartState {
        self.states.get(worker).cloned().unwrap_or_default()
    }

    pub fn snapshot(&self) -> HashMap<String, RestartState> {
        self.states.clone()
    }

    /// Replace the restart table with persisted history
    pub fn restore(&mut self, states: HashMap<String, RestartState>) {
        self.states = states;
    }
}
