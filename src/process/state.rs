use serde::{Deserialize, Serialize};

/// Lifecycle state of a supervised worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkerState {
    Stopped,
    Starting,
    Running,
    Healthy,
    Degraded,
    Unhealthy,
    Crashed,
    Restarting,
    Failed,
}

impl WorkerState {
    /// States in which a live process is expected
    pub fn is_up(&self) -> bool {
        matches!(
            self,
            WorkerState::Running
                | WorkerState::Healthy
                | WorkerState::Degraded
                | WorkerState::Unhealthy
        )
    }

    /// Whether the state machine allows moving from `self` to `next`
    ///
    /// `Stopped` and `Failed` only leave through explicit actions: a start for
    /// `Stopped`, a manual reset (to `Stopped`) for `Failed`.
    pub fn can_transition_to(&self, next: WorkerState) -> bool {
        use WorkerState::*;

        if *self == next {
            return true;
        }

        match (*self, next) {
            (Failed, Stopped) => true,
            (Failed, _) => false,
            (_, Failed) => true,
            (_, Stopped) => true,
            (Stopped, Starting) => true,
            (Starting, Running | Crashed) => true,
            (Running | Healthy | Degraded | Unhealthy, Healthy | Degraded | Unhealthy) => true,
            (Running | Healthy | Degraded | Unhealthy, Crashed | Restarting) => true,
            (Crashed, Restarting) => true,
            (Restarting, Starting | Crashed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerState::Stopped => write!(f, "stopped"),
            WorkerState::Starting => write!(f, "starting"),
            WorkerState::Running => write!(f, "running"),
            WorkerState::Healthy => write!(f, "healthy"),
            WorkerState::Degraded => write!(f, "degraded"),
            WorkerState::Unhealthy => write!(f, "unhealthy"),
            WorkerState::Crashed => write!(f, "crashed"),
            WorkerState::Restarting => write!(f, "restarting"),
            WorkerState::Failed => write!(f, "failed"),
        }
    }
}
