use crate::config::WorkerConfig;
use crate::error::{MlinziError, Result};
use crate::health::{HealthStatus, Liveness, WorkerSource, WorkerView};
use crate::process::{ProcessExit, ProcessHandle, WorkerState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Summary of one worker as reported to administrators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub name: String,
    pub state: WorkerState,
    pub enabled: bool,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub restarts: u32,
    pub last_restart: Option<DateTime<Utc>>,
    pub last_exit: Option<ProcessExit>,
    pub health: HealthStatus,
    pub reason: String,
}

#[derive(Debug)]
struct WorkerSlot {
    config: WorkerConfig,
    state: WorkerState,
    handle: Option<ProcessHandle>,
    restarts: u32,
    last_restart: Option<DateTime<Utc>>,
    last_exit: Option<ProcessExit>,
}

impl WorkerSlot {
    fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            state: WorkerState::Stopped,
            handle: None,
            restarts: 0,
            last_restart: None,
            last_exit: None,
        }
    }

    /// Move to `next`, refusing (and logging) transitions the state machine forbids
    fn transition(&mut self, next: WorkerState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            warn!(
                worker = %self.config.name,
                "Refusing state transition {} -> {}",
                self.state,
                next
            );
            return Err(MlinziError::InvalidWorkerState(
                self.config.name.clone(),
                format!("cannot move from {} to {}", self.state, next),
            ));
        }

        if self.state != next {
            debug!(worker = %self.config.name, "State {} -> {}", self.state, next);
            self.state = next;
        }
        Ok(())
    }

    fn liveness(&self) -> Liveness {
        match &self.handle {
            None => Liveness::NotStarted,
            Some(handle) => match handle.exit_status() {
                Some(exit) => Liveness::Exited(exit),
                None => Liveness::Running {
                    pid: handle.pid(),
                    started_at: handle.started_at(),
                },
            },
        }
    }

    fn running_handle(&self) -> Option<&ProcessHandle> {
        self.handle.as_ref().filter(|h| h.is_running())
    }
}

/// Live configuration, lifecycle state and process of every worker
///
/// The set of workers is fixed at construction. Each slot has its own lock,
/// which is released before a process is stopped or started.
#[derive(Debug)]
pub struct WorkerTable {
    slots: BTreeMap<String, Mutex<WorkerSlot>>,
}

impl WorkerTable {
    pub fn new(configs: Vec<WorkerConfig>) -> Self {
        let slots = configs
            .into_iter()
            .map(|config| (config.name.clone(), Mutex::new(WorkerSlot::new(config))))
            .collect();
        Self { slots }
    }

    fn slot(&self, name: &str) -> Result<&Mutex<WorkerSlot>> {
        self.slots
            .get(name)
            .ok_or_else(|| MlinziError::WorkerNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    /// Worker names in sorted order
    pub fn names(&self) -> Vec<String> {
        self.slots.keys().cloned().collect()
    }

    pub async fn config(&self, name: &str) -> Option<WorkerConfig> {
        let slot = self.slots.get(name)?;
        Some(slot.lock().await.config.clone())
    }

    /// Install a new live configuration (takes effect on the next start)
    pub async fn set_config(&self, name: &str, config: WorkerConfig) -> Result<()> {
        let mut slot = self.slot(name)?.lock().await;
        slot.config = config;
        Ok(())
    }

    pub async fn state(&self, name: &str) -> Option<WorkerState> {
        let slot = self.slots.get(name)?;
        Some(slot.lock().await.state)
    }

    pub async fn states(&self) -> HashMap<String, WorkerState> {
        let mut states = HashMap::with_capacity(self.slots.len());
        for (name, slot) in &self.slots {
            states.insert(name.clone(), slot.lock().await.state);
        }
        states
    }

    pub async fn transition(&self, name: &str, next: WorkerState) -> Result<()> {
        self.slot(name)?.lock().await.transition(next)
    }

    /// Start the worker's process with its live configuration
    ///
    /// A worker whose process is already running is left alone. A failed
    /// spawn leaves the worker `Crashed`.
    pub async fn start(&self, name: &str) -> Result<()> {
        let slot = self.slot(name)?;

        let config = {
            let mut slot = slot.lock().await;
            if slot.running_handle().is_some() {
                return Ok(());
            }
            if !slot.config.enabled {
                return Err(MlinziError::InvalidWorkerState(
                    name.to_string(),
                    "worker is disabled".to_string(),
                ));
            }
            slot.transition(WorkerState::Starting)?;
            slot.config.clone()
        };

        match ProcessHandle::start(&config).await {
            Ok(handle) => {
                let orphan = {
                    let mut slot = slot.lock().await;
                    match slot.transition(WorkerState::Running) {
                        Ok(()) => {
                            slot.handle = Some(handle);
                            None
                        }
                        Err(e) => Some((handle, e)),
                    }
                };

                // Someone else moved the worker on while it was spawning
                if let Some((handle, e)) = orphan {
                    let _ = handle.stop(&config.stop_signal, config.stop_timeout()).await;
                    return Err(e);
                }

                Ok(())
            }
            Err(e) => {
                warn!(worker = %name, "Failed to start worker: {}", e);
                let mut slot = slot.lock().await;
                let _ = slot.transition(WorkerState::Crashed);
                Err(e)
            }
        }
    }

    /// Stop the worker's process and mark it `Stopped` (a `Failed` worker stays `Failed`)
    pub async fn stop(&self, name: &str) -> Result<()> {
        let slot = self.slot(name)?;

        let (handle, stop_signal, grace) = {
            let mut slot = slot.lock().await;
            (
                slot.handle.take(),
                slot.config.stop_signal.clone(),
                slot.config.stop_timeout(),
            )
        };

        if let Some(ref handle) = handle {
            handle.stop(&stop_signal, grace).await?;
        }

        let mut slot = slot.lock().await;
        if let Some(handle) = handle {
            slot.last_exit = handle.exit_status();
        }
        if slot.state != WorkerState::Failed {
            slot.transition(WorkerState::Stopped)?;
        }

        Ok(())
    }

    /// Stop any existing process and start a fresh one with the live configuration
    pub async fn restart(&self, name: &str) -> Result<()> {
        let slot = self.slot(name)?;

        let (handle, stop_signal, grace) = {
            let mut slot = slot.lock().await;
            match slot.state {
                WorkerState::Failed => {
                    return Err(MlinziError::InvalidWorkerState(
                        name.to_string(),
                        "worker has failed; reset it first".to_string(),
                    ))
                }
                WorkerState::Stopped => {}
                _ => slot.transition(WorkerState::Restarting)?,
            }
            slot.restarts += 1;
            slot.last_restart = Some(Utc::now());
            (
                slot.handle.take(),
                slot.config.stop_signal.clone(),
                slot.config.stop_timeout(),
            )
        };

        if let Some(handle) = handle {
            info!(worker = %name, pid = handle.pid(), "Restarting worker");
            let stopped = handle.stop(&stop_signal, grace).await;
            if let Err(e) = stopped {
                let mut slot = slot.lock().await;
                slot.handle = Some(handle);
                let _ = slot.transition(WorkerState::Crashed);
                return Err(e);
            }
            slot.lock().await.last_exit = handle.exit_status();
        }

        self.start(name).await
    }

    /// Stop the process for good and mark the worker `Failed`
    pub async fn mark_failed(&self, name: &str) -> Result<()> {
        let slot = self.slot(name)?;

        let (handle, stop_signal, grace) = {
            let mut slot = slot.lock().await;
            slot.transition(WorkerState::Failed)?;
            (
                slot.handle.take(),
                slot.config.stop_signal.clone(),
                slot.config.stop_timeout(),
            )
        };

        if let Some(handle) = handle {
            handle.stop(&stop_signal, grace).await?;
            slot.lock().await.last_exit = handle.exit_status();
        }

        Ok(())
    }

    /// Move a `Failed` worker back to `Stopped`
    pub async fn reset(&self, name: &str) -> Result<()> {
        let mut slot = self.slot(name)?.lock().await;
        if slot.state != WorkerState::Failed {
            return Err(MlinziError::InvalidWorkerState(
                name.to_string(),
                format!("only failed workers can be reset (worker is {})", slot.state),
            ));
        }
        slot.transition(WorkerState::Stopped)?;
        slot.restarts = 0;
        Ok(())
    }

    /// Fold a fresh health verdict into the lifecycle state
    ///
    /// Only workers that are up are affected. An exited process turns the
    /// worker `Crashed` regardless of the verdict. Returns the new state.
    pub async fn apply_health(&self, name: &str, status: HealthStatus) -> Option<WorkerState> {
        let mut slot = self.slots.get(name)?.lock().await;
        if !slot.state.is_up() {
            return None;
        }

        let next = match slot.liveness() {
            Liveness::Running { .. } => match status {
                HealthStatus::Healthy => WorkerState::Healthy,
                HealthStatus::Degraded => WorkerState::Degraded,
                HealthStatus::Unhealthy => WorkerState::Unhealthy,
                HealthStatus::Unknown => return None,
            },
            Liveness::Exited(exit) => {
                if slot.state != WorkerState::Crashed {
                    warn!(worker = %name, "Worker process {}", exit);
                }
                slot.last_exit = Some(exit);
                WorkerState::Crashed
            }
            Liveness::NotStarted => WorkerState::Crashed,
        };

        slot.transition(next).ok()?;
        Some(next)
    }

    pub async fn info(&self, name: &str) -> Option<WorkerInfo> {
        let slot = self.slots.get(name)?.lock().await;
        let handle = slot.running_handle();
        Some(WorkerInfo {
            name: name.to_string(),
            state: slot.state,
            enabled: slot.config.enabled,
            pid: handle.map(|h| h.pid()),
            started_at: handle.map(|h| h.started_at()),
            restarts: slot.restarts,
            last_restart: slot.last_restart,
            last_exit: slot.last_exit,
            health: HealthStatus::Unknown,
            reason: String::new(),
        })
    }

    /// Stop every running worker, leaving lifecycle states untouched
    pub async fn shutdown_all(&self) {
        for (name, slot) in &self.slots {
            let (handle, stop_signal, grace) = {
                let mut slot = slot.lock().await;
                (
                    slot.handle.take(),
                    slot.config.stop_signal.clone(),
                    slot.config.stop_timeout(),
                )
            };

            if let Some(handle) = handle {
                if let Err(e) = handle.stop(&stop_signal, grace).await {
                    warn!(worker = %name, "Failed to stop worker during shutdown: {}", e);
                }
                slot.lock().await.last_exit = handle.exit_status();
            }
        }
    }
}

#[async_trait]
impl WorkerSource for WorkerTable {
    async fn inspect(&self, worker: &str) -> Option<WorkerView> {
        let slot = self.slots.get(worker)?.lock().await;
        Some(WorkerView {
            config: slot.config.clone(),
            liveness: slot.liveness(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn table() -> WorkerTable {
        WorkerTable::new(vec![
            WorkerConfig::new("sleeper", "/bin/sleep").with_args(["30"]),
            WorkerConfig::new("short", "/bin/sh").with_args(["-c", "exit 1"]),
        ])
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let table = table();

        table.start("sleeper").await.unwrap();
        assert_eq!(table.state("sleeper").await, Some(WorkerState::Running));
        let info = table.info("sleeper").await.unwrap();
        assert!(info.pid.is_some());

        table.stop("sleeper").await.unwrap();
        assert_eq!(table.state("sleeper").await, Some(WorkerState::Stopped));
        assert!(table.info("sleeper").await.unwrap().pid.is_none());
    }

    #[tokio::test]
    async fn test_start_missing_script_crashes() {
        let table = WorkerTable::new(vec![WorkerConfig::new("ghost", "/nonexistent/ghost")]);

        assert!(matches!(
            table.start("ghost").await,
            Err(MlinziError::SpawnError(_))
        ));
        assert_eq!(table.state("ghost").await, Some(WorkerState::Crashed));
    }

    #[tokio::test]
    async fn test_unknown_worker() {
        let table = table();
        assert!(matches!(
            table.start("missing").await,
            Err(MlinziError::WorkerNotFound(_))
        ));
        assert!(table.state("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_restart_replaces_process() {
        let table = table();
        table.start("sleeper").await.unwrap();
        let first = table.info("sleeper").await.unwrap().pid;

        table.restart("sleeper").await.unwrap();
        let info = table.info("sleeper").await.unwrap();
        assert_ne!(info.pid, first);
        assert_eq!(info.restarts, 1);
        assert_eq!(info.state, WorkerState::Running);

        table.stop("sleeper").await.unwrap();
    }

    #[tokio::test]
    async fn test_apply_health_detects_crash() {
        let table = table();
        table.start("short").await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let state = table.apply_health("short", HealthStatus::Unhealthy).await;
        assert_eq!(state, Some(WorkerState::Crashed));
        assert_eq!(
            table.info("short").await.unwrap().last_exit.unwrap().code,
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_apply_health_ignores_stopped() {
        let table = table();
        assert!(table
            .apply_health("sleeper", HealthStatus::Healthy)
            .await
            .is_none());
        assert_eq!(table.state("sleeper").await, Some(WorkerState::Stopped));
    }

    #[tokio::test]
    async fn test_failed_needs_reset() {
        let table = table();
        table.start("sleeper").await.unwrap();
        table.mark_failed("sleeper").await.unwrap();
        assert_eq!(table.state("sleeper").await, Some(WorkerState::Failed));
        assert!(table.info("sleeper").await.unwrap().pid.is_none());

        // No way out of Failed except reset
        assert!(table.restart("sleeper").await.is_err());
        assert!(table.start("sleeper").await.is_err());

        table.reset("sleeper").await.unwrap();
        assert_eq!(table.state("sleeper").await, Some(WorkerState::Stopped));

        table.start("sleeper").await.unwrap();
        table.stop("sleeper").await.unwrap();
    }

    #[tokio::test]
    async fn test_reset_requires_failed() {
        let table = table();
        assert!(matches!(
            table.reset("sleeper").await,
            Err(MlinziError::InvalidWorkerState(_, _))
        ));
    }

    #[tokio::test]
    async fn test_inspect_reports_liveness() {
        let table = table();
        let view = table.inspect("sleeper").await.unwrap();
        assert_eq!(view.liveness, Liveness::NotStarted);

        table.start("sleeper").await.unwrap();
        let view = table.inspect("sleeper").await.unwrap();
        assert!(matches!(view.liveness, Liveness::Running { .. }));

        table.shutdown_all().await;
    }
}
