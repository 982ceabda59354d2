use crate::alert::{AlertLevel, AlertManager};
use crate::config::{SupervisorSettings, WorkerConfig};
use crate::error::{MlinziError, Result};
use crate::health::HealthScanner;
use crate::process::WorkerState;
use crate::supervisor::{RestartTimers, WorkerTable};
use crate::update::store::{ConfigSnapshot, ConfigStore};
use crate::update::UpdateOutcome;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Timing of the verify and rollback steps
#[derive(Debug, Clone)]
pub struct UpdateSettings {
    pub verify_timeout: Duration,
    pub verify_poll_interval: Duration,
    pub verify_healthy_polls: u32,
    pub rollback_attempts: u32,
    pub rollback_base_delay: Duration,
}

impl From<&SupervisorSettings> for UpdateSettings {
    fn from(settings: &SupervisorSettings) -> Self {
        Self {
            verify_timeout: settings.verify_timeout(),
            verify_poll_interval: settings.verify_poll_interval(),
            verify_healthy_polls: settings.verify_healthy_polls,
            rollback_attempts: settings.rollback_attempts,
            rollback_base_delay: settings.rollback_base_delay(),
        }
    }
}

/// Applies configuration changes to running workers
///
/// Every change goes through backup, validate, apply, verify and either
/// commit or rollback. Updates of the same target are serialized.
pub struct ConfigUpdateManager {
    workers: Arc<WorkerTable>,
    scanner: Arc<HealthScanner>,
    alerts: Arc<AlertManager>,
    timers: Arc<RestartTimers>,
    store: Arc<ConfigStore>,
    dependencies: HashSet<String>,
    settings: UpdateSettings,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ConfigUpdateManager {
    pub fn new(
        workers: Arc<WorkerTable>,
        scanner: Arc<HealthScanner>,
        alerts: Arc<AlertManager>,
        timers: Arc<RestartTimers>,
        store: Arc<ConfigStore>,
        dependencies: HashSet<String>,
        settings: UpdateSettings,
    ) -> Self {
        Self {
            workers,
            scanner,
            alerts,
            timers,
            store,
            dependencies,
            settings,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    /// Per-target update lock; only known workers get one
    async fn lock_for(&self, target: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(target.to_string()).or_default())
    }

    /// Whether an update of `target` is in flight
    pub async fn is_updating(&self, target: &str) -> bool {
        let lock = self.locks.lock().await.get(target).cloned();
        match lock {
            Some(lock) => lock.try_lock().is_err(),
            None => false,
        }
    }

    /// Apply `change` to the live configuration of `target` safely
    pub async fn safe_update<F>(&self, target: &str, change: F) -> UpdateOutcome
    where
        F: FnOnce(&mut WorkerConfig) -> Result<()> + Send,
    {
        if !self.workers.contains(target) {
            return reject(target, format!("unknown target {}", target));
        }

        let lock = self.lock_for(target).await;
        let _guard = lock.lock().await;

        info!(worker = %target, "Starting configuration update");

        // Backup
        let Some(live) = self.workers.config(target).await else {
            return reject(target, format!("unknown target {}", target));
        };
        let taken_at = Utc::now();

        // Validate
        let mut proposed = live.clone();
        if let Err(e) = change(&mut proposed) {
            return reject(target, e.to_string());
        }
        if let Err(e) = self.validate(target, &live, &proposed).await {
            return reject(target, e.to_string());
        }

        // Apply; the update's own restart replaces any pending one
        self.timers.cancel(target).await;
        let snapshot = self.store.record(target, live, taken_at).await;
        info!(worker = %target, snapshot = snapshot.id, "Applying configuration update");

        let failure = match self.apply(target, proposed).await {
            Ok(()) => match self.verify(target).await {
                Ok(()) => {
                    info!(worker = %target, snapshot = snapshot.id, "Configuration update committed");
                    return UpdateOutcome::Committed {
                        snapshot_id: snapshot.id,
                    };
                }
                Err(e) => e,
            },
            Err(e) => e,
        };

        self.rollback(target, &snapshot, failure.to_string()).await
    }

    /// Retained snapshots of a target, oldest first
    pub async fn snapshots(&self, target: &str) -> Vec<ConfigSnapshot> {
        self.store.history(target).await
    }

    async fn validate(
        &self,
        target: &str,
        live: &WorkerConfig,
        proposed: &WorkerConfig,
    ) -> Result<()> {
        let invalid = |msg: String| Err(MlinziError::ValidationError(msg));

        if self.workers.state(target).await == Some(WorkerState::Failed) {
            return invalid(format!("{} has failed; reset it first", target));
        }
        if !live.enabled {
            return invalid(format!("{} is disabled", target));
        }
        if proposed.name != live.name {
            return invalid("worker name cannot change".to_string());
        }
        if !proposed.enabled {
            return invalid("an update cannot disable the worker".to_string());
        }

        proposed
            .validate()
            .and_then(|()| proposed.check_resources())
            .map_err(|e| MlinziError::ValidationError(e.to_string()))?;

        if let Some(unknown) = proposed
            .requires
            .iter()
            .find(|dep| !self.dependencies.contains(*dep))
        {
            return invalid(format!("unknown dependency {}", unknown));
        }

        Ok(())
    }

    async fn apply(&self, target: &str, config: WorkerConfig) -> Result<()> {
        self.workers.set_config(target, config).await?;
        self.workers
            .restart(target)
            .await
            .map_err(|e| MlinziError::ApplyError(e.to_string()))
    }

    /// Wait for the required number of consecutive healthy probes
    async fn verify(&self, target: &str) -> Result<()> {
        let deadline = Instant::now() + self.settings.verify_timeout;
        let mut consecutive = 0;
        let mut last_reason = "no probe completed".to_string();

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(MlinziError::ProbeError(format!(
                    "{} not healthy within {:?}: {}",
                    target, self.settings.verify_timeout, last_reason
                )));
            }
            tokio::time::sleep(self.settings.verify_poll_interval.min(deadline - now)).await;

            match self.scanner.probe_component(target).await {
                Ok(record) if record.is_healthy() => {
                    consecutive += 1;
                    if consecutive >= self.settings.verify_healthy_polls {
                        return Ok(());
                    }
                }
                Ok(record) => {
                    consecutive = 0;
                    last_reason = format!("{} ({})", record.status, record.reason);
                }
                Err(e) => {
                    consecutive = 0;
                    last_reason = e.to_string();
                }
            }
        }
    }

    async fn restore(&self, target: &str, snapshot: &ConfigSnapshot) -> Result<()> {
        self.apply(target, snapshot.config.clone()).await?;
        self.verify(target).await
    }

    async fn rollback(
        &self,
        target: &str,
        snapshot: &ConfigSnapshot,
        reason: String,
    ) -> UpdateOutcome {
        warn!(
            worker = %target,
            snapshot = snapshot.id,
            "Configuration update failed, rolling back: {}",
            reason
        );

        let mut last_error = String::new();
        for attempt in 1..=self.settings.rollback_attempts {
            if attempt > 1 {
                let backoff = self
                    .settings
                    .rollback_base_delay
                    .saturating_mul(2_u32.saturating_pow(attempt - 2));
                tokio::time::sleep(backoff).await;
            }

            match self.restore(target, snapshot).await {
                Ok(()) => {
                    info!(worker = %target, attempt, "Rolled back to snapshot {}", snapshot.id);
                    self.alerts
                        .raise(AlertLevel::Warning, target, "update rolled back")
                        .await;
                    return UpdateOutcome::RolledBack {
                        reason,
                        recovered: true,
                    };
                }
                Err(e) => {
                    let e = MlinziError::RollbackError(e.to_string());
                    warn!(worker = %target, attempt, "{}", e);
                    last_error = e.to_string();
                }
            }
        }

        error!(
            worker = %target,
            "Rollback exhausted after {} attempts, marking worker failed",
            self.settings.rollback_attempts
        );

        if let Err(e) = self.workers.set_config(target, snapshot.config.clone()).await {
            error!(worker = %target, "Failed to restore configuration: {}", e);
        }
        if let Err(e) = self.workers.mark_failed(target).await {
            error!(worker = %target, "Failed to stop worker: {}", e);
        }
        self.alerts
            .raise(AlertLevel::Critical, target, "rollback failed")
            .await;

        UpdateOutcome::RolledBack {
            reason: format!("{}; {}", reason, last_error),
            recovered: false,
        }
    }
}

fn reject(target: &str, reason: String) -> UpdateOutcome {
    warn!(worker = %target, "Configuration update rejected: {}", reason);
    UpdateOutcome::Rejected { reason }
}
