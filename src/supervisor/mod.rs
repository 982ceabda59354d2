// Supervisor module - control loop tying health, restarts, updates and alerts together

pub mod restart;
pub mod timers;
pub mod workers;

pub use restart::{RestartAction, RestartPolicy, RestartPolicyEngine, RestartState};
pub use timers::RestartTimers;
pub use workers::{WorkerInfo, WorkerTable};

use crate::alert::{Alert, AlertLevel, AlertManager, WebhookNotifier};
use crate::config::{DependencyConfig, SupervisorFile, SupervisorSettings, WorkerConfig};
use crate::error::{MlinziError, Result};
use crate::health::{
    ComponentKind, DependencyProbe, HealthRecord, HealthRegistry, HealthScanner, HealthStatus,
    ScanTarget, WorkerProbe, WorkerSource,
};
use crate::process::{ResourceMonitor, WorkerState};
use crate::state::{StateStore, SupervisorState};
use crate::update::{
    ConfigPatch, ConfigSnapshot, ConfigStore, ConfigUpdateManager, UpdateOutcome, UpdateSettings,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// A dependency that has been unhealthy since `since`
#[derive(Debug, Clone, Copy)]
struct Outage {
    since: Instant,
    alerted: bool,
}

struct Inner {
    settings: SupervisorSettings,
    dependencies: Vec<DependencyConfig>,
    workers: Arc<WorkerTable>,
    registry: Arc<HealthRegistry>,
    scanner: Arc<HealthScanner>,
    policy: Mutex<RestartPolicyEngine>,
    timers: Arc<RestartTimers>,
    updates: ConfigUpdateManager,
    alerts: Arc<AlertManager>,
    state_store: StateStore,
    outages: Mutex<HashMap<String, Outage>>,
    cycle: Mutex<()>,
    started_at: DateTime<Utc>,
}

/// The self-healing supervisor
///
/// Cheap to clone; all clones share the same workers and bookkeeping.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    /// Build the supervisor from a validated configuration file
    ///
    /// Nothing is started until [`Supervisor::start`] is called.
    pub fn new(file: SupervisorFile) -> Result<Self> {
        file.validate()?;

        let settings = file.supervisor;
        let workers = Arc::new(WorkerTable::new(file.workers.clone()));
        let registry = Arc::new(HealthRegistry::new());

        let source: Arc<dyn WorkerSource> = workers.clone();
        let monitor = Arc::new(Mutex::new(ResourceMonitor::new()));

        let mut targets = Vec::new();
        for worker in file.workers.iter().filter(|w| w.enabled) {
            let probe = WorkerProbe::new(worker.name.clone(), Arc::clone(&source), Arc::clone(&monitor));
            targets.push(ScanTarget::new(
                worker.name.clone(),
                ComponentKind::Worker,
                Arc::new(probe),
            ));
        }

        let dependencies: Vec<DependencyConfig> =
            file.dependencies.into_iter().filter(|d| d.enabled).collect();
        for dependency in &dependencies {
            let probe = DependencyProbe::from_config(dependency, settings.probe_timeout())?;
            targets.push(ScanTarget::new(
                dependency.name.clone(),
                ComponentKind::Dependency,
                Arc::new(probe),
            ));
        }

        let scanner = Arc::new(HealthScanner::new(
            targets,
            Arc::clone(&registry),
            settings.probe_timeout(),
            settings.probe_pool_cap,
        ));

        let mut alerts = AlertManager::new();
        if let Some(ref path) = settings.alert_log {
            alerts = alerts.with_log_file(path);
        }
        if let Some(ref url) = settings.webhook_url {
            alerts = alerts.with_notifier(Arc::new(WebhookNotifier::new(url.clone())?));
        }
        let alerts = Arc::new(alerts);

        let timers = Arc::new(RestartTimers::new());

        let updates = ConfigUpdateManager::new(
            Arc::clone(&workers),
            Arc::clone(&scanner),
            Arc::clone(&alerts),
            Arc::clone(&timers),
            Arc::new(ConfigStore::new(settings.snapshot_limit)),
            dependencies.iter().map(|d| d.name.clone()).collect(),
            UpdateSettings::from(&settings),
        );

        let policy = RestartPolicyEngine::new(RestartPolicy::new(
            settings.max_restarts,
            settings.restart_base_delay(),
            settings.restart_max_delay(),
            settings.restart_window(),
        ));

        let state_store = StateStore::new(&settings.state_path);

        Ok(Self {
            inner: Arc::new(Inner {
                settings,
                dependencies,
                workers,
                registry,
                scanner,
                policy: Mutex::new(policy),
                timers,
                updates,
                alerts,
                state_store,
                outages: Mutex::new(HashMap::new()),
                cycle: Mutex::new(()),
                started_at: Utc::now(),
            }),
        })
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.inner.settings
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    /// Restore persisted state and start every enabled worker
    ///
    /// Workers persisted as `Failed` stay failed until reset. A worker that
    /// fails to start is left `Crashed` for the first cycle to pick up.
    pub async fn start(&self) -> Result<()> {
        self.restore().await;

        for name in self.inner.workers.names() {
            let Some(config) = self.inner.workers.config(&name).await else {
                continue;
            };
            if !config.enabled {
                debug!(worker = %name, "Worker disabled, not starting");
                continue;
            }
            if self.inner.workers.state(&name).await == Some(WorkerState::Failed) {
                warn!(worker = %name, "Worker failed before shutdown, waiting for reset");
                continue;
            }
            if let Err(e) = self.inner.workers.start(&name).await {
                error!(worker = %name, "Failed to start worker: {}", e);
            }
        }

        info!(
            workers = self.inner.workers.names().len(),
            dependencies = self.inner.dependencies.len(),
            "Supervisor started"
        );

        Ok(())
    }

    /// Run health cycles on the scan interval until `shutdown` flips to true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.inner.settings.scan_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Starting control loop (scan interval: {:?})",
            self.inner.settings.scan_interval()
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Control loop stopping");
                        break;
                    }
                }
            }
        }
    }

    /// One scan followed by the reactions to its verdicts
    pub async fn run_cycle(&self) -> HashMap<String, HealthRecord> {
        let _cycle = self.inner.cycle.lock().await;

        let results = self.inner.scanner.scan().await;

        for name in self.inner.workers.names() {
            if let Some(record) = results.get(&name) {
                self.inner.workers.apply_health(&name, record.status).await;
            }

            match self.inner.workers.state(&name).await {
                Some(WorkerState::Healthy) => self.resolve_alerts(&name).await,
                Some(WorkerState::Degraded | WorkerState::Unhealthy | WorkerState::Crashed) => {
                    self.handle_unhealthy(&name).await;
                }
                Some(WorkerState::Restarting) => self.resume_restart(&name).await,
                _ => {}
            }
        }

        self.check_dependencies(&results).await;
        self.persist().await;

        results
    }

    /// Trigger a scan outside the regular schedule
    pub async fn scan_now(&self) -> Vec<HealthRecord> {
        let mut records: Vec<HealthRecord> = self.run_cycle().await.into_values().collect();
        records.sort_by(|a, b| a.component.cmp(&b.component));
        records
    }

    /// Consult the restart policy for a worker that is not healthy
    async fn handle_unhealthy(&self, name: &str) {
        if self.inner.updates.is_updating(name).await {
            debug!(worker = %name, "Update in progress, leaving restart policy alone");
            return;
        }

        if self.inner.timers.is_pending(name).await {
            debug!(worker = %name, "Restart already scheduled");
            return;
        }

        if let Some(dependency) = self.blocking_dependency(name).await {
            info!(
                worker = %name,
                "Deferring restart while dependency {} is unhealthy",
                dependency
            );
            return;
        }

        let action = self.inner.policy.lock().await.on_unhealthy(name);

        match action {
            RestartAction::GiveUp => {
                error!(worker = %name, "Restart budget exhausted, giving up");
                if let Err(e) = self.inner.workers.mark_failed(name).await {
                    error!(worker = %name, "Failed to stop worker: {}", e);
                }
                self.inner
                    .alerts
                    .raise(AlertLevel::Critical, name, "max restarts reached")
                    .await;
            }
            RestartAction::RestartNow | RestartAction::RestartAfterDelay(_) => {
                let delay = match action {
                    RestartAction::RestartAfterDelay(delay) => delay,
                    _ => Duration::ZERO,
                };

                if let Err(e) = self
                    .inner
                    .workers
                    .transition(name, WorkerState::Restarting)
                    .await
                {
                    warn!(worker = %name, "Cannot schedule restart: {}", e);
                    return;
                }

                info!(worker = %name, "Restarting worker in {:?}", delay);

                let task = self.clone().execute_restart(name.to_string());
                self.inner.timers.schedule(name, delay, task).await;
            }
        }
    }

    /// Reschedule a worker left `Restarting` without a timer
    ///
    /// Happens when its timer fired while an update held the worker and the
    /// update was then rejected. The budget was already charged when the
    /// restart was first scheduled.
    async fn resume_restart(&self, name: &str) {
        if self.inner.timers.is_pending(name).await || self.inner.updates.is_updating(name).await {
            return;
        }

        info!(worker = %name, "Resuming dropped restart");
        let task = self.clone().execute_restart(name.to_string());
        self.inner.timers.schedule(name, Duration::ZERO, task).await;
    }

    /// Body of a restart timer
    ///
    /// Runs under the cycle lock, like every other caller of the restart
    /// policy. Boxed because a failed restart re-enters the policy, which may
    /// schedule this again.
    fn execute_restart(self, name: String) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            let _cycle = self.inner.cycle.lock().await;
            self.inner.timers.complete(&name).await;

            if self.inner.workers.state(&name).await != Some(WorkerState::Restarting) {
                debug!(worker = %name, "Worker moved on, dropping scheduled restart");
                return;
            }
            if self.inner.updates.is_updating(&name).await {
                debug!(worker = %name, "Update in progress, dropping scheduled restart");
                return;
            }

            if let Err(e) = self.inner.workers.restart(&name).await {
                warn!(worker = %name, "Restart failed: {}", e);
                // Counts toward the same budget
                self.handle_unhealthy(&name).await;
            }
        })
    }

    /// First required dependency that is currently unhealthy
    async fn blocking_dependency(&self, name: &str) -> Option<String> {
        let config = self.inner.workers.config(name).await?;
        for dependency in &config.requires {
            if self.inner.registry.status(dependency).await == HealthStatus::Unhealthy {
                return Some(dependency.clone());
            }
        }
        None
    }

    async fn resolve_alerts(&self, component: &str) {
        if self.inner.alerts.has_open(component).await {
            let resolved = self.inner.alerts.resolve(component).await;
            info!(
                component = %component,
                "Resolved {} alert(s) after healthy check",
                resolved.len()
            );
        }
    }

    /// Escalate dependencies that stay unhealthy past the grace period
    async fn check_dependencies(&self, results: &HashMap<String, HealthRecord>) {
        let grace = self.inner.settings.dependency_grace();
        let now = Instant::now();

        for dependency in &self.inner.dependencies {
            let Some(record) = results.get(&dependency.name) else {
                continue;
            };

            match record.status {
                HealthStatus::Unhealthy => {
                    let raise = {
                        let mut outages = self.inner.outages.lock().await;
                        let outage = outages.entry(dependency.name.clone()).or_insert(Outage {
                            since: now,
                            alerted: false,
                        });
                        if !outage.alerted && now.duration_since(outage.since) >= grace {
                            outage.alerted = true;
                            true
                        } else {
                            false
                        }
                    };

                    if raise {
                        self.inner
                            .alerts
                            .raise(
                                AlertLevel::Critical,
                                &dependency.name,
                                format!("dependency unhealthy for over {:?}: {}", grace, record.reason),
                            )
                            .await;
                    }
                }
                HealthStatus::Healthy => {
                    if self.inner.outages.lock().await.remove(&dependency.name).is_some() {
                        info!(component = %dependency.name, "Dependency recovered");
                    }
                    self.resolve_alerts(&dependency.name).await;
                }
                HealthStatus::Degraded | HealthStatus::Unknown => {}
            }
        }
    }

    /// Restart a worker now, outside the restart policy
    pub async fn restart_worker(&self, name: &str) -> Result<()> {
        if !self.inner.workers.contains(name) {
            return Err(MlinziError::WorkerNotFound(name.to_string()));
        }
        if self.inner.updates.is_updating(name).await {
            return Err(MlinziError::InvalidWorkerState(
                name.to_string(),
                "a configuration update is in progress".to_string(),
            ));
        }

        let _cycle = self.inner.cycle.lock().await;
        self.inner.timers.cancel(name).await;
        info!(worker = %name, "Manual restart requested");
        self.inner.workers.restart(name).await?;
        self.persist().await;
        Ok(())
    }

    /// Return a failed worker to `Stopped` with a clean restart history
    pub async fn reset_worker(&self, name: &str) -> Result<()> {
        self.inner.workers.reset(name).await?;
        self.inner.timers.cancel(name).await;
        self.inner.policy.lock().await.reset(name);
        info!(worker = %name, "Worker reset");
        self.persist().await;
        Ok(())
    }

    /// Apply a patch to a worker through the safe update protocol
    pub async fn safe_update(&self, name: &str, patch: ConfigPatch) -> UpdateOutcome {
        self.safe_update_with(name, move |config| {
            patch.apply(config);
            Ok(())
        })
        .await
    }

    /// Apply an arbitrary change to a worker through the safe update protocol
    pub async fn safe_update_with<F>(&self, name: &str, change: F) -> UpdateOutcome
    where
        F: FnOnce(&mut WorkerConfig) -> Result<()> + Send,
    {
        let outcome = self.inner.updates.safe_update(name, change).await;
        if !matches!(outcome, UpdateOutcome::Rejected { .. }) {
            self.persist().await;
        }
        outcome
    }

    pub async fn snapshots(&self, name: &str) -> Vec<ConfigSnapshot> {
        self.inner.updates.snapshots(name).await
    }

    /// Every worker with its latest health verdict
    pub async fn workers(&self) -> Vec<WorkerInfo> {
        let mut infos = Vec::new();
        for name in self.inner.workers.names() {
            if let Some(mut info) = self.inner.workers.info(&name).await {
                if let Some(record) = self.inner.registry.get(&name).await {
                    info.health = record.status;
                    info.reason = record.reason;
                }
                infos.push(info);
            }
        }
        infos
    }

    pub async fn worker_config(&self, name: &str) -> Option<WorkerConfig> {
        self.inner.workers.config(name).await
    }

    pub async fn worker_state(&self, name: &str) -> Option<WorkerState> {
        self.inner.workers.state(name).await
    }

    pub async fn restart_state(&self, name: &str) -> RestartState {
        self.inner.policy.lock().await.state(name)
    }

    pub async fn pending_restarts(&self) -> usize {
        self.inner.timers.pending_count().await
    }

    pub async fn health(&self) -> Vec<HealthRecord> {
        self.inner.registry.all().await
    }

    pub async fn alerts(&self, include_resolved: bool) -> Vec<Alert> {
        self.inner.alerts.list(include_resolved).await
    }

    pub async fn resolve_alert(&self, id: u64) -> Result<Alert> {
        let alert = self.inner.alerts.resolve_id(id).await?;
        self.persist().await;
        Ok(alert)
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<Alert> {
        self.inner.alerts.subscribe()
    }

    /// Cancel pending restarts, stop every worker and save state
    pub async fn shutdown(&self) {
        info!("Supervisor shutting down");
        self.inner.timers.cancel_all().await;
        self.inner.workers.shutdown_all().await;
        self.persist().await;
    }

    async fn restore(&self) {
        let state = match self.inner.state_store.load() {
            Ok(state) => state,
            Err(e) => {
                warn!("Ignoring unreadable state file: {}", e);
                return;
            }
        };

        let known: HashSet<String> = self.inner.workers.names().into_iter().collect();

        self.inner.policy.lock().await.restore(
            state
                .restarts
                .into_iter()
                .filter(|(name, _)| known.contains(name))
                .collect(),
        );
        self.inner.updates.store().restore(state.snapshots).await;
        self.inner.alerts.restore(state.alerts).await;
        self.inner
            .registry
            .set_all(state.health.into_values())
            .await;

        for (name, worker_state) in state.workers {
            if worker_state == WorkerState::Failed && known.contains(&name) {
                if let Err(e) = self.inner.workers.transition(&name, WorkerState::Failed).await {
                    warn!(worker = %name, "Failed to restore failed marker: {}", e);
                }
            }
        }

        debug!("Restored state from {}", self.inner.state_store.path().display());
    }

    async fn persist(&self) {
        let state = SupervisorState {
            health: self
                .inner
                .registry
                .all()
                .await
                .into_iter()
                .map(|r| (r.component.clone(), r))
                .collect(),
            restarts: self.inner.policy.lock().await.snapshot(),
            snapshots: self.inner.updates.store().all().await,
            alerts: self.inner.alerts.list(true).await,
            workers: self.inner.workers.states().await,
            ..SupervisorState::new()
        };

        if let Err(e) = self.inner.state_store.save(&state) {
            error!("Failed to persist supervisor state: {}", e);
        }
    }
}
