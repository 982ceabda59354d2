use crate::error::{MlinziError, Result};
use crate::health::probe::{Probe, ProbeReport};
use crate::health::registry::{ComponentKind, HealthRecord, HealthRegistry};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

/// One component the scanner probes
#[derive(Clone)]
pub struct ScanTarget {
    pub name: String,
    pub kind: ComponentKind,
    pub probe: Arc<dyn Probe>,
}

impl ScanTarget {
    pub fn new(name: impl Into<String>, kind: ComponentKind, probe: Arc<dyn Probe>) -> Self {
        Self {
            name: name.into(),
            kind,
            probe,
        }
    }
}

/// Runs probes for every registered component and records the verdicts
pub struct HealthScanner {
    targets: Vec<ScanTarget>,
    registry: Arc<HealthRegistry>,
    probe_timeout: Duration,
    pool_cap: usize,
}

impl HealthScanner {
    pub fn new(
        targets: Vec<ScanTarget>,
        registry: Arc<HealthRegistry>,
        probe_timeout: Duration,
        pool_cap: usize,
    ) -> Self {
        Self {
            targets,
            registry,
            probe_timeout,
            pool_cap: pool_cap.max(1),
        }
    }

    /// Probe every component once and replace the registry entries
    ///
    /// At most `min(component count, pool_cap)` probes run at a time. A probe
    /// that times out or panics is recorded as unhealthy without holding up
    /// the others.
    pub async fn scan(&self) -> HashMap<String, HealthRecord> {
        if self.targets.is_empty() {
            return HashMap::new();
        }

        let permits = self.targets.len().min(self.pool_cap);
        let semaphore = Arc::new(Semaphore::new(permits));
        let mut tasks = JoinSet::new();

        for target in &self.targets {
            let semaphore = Arc::clone(&semaphore);
            let target = target.clone();
            let timeout = self.probe_timeout;

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                run_probe(&target, timeout).await
            });
        }

        let mut results = HashMap::with_capacity(self.targets.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(record) => {
                    results.insert(record.component.clone(), record);
                }
                Err(e) => error!("Probe task failed: {}", e),
            }
        }

        self.registry.set_all(results.values().cloned()).await;
        debug!(components = results.len(), "Health scan complete");

        results
    }

    /// Probe a single component and record the verdict
    pub async fn probe_component(&self, name: &str) -> Result<HealthRecord> {
        let target = self
            .targets
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| MlinziError::ComponentNotFound(name.to_string()))?;

        let record = run_probe(target, self.probe_timeout).await;
        self.registry.set(record.clone()).await;

        Ok(record)
    }
}

async fn run_probe(target: &ScanTarget, timeout: Duration) -> HealthRecord {
    let probe = Arc::clone(&target.probe);

    // Separate task so a panicking probe surfaces as a JoinError we can attribute
    let outcome = tokio::spawn(async move { tokio::time::timeout(timeout, probe.check()).await }).await;

    let report = match outcome {
        Ok(Ok(report)) => report,
        Ok(Err(_)) => {
            warn!(component = %target.name, "Probe timed out after {:?}", timeout);
            ProbeReport::unhealthy("timeout")
        }
        Err(e) => {
            error!(component = %target.name, "Probe panicked: {}", e);
            ProbeReport::unhealthy("probe panicked")
        }
    };

    HealthRecord {
        component: target.name.clone(),
        kind: target.kind,
        status: report.status,
        checked_at: Utc::now(),
        reason: report.reason,
        metrics: report.metrics,
    }
}
