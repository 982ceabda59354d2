use crate::config::WorkerConfig;
use crate::error::{MlinziError, Result};
use crate::health::probe::{Probe, ProbeReport};
use crate::health::registry::HealthMetrics;
use crate::process::{ProcessExit, ResourceMonitor};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Whether a worker's process is up
#[derive(Debug, Clone, PartialEq)]
pub enum Liveness {
    Running { pid: u32, started_at: DateTime<Utc> },
    Exited(ProcessExit),
    NotStarted,
}

/// Live configuration and process liveness of one worker
#[derive(Debug, Clone)]
pub struct WorkerView {
    pub config: WorkerConfig,
    pub liveness: Liveness,
}

/// Where the worker probe looks up the current state of a worker
#[async_trait]
pub trait WorkerSource: Send + Sync {
    async fn inspect(&self, worker: &str) -> Option<WorkerView>;
}

/// Activity report written by a worker after each unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityReport {
    pub last_success: DateTime<Utc>,
    #[serde(default)]
    pub error_rate: Option<f64>,
}

impl ActivityReport {
    /// Read the report, `Ok(None)` if the worker has not written one yet
    pub async fn read(path: &Path) -> Result<Option<Self>> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&contents).map(Some).map_err(|e| {
            MlinziError::DeserializationError(format!(
                "Invalid status file {}: {}",
                path.display(),
                e
            ))
        })
    }
}

/// Liveness, activity, error rate and memory check of one worker
pub struct WorkerProbe {
    name: String,
    source: Arc<dyn WorkerSource>,
    monitor: Arc<Mutex<ResourceMonitor>>,
}

impl WorkerProbe {
    pub fn new(
        name: impl Into<String>,
        source: Arc<dyn WorkerSource>,
        monitor: Arc<Mutex<ResourceMonitor>>,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            monitor,
        }
    }

    async fn check_running(
        &self,
        config: &WorkerConfig,
        pid: u32,
        started_at: DateTime<Utc>,
    ) -> ProbeReport {
        let sample = self.monitor.lock().await.sample(pid);
        let Some(sample) = sample else {
            return ProbeReport::unhealthy("process not found");
        };

        let mut metrics = HealthMetrics {
            memory_bytes: Some(sample.memory_bytes),
            cpu_percent: Some(sample.cpu_percent),
            ..HealthMetrics::default()
        };

        if let Some(ref status_file) = config.status_file {
            let now = Utc::now();
            match ActivityReport::read(status_file).await {
                // Only reports written since this process started count
                Ok(Some(report)) if report.last_success >= started_at => {
                    metrics.error_rate = report.error_rate;

                    let age = now.signed_duration_since(report.last_success);
                    if age.to_std().unwrap_or_default() > config.freshness_window() {
                        return ProbeReport::unhealthy(format!(
                            "stale: last success {}s ago",
                            age.num_seconds()
                        ))
                        .with_metrics(metrics);
                    }

                    if let Some(rate) = report.error_rate {
                        if rate >= config.error_rate_threshold {
                            return ProbeReport::degraded(format!(
                                "error rate {:.3} at or above {:.3}",
                                rate, config.error_rate_threshold
                            ))
                            .with_metrics(metrics);
                        }
                    }
                }
                Ok(_) => {
                    let uptime = now.signed_duration_since(started_at);
                    if uptime.to_std().unwrap_or_default() > config.freshness_window() {
                        return ProbeReport::unhealthy("stale: no status report since start")
                            .with_metrics(metrics);
                    }
                    if let Some(report) = self.memory_verdict(config, &metrics) {
                        return report;
                    }
                    return ProbeReport::healthy("awaiting first report").with_metrics(metrics);
                }
                Err(e) => {
                    return ProbeReport::unhealthy(format!("unreadable status file: {}", e))
                        .with_metrics(metrics);
                }
            }
        }

        if let Some(report) = self.memory_verdict(config, &metrics) {
            return report;
        }

        ProbeReport::healthy("running").with_metrics(metrics)
    }

    fn memory_verdict(&self, config: &WorkerConfig, metrics: &HealthMetrics) -> Option<ProbeReport> {
        let limit = config.max_memory?;
        let used = metrics.memory_bytes?;
        if used > limit {
            Some(
                ProbeReport::degraded(format!("memory {} bytes above {}", used, limit))
                    .with_metrics(metrics.clone()),
            )
        } else {
            None
        }
    }
}

#[async_trait]
impl Probe for WorkerProbe {
    async fn check(&self) -> ProbeReport {
        let Some(view) = self.source.inspect(&self.name).await else {
            return ProbeReport::unhealthy("unknown worker");
        };

        match view.liveness {
            Liveness::NotStarted => ProbeReport::unhealthy("not running"),
            Liveness::Exited(exit) => ProbeReport::unhealthy(format!("process {}", exit)),
            Liveness::Running { pid, started_at } => {
                self.check_running(&view.config, pid, started_at).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::registry::HealthStatus;
    use chrono::Duration as ChronoDuration;
    use std::collections::HashMap;
    use tempfile::TempDir;
    use tokio::process::{Child, Command};

    struct FixedSource {
        views: HashMap<String, WorkerView>,
    }

    #[async_trait]
    impl WorkerSource for FixedSource {
        async fn inspect(&self, worker: &str) -> Option<WorkerView> {
            self.views.get(worker).cloned()
        }
    }

    fn probe_for(config: WorkerConfig, liveness: Liveness) -> WorkerProbe {
        let name = config.name.clone();
        let mut views = HashMap::new();
        views.insert(name.clone(), WorkerView { config, liveness });
        WorkerProbe::new(
            name,
            Arc::new(FixedSource { views }),
            Arc::new(Mutex::new(ResourceMonitor::new())),
        )
    }

    fn spawn_sleeper() -> (Child, u32) {
        let child = Command::new("/bin/sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .expect("Failed to spawn process");
        let pid = child.id().expect("Failed to get PID");
        (child, pid)
    }

    fn write_report(path: &Path, last_success: DateTime<Utc>, error_rate: f64) {
        let report = ActivityReport {
            last_success,
            error_rate: Some(error_rate),
        };
        std::fs::write(path, serde_json::to_string(&report).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn test_not_running_is_unhealthy() {
        let probe = probe_for(WorkerConfig::new("prices", "/bin/sleep"), Liveness::NotStarted);
        let report = probe.check().await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_exited_is_unhealthy() {
        let exit = ProcessExit {
            code: Some(1),
            signal: None,
            exited_at: Utc::now(),
        };
        let probe = probe_for(WorkerConfig::new("prices", "/bin/sleep"), Liveness::Exited(exit));
        let report = probe.check().await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(report.reason.contains("code 1"));
    }

    #[tokio::test]
    async fn test_running_without_status_file_is_healthy() {
        let (_child, pid) = spawn_sleeper();
        let probe = probe_for(
            WorkerConfig::new("prices", "/bin/sleep"),
            Liveness::Running {
                pid,
                started_at: Utc::now(),
            },
        );

        let report = probe.check().await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.metrics.memory_bytes.is_some());
    }

    #[tokio::test]
    async fn test_missing_report_within_window() {
        let temp_dir = TempDir::new().unwrap();
        let (_child, pid) = spawn_sleeper();
        let mut config = WorkerConfig::new("prices", "/bin/sleep");
        config.status_file = Some(temp_dir.path().join("prices.json"));

        let fresh = probe_for(
            config.clone(),
            Liveness::Running {
                pid,
                started_at: Utc::now(),
            },
        );
        let report = fresh.check().await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.reason, "awaiting first report");

        let old = probe_for(
            config,
            Liveness::Running {
                pid,
                started_at: Utc::now() - ChronoDuration::hours(1),
            },
        );
        let report = old.check().await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(report.reason.starts_with("stale"));
    }

    #[tokio::test]
    async fn test_stale_report() {
        let temp_dir = TempDir::new().unwrap();
        let status_file = temp_dir.path().join("prices.json");
        write_report(&status_file, Utc::now() - ChronoDuration::minutes(10), 0.0);

        let (_child, pid) = spawn_sleeper();
        let mut config = WorkerConfig::new("prices", "/bin/sleep");
        config.status_file = Some(status_file);

        let probe = probe_for(
            config,
            Liveness::Running {
                pid,
                started_at: Utc::now() - ChronoDuration::hours(1),
            },
        );
        let report = probe.check().await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(report.reason.starts_with("stale"));
    }

    #[tokio::test]
    async fn test_report_from_previous_process_is_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let status_file = temp_dir.path().join("prices.json");
        // Written by an earlier process, stale and failing
        write_report(&status_file, Utc::now() - ChronoDuration::minutes(10), 0.5);

        let (_child, pid) = spawn_sleeper();
        let mut config = WorkerConfig::new("prices", "/bin/sleep");
        config.status_file = Some(status_file.clone());

        let restarted = probe_for(
            config.clone(),
            Liveness::Running {
                pid,
                started_at: Utc::now(),
            },
        );
        let report = restarted.check().await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.reason, "awaiting first report");
        assert_eq!(report.metrics.error_rate, None);

        // Still nothing new once the freshness window has passed since the start
        config.freshness_window_secs = 60;
        let silent = probe_for(
            config,
            Liveness::Running {
                pid,
                started_at: Utc::now() - ChronoDuration::minutes(5),
            },
        );
        let report = silent.check().await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert_eq!(report.reason, "stale: no status report since start");
    }

    #[tokio::test]
    async fn test_error_rate_threshold() {
        let temp_dir = TempDir::new().unwrap();
        let status_file = temp_dir.path().join("prices.json");
        let (_child, pid) = spawn_sleeper();
        let mut config = WorkerConfig::new("prices", "/bin/sleep");
        config.status_file = Some(status_file.clone());

        let probe = probe_for(
            config,
            Liveness::Running {
                pid,
                started_at: Utc::now(),
            },
        );

        write_report(&status_file, Utc::now(), 0.02);
        let report = probe.check().await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.metrics.error_rate, Some(0.02));

        write_report(&status_file, Utc::now(), 0.05);
        let report = probe.check().await;
        assert_eq!(report.status, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_memory_ceiling() {
        let (_child, pid) = spawn_sleeper();
        let mut config = WorkerConfig::new("prices", "/bin/sleep");
        config.max_memory = Some(1);

        let probe = probe_for(
            config,
            Liveness::Running {
                pid,
                started_at: Utc::now(),
            },
        );
        let report = probe.check().await;
        assert_eq!(report.status, HealthStatus::Degraded);
        assert!(report.reason.contains("memory"));
    }

    #[tokio::test]
    async fn test_corrupt_status_file() {
        let temp_dir = TempDir::new().unwrap();
        let status_file = temp_dir.path().join("prices.json");
        std::fs::write(&status_file, "not json").unwrap();

        let (_child, pid) = spawn_sleeper();
        let mut config = WorkerConfig::new("prices", "/bin/sleep");
        config.status_file = Some(status_file);

        let probe = probe_for(
            config,
            Liveness::Running {
                pid,
                started_at: Utc::now(),
            },
        );
        let report = probe.check().await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
    }
}
