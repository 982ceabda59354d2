use crate::config::{DependencyConfig, DependencyKind};
use crate::error::{MlinziError, Result};
use crate::health::registry::{HealthMetrics, HealthStatus};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

/// Outcome of a single probe run
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    pub status: HealthStatus,
    pub reason: String,
    pub metrics: HealthMetrics,
}

impl ProbeReport {
    pub fn healthy(reason: impl Into<String>) -> Self {
        Self::with_status(HealthStatus::Healthy, reason)
    }

    pub fn degraded(reason: impl Into<String>) -> Self {
        Self::with_status(HealthStatus::Degraded, reason)
    }

    pub fn unhealthy(reason: impl Into<String>) -> Self {
        Self::with_status(HealthStatus::Unhealthy, reason)
    }

    fn with_status(status: HealthStatus, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
            metrics: HealthMetrics::default(),
        }
    }

    pub fn with_metrics(mut self, metrics: HealthMetrics) -> Self {
        self.metrics = metrics;
        self
    }
}

/// A bounded-time health check for one component
///
/// Implementations should not enforce their own overall deadline; the
/// scanner wraps every call in the configured probe timeout.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn check(&self) -> ProbeReport;
}

/// How a dependency is reached
enum DependencyTarget {
    Postgres(PgPool),
    Http { client: reqwest::Client, url: String },
    Tcp { address: String },
}

/// Single round-trip probe against a dependency
pub struct DependencyProbe {
    target: DependencyTarget,
    latency_threshold: Duration,
}

impl DependencyProbe {
    /// Build the probe for a configured dependency
    ///
    /// `timeout` bounds connection attempts so that an unreachable endpoint
    /// fails fast instead of running into the scanner's deadline.
    pub fn from_config(config: &DependencyConfig, timeout: Duration) -> Result<Self> {
        let target = match &config.kind {
            DependencyKind::Postgres { url } => {
                let pool = PgPoolOptions::new()
                    .max_connections(1)
                    .acquire_timeout(timeout)
                    .connect_lazy(url)
                    .map_err(|e| {
                        MlinziError::ConfigError(format!(
                            "Invalid database URL for {}: {}",
                            config.name, e
                        ))
                    })?;
                DependencyTarget::Postgres(pool)
            }
            DependencyKind::Http { url } => {
                let client = reqwest::Client::builder()
                    .timeout(timeout)
                    .build()
                    .map_err(|e| {
                        MlinziError::ConfigError(format!(
                            "Failed to build HTTP client for {}: {}",
                            config.name, e
                        ))
                    })?;
                DependencyTarget::Http {
                    client,
                    url: url.clone(),
                }
            }
            DependencyKind::Tcp { address } => DependencyTarget::Tcp {
                address: address.clone(),
            },
        };

        Ok(Self {
            target,
            latency_threshold: config.latency_threshold(),
        })
    }

    async fn ping(&self) -> std::result::Result<(), String> {
        match &self.target {
            DependencyTarget::Postgres(pool) => sqlx::query("SELECT 1")
                .execute(pool)
                .await
                .map(|_| ())
                .map_err(|e| format!("query failed: {}", e)),
            DependencyTarget::Http { client, url } => {
                let response = client
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| format!("request failed: {}", e))?;
                if response.status().is_success() {
                    Ok(())
                } else {
                    Err(format!("HTTP {}", response.status()))
                }
            }
            DependencyTarget::Tcp { address } => TcpStream::connect(address)
                .await
                .map(|_| ())
                .map_err(|e| format!("connect failed: {}", e)),
        }
    }
}

#[async_trait]
impl Probe for DependencyProbe {
    async fn check(&self) -> ProbeReport {
        let started = Instant::now();
        let result = self.ping().await;
        let latency = started.elapsed();

        let metrics = HealthMetrics {
            latency_ms: Some(latency.as_millis() as u64),
            ..HealthMetrics::default()
        };

        let report = match result {
            Err(reason) => ProbeReport::unhealthy(reason),
            Ok(()) if latency > self.latency_threshold => ProbeReport::degraded(format!(
                "latency {}ms above {}ms",
                latency.as_millis(),
                self.latency_threshold.as_millis()
            )),
            Ok(()) => ProbeReport::healthy("reachable"),
        };

        report.with_metrics(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn dependency(kind: DependencyKind, latency_threshold_ms: u64) -> DependencyConfig {
        DependencyConfig {
            name: "dep".to_string(),
            enabled: true,
            latency_threshold_ms,
            kind,
        }
    }

    async fn closed_port() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);
        address
    }

    #[tokio::test]
    async fn test_tcp_probe_healthy() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let config = dependency(DependencyKind::Tcp { address }, 1_000);
        let probe = DependencyProbe::from_config(&config, Duration::from_secs(1)).unwrap();

        let report = probe.check().await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.metrics.latency_ms.is_some());
    }

    #[tokio::test]
    async fn test_tcp_probe_unreachable() {
        let address = closed_port().await;
        let config = dependency(DependencyKind::Tcp { address }, 1_000);
        let probe = DependencyProbe::from_config(&config, Duration::from_secs(1)).unwrap();

        let report = probe.check().await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(report.reason.contains("connect failed"));
    }

    #[tokio::test]
    async fn test_latency_above_threshold_is_degraded() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let config = dependency(DependencyKind::Tcp { address }, 0);
        let mut probe = DependencyProbe::from_config(&config, Duration::from_secs(1)).unwrap();
        probe.latency_threshold = Duration::from_nanos(1);

        let report = probe.check().await;
        assert_eq!(report.status, HealthStatus::Degraded);
        assert!(report.reason.contains("latency"));
    }

    #[tokio::test]
    async fn test_http_probe_status_codes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        tokio::spawn(async move {
            for status in ["200 OK", "503 Service Unavailable"] {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                    status
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });

        let config = dependency(
            DependencyKind::Http {
                url: format!("http://{}/health", address),
            },
            5_000,
        );
        let probe = DependencyProbe::from_config(&config, Duration::from_secs(2)).unwrap();

        assert_eq!(probe.check().await.status, HealthStatus::Healthy);

        let report = probe.check().await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(report.reason.contains("503"));
    }

    #[tokio::test]
    async fn test_postgres_probe_unreachable() {
        let address = closed_port().await;
        let config = dependency(
            DependencyKind::Postgres {
                url: format!("postgres://mlinzi@{}/ingest", address),
            },
            1_000,
        );
        let probe = DependencyProbe::from_config(&config, Duration::from_millis(500)).unwrap();

        let report = probe.check().await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(report.reason.contains("query failed"));
    }
}
