use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Health verdict for a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Kind of supervised component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Worker,
    Dependency,
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComponentKind::Worker => write!(f, "worker"),
            ComponentKind::Dependency => write!(f, "dependency"),
        }
    }
}

/// Optional numeric measurements attached to a verdict
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthMetrics {
    pub latency_ms: Option<u64>,
    pub error_rate: Option<f64>,
    pub memory_bytes: Option<u64>,
    pub cpu_percent: Option<f32>,
}

/// Latest health verdict for one component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub component: String,
    pub kind: ComponentKind,
    pub status: HealthStatus,
    pub checked_at: DateTime<Utc>,
    pub reason: String,
    #[serde(default)]
    pub metrics: HealthMetrics,
}

impl HealthRecord {
    /// Placeholder record for a component that has not been probed yet
    pub fn unknown(component: &str, kind: ComponentKind) -> Self {
        Self {
            component: component.to_string(),
            kind,
            status: HealthStatus::Unknown,
            checked_at: Utc::now(),
            reason: "not checked yet".to_string(),
            metrics: HealthMetrics::default(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Latest verdict per component name
///
/// Records are overwritten, never appended.
#[derive(Debug, Default)]
pub struct HealthRegistry {
    records: RwLock<HashMap<String, HealthRecord>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, component: &str) -> Option<HealthRecord> {
        self.records.read().await.get(component).cloned()
    }

    pub async fn status(&self, component: &str) -> HealthStatus {
        self.records
            .read()
            .await
            .get(component)
            .map(|r| r.status)
            .unwrap_or(HealthStatus::Unknown)
    }

    pub async fn set(&self, record: HealthRecord) {
        self.records
            .write()
            .await
            .insert(record.component.clone(), record);
    }

    /// Replace the entries of every given record under a single write lock
    pub async fn set_all<I>(&self, records: I)
    where
        I: IntoIterator<Item = HealthRecord>,
    {
        let mut guard = self.records.write().await;
        for record in records {
            guard.insert(record.component.clone(), record);
        }
    }

    /// All current records, sorted by component name
    pub async fn all(&self) -> Vec<HealthRecord> {
        let mut records: Vec<HealthRecord> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.component.cmp(&b.component));
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, status: HealthStatus) -> HealthRecord {
        HealthRecord {
            component: name.to_string(),
            kind: ComponentKind::Worker,
            status,
            checked_at: Utc::now(),
            reason: String::new(),
            metrics: HealthMetrics::default(),
        }
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let registry = HealthRegistry::new();

        registry.set(record("prices", HealthStatus::Healthy)).await;
        registry.set(record("prices", HealthStatus::Unhealthy)).await;

        assert_eq!(registry.all().await.len(), 1);
        assert_eq!(registry.status("prices").await, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_unknown_component() {
        let registry = HealthRegistry::new();
        assert!(registry.get("missing").await.is_none());
        assert_eq!(registry.status("missing").await, HealthStatus::Unknown);
    }

    #[tokio::test]
    async fn test_set_all_sorted() {
        let registry = HealthRegistry::new();
        registry
            .set_all(vec![
                record("b", HealthStatus::Healthy),
                record("a", HealthStatus::Degraded),
            ])
            .await;

        let names: Vec<String> = registry.all().await.into_iter().map(|r| r.component).collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }
}
