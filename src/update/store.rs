use crate::config::WorkerConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;

/// Immutable copy of a worker configuration taken before an update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub id: u64,
    pub target: String,
    pub taken_at: DateTime<Utc>,
    pub config: WorkerConfig,
}

#[derive(Debug)]
struct History {
    by_target: HashMap<String, VecDeque<ConfigSnapshot>>,
    next_id: u64,
}

/// Bounded per-target history of configuration snapshots
///
/// The oldest snapshot of a target is evicted once `limit` is exceeded.
#[derive(Debug)]
pub struct ConfigStore {
    history: Mutex<History>,
    limit: usize,
}

impl ConfigStore {
    pub fn new(limit: usize) -> Self {
        Self {
            history: Mutex::new(History {
                by_target: HashMap::new(),
                next_id: 1,
            }),
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Store a snapshot of `config` as of `taken_at`
    pub async fn record(
        &self,
        target: &str,
        config: WorkerConfig,
        taken_at: DateTime<Utc>,
    ) -> ConfigSnapshot {
        let mut history = self.history.lock().await;

        let snapshot = ConfigSnapshot {
            id: history.next_id,
            target: target.to_string(),
            taken_at,
            config,
        };
        history.next_id += 1;

        let entries = history.by_target.entry(target.to_string()).or_default();
        entries.push_back(snapshot.clone());
        while entries.len() > self.limit {
            entries.pop_front();
        }

        snapshot
    }

    /// Retained snapshots of a target, oldest first
    pub async fn history(&self, target: &str) -> Vec<ConfigSnapshot> {
        self.history
            .lock()
            .await
            .by_target
            .get(target)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn all(&self) -> HashMap<String, Vec<ConfigSnapshot>> {
        self.history
            .lock()
            .await
            .by_target
            .iter()
            .map(|(target, entries)| (target.clone(), entries.iter().cloned().collect()))
            .collect()
    }

    /// Replace the history with persisted snapshots, trimmed to the bound
    pub async fn restore(&self, snapshots: HashMap<String, Vec<ConfigSnapshot>>) {
        let mut history = self.history.lock().await;

        let max_id = snapshots
            .values()
            .flatten()
            .map(|s| s.id)
            .max()
            .unwrap_or(0);

        history.by_target = snapshots
            .into_iter()
            .map(|(target, mut entries)| {
                entries.sort_by_key(|s| s.id);
                let excess = entries.len().saturating_sub(self.limit);
                (target, entries.into_iter().skip(excess).collect())
            })
            .collect();
        history.next_id = max_id + 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(args: &str) -> WorkerConfig {
        WorkerConfig::new("prices", "/bin/sleep").with_args([args])
    }

    #[tokio::test]
    async fn test_ids_increase() {
        let store = ConfigStore::new(5);
        let a = store.record("prices", config("1"), Utc::now()).await;
        let b = store.record("news", config("2"), Utc::now()).await;
        assert!(b.id > a.id);
    }

    #[tokio::test]
    async fn test_fifo_eviction() {
        let store = ConfigStore::new(3);
        for i in 0..5 {
            store
                .record("prices", config(&i.to_string()), Utc::now())
                .await;
        }

        let history = store.history("prices").await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].config.args, vec!["2".to_string()]);
        assert_eq!(history[2].config.args, vec!["4".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_target_is_empty() {
        let store = ConfigStore::new(3);
        assert!(store.history("missing").await.is_empty());
    }

    #[tokio::test]
    async fn test_restore_trims_and_continues_ids() {
        let store = ConfigStore::new(5);
        for i in 0..4 {
            store
                .record("prices", config(&i.to_string()), Utc::now())
                .await;
        }
        let saved = store.all().await;

        let restored = ConfigStore::new(2);
        restored.restore(saved).await;

        let history = restored.history("prices").await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].id, 4);

        let next = restored.record("prices", config("x"), Utc::now()).await;
        assert_eq!(next.id, 5);
    }
}
