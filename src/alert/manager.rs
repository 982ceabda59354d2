use crate::alert::notifier::{LogNotifier, Notifier};
use crate::alert::{Alert, AlertLevel};
use crate::error::{MlinziError, Result};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

/// Capacity of the subscriber channel
const SUBSCRIBER_BUFFER: usize = 64;

#[derive(Debug, Default)]
struct AlertLog {
    alerts: Vec<Alert>,
    next_id: u64,
}

/// Records escalations and forwards them to subscribers and notifiers
pub struct AlertManager {
    log: Mutex<AlertLog>,
    events: broadcast::Sender<Alert>,
    notifiers: Vec<Arc<dyn Notifier>>,
    log_path: Option<PathBuf>,
}

impl AlertManager {
    /// Create an alert manager that forwards to the log notifier only
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        Self {
            log: Mutex::new(AlertLog {
                alerts: Vec::new(),
                next_id: 1,
            }),
            events,
            notifiers: vec![Arc::new(LogNotifier)],
            log_path: None,
        }
    }

    /// Also append every alert as a JSON line to `path`
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    /// Record a new alert and forward it
    ///
    /// Notifiers run in the background; their failures are logged and
    /// not retried.
    pub async fn raise(
        &self,
        level: AlertLevel,
        component: &str,
        message: impl Into<String>,
    ) -> Alert {
        let alert = {
            let mut log = self.log.lock().await;
            let alert = Alert {
                id: log.next_id,
                level,
                component: component.to_string(),
                message: message.into(),
                timestamp: Utc::now(),
                resolved: false,
                resolved_at: None,
            };
            log.next_id += 1;
            log.alerts.push(alert.clone());
            alert
        };

        self.append_to_file(&alert).await;

        // No subscribers is fine
        let _ = self.events.send(alert.clone());

        for notifier in &self.notifiers {
            let notifier = Arc::clone(notifier);
            let alert = alert.clone();
            tokio::spawn(async move {
                if let Err(e) = notifier.notify(&alert).await {
                    warn!(
                        notifier = notifier.name(),
                        alert_id = alert.id,
                        "Failed to deliver alert: {}",
                        e
                    );
                }
            });
        }

        alert
    }

    /// Mark every open alert of a component resolved
    ///
    /// Returns the resolved alerts.
    pub async fn resolve(&self, component: &str) -> Vec<Alert> {
        let resolved: Vec<Alert> = {
            let mut log = self.log.lock().await;
            let now = Utc::now();
            log.alerts
                .iter_mut()
                .filter(|a| !a.resolved && a.component == component)
                .map(|a| {
                    a.resolved = true;
                    a.resolved_at = Some(now);
                    a.clone()
                })
                .collect()
        };

        for alert in &resolved {
            debug!(component = %component, alert_id = alert.id, "Alert resolved");
            self.append_to_file(alert).await;
        }

        resolved
    }

    /// Mark a single alert resolved
    pub async fn resolve_id(&self, id: u64) -> Result<Alert> {
        let alert = {
            let mut log = self.log.lock().await;
            let alert = log
                .alerts
                .iter_mut()
                .find(|a| a.id == id)
                .ok_or(MlinziError::AlertNotFound(id))?;

            if !alert.resolved {
                alert.resolved = true;
                alert.resolved_at = Some(Utc::now());
            }
            alert.clone()
        };

        self.append_to_file(&alert).await;
        Ok(alert)
    }

    /// Alerts in raise order
    pub async fn list(&self, include_resolved: bool) -> Vec<Alert> {
        self.log
            .lock()
            .await
            .alerts
            .iter()
            .filter(|a| include_resolved || !a.resolved)
            .cloned()
            .collect()
    }

    /// Whether the component has an alert that is still open
    pub async fn has_open(&self, component: &str) -> bool {
        self.log
            .lock()
            .await
            .alerts
            .iter()
            .any(|a| !a.resolved && a.component == component)
    }

    /// Receive every alert raised from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.events.subscribe()
    }

    /// Replace the log with persisted alerts, continuing the id sequence
    pub async fn restore(&self, alerts: Vec<Alert>) {
        let mut log = self.log.lock().await;
        log.next_id = alerts.iter().map(|a| a.id).max().unwrap_or(0) + 1;
        log.alerts = alerts;
    }

    async fn append_to_file(&self, alert: &Alert) {
        let Some(ref path) = self.log_path else {
            return;
        };

        let line = match serde_json::to_string(alert) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to serialize alert {}: {}", alert.id, e);
                return;
            }
        };

        let result = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await?;
            file.write_all(format!("{}\n", line).as_bytes()).await?;
            file.flush().await
        }
        .await;

        if let Err(e) = result {
            warn!("Failed to append alert to {}: {}", path.display(), e);
        }
    }
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    struct ChannelNotifier(mpsc::UnboundedSender<Alert>);

    #[async_trait]
    impl Notifier for ChannelNotifier {
        fn name(&self) -> &str {
            "channel"
        }

        async fn notify(&self, alert: &Alert) -> Result<()> {
            let _ = self.0.send(alert.clone());
            Ok(())
        }
    }

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        fn name(&self) -> &str {
            "failing"
        }

        async fn notify(&self, _alert: &Alert) -> Result<()> {
            Err(MlinziError::NotifyError("unreachable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_raise_assigns_increasing_ids() {
        let manager = AlertManager::new();

        let first = manager.raise(AlertLevel::Warning, "a", "one").await;
        let second = manager.raise(AlertLevel::Critical, "a", "two").await;

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(manager.list(false).await.len(), 2);
    }

    #[tokio::test]
    async fn test_raise_does_not_dedup() {
        let manager = AlertManager::new();
        manager.raise(AlertLevel::Critical, "a", "same").await;
        manager.raise(AlertLevel::Critical, "a", "same").await;
        assert_eq!(manager.list(true).await.len(), 2);
    }

    #[tokio::test]
    async fn test_resolve_component() {
        let manager = AlertManager::new();
        manager.raise(AlertLevel::Warning, "a", "one").await;
        manager.raise(AlertLevel::Warning, "b", "two").await;

        let resolved = manager.resolve("a").await;
        assert_eq!(resolved.len(), 1);
        assert!(resolved[0].resolved_at.is_some());

        assert!(!manager.has_open("a").await);
        assert!(manager.has_open("b").await);
        assert_eq!(manager.list(false).await.len(), 1);
        assert_eq!(manager.list(true).await.len(), 2);
    }

    #[tokio::test]
    async fn test_resolve_id() {
        let manager = AlertManager::new();
        let alert = manager.raise(AlertLevel::Critical, "a", "one").await;

        let resolved = manager.resolve_id(alert.id).await.unwrap();
        assert!(resolved.resolved);

        assert!(matches!(
            manager.resolve_id(99).await,
            Err(MlinziError::AlertNotFound(99))
        ));
    }

    #[tokio::test]
    async fn test_subscribe_and_notify() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let manager = AlertManager::new()
            .with_notifier(Arc::new(FailingNotifier))
            .with_notifier(Arc::new(ChannelNotifier(tx)));
        let mut events = manager.subscribe();

        manager.raise(AlertLevel::Critical, "db", "down").await;

        let event = events.recv().await.unwrap();
        assert_eq!(event.component, "db");

        let notified = rx.recv().await.unwrap();
        assert_eq!(notified.message, "down");
    }

    #[tokio::test]
    async fn test_log_file_lines() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("alerts.jsonl");
        let manager = AlertManager::new().with_log_file(&path);

        manager.raise(AlertLevel::Warning, "a", "one").await;
        manager.resolve("a").await;

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<Alert> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert!(!lines[0].resolved);
        assert!(lines[1].resolved);
    }

    #[tokio::test]
    async fn test_restore_continues_ids() {
        let manager = AlertManager::new();
        let alert = manager.raise(AlertLevel::Warning, "a", "one").await;

        let restored = AlertManager::new();
        restored.restore(vec![alert]).await;

        let next = restored.raise(AlertLevel::Warning, "a", "two").await;
        assert_eq!(next.id, 2);
    }
}
