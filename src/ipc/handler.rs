// Command dispatch - maps IPC commands onto the supervisor

use crate::error::Result;
use crate::ipc::{Command, DaemonCommand, DaemonStatus, ResponseData};
use crate::supervisor::Supervisor;
use chrono::Utc;
use tokio::sync::watch;
use tracing::info;

/// Executes commands received over the socket against a running supervisor
#[derive(Clone)]
pub struct CommandHandler {
    supervisor: Supervisor,
    shutdown: watch::Sender<bool>,
}

impl CommandHandler {
    pub fn new(supervisor: Supervisor, shutdown: watch::Sender<bool>) -> Self {
        Self {
            supervisor,
            shutdown,
        }
    }

    pub async fn handle(&self, command: Command) -> Result<ResponseData> {
        match command {
            Command::Workers => Ok(ResponseData::Workers(self.supervisor.workers().await)),
            Command::Health => Ok(ResponseData::Health(self.supervisor.health().await)),
            Command::Scan => Ok(ResponseData::Health(self.supervisor.scan_now().await)),
            Command::Restart { name } => {
                self.supervisor.restart_worker(&name).await?;
                Ok(ResponseData::Restarted { name })
            }
            Command::Reset { name } => {
                self.supervisor.reset_worker(&name).await?;
                Ok(ResponseData::Reset { name })
            }
            Command::Update { name, patch } => Ok(ResponseData::Update(
                self.supervisor.safe_update(&name, patch).await,
            )),
            Command::Snapshots { name } => {
                Ok(ResponseData::Snapshots(self.supervisor.snapshots(&name).await))
            }
            Command::Alerts { include_resolved } => Ok(ResponseData::Alerts(
                self.supervisor.alerts(include_resolved).await,
            )),
            Command::ResolveAlert { id } => Ok(ResponseData::AlertResolved(
                self.supervisor.resolve_alert(id).await?,
            )),
            Command::Daemon(DaemonCommand::Status) => {
                let started_at = self.supervisor.started_at();
                let uptime_secs = (Utc::now() - started_at).num_seconds().max(0) as u64;

                Ok(ResponseData::DaemonStatus(DaemonStatus {
                    pid: std::process::id(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    started_at,
                    uptime_secs,
                    workers: self.supervisor.workers().await.len(),
                    pending_restarts: self.supervisor.pending_restarts().await,
                }))
            }
            Command::Daemon(DaemonCommand::Stop) => {
                info!("Stop requested over IPC");
                let _ = self.shutdown.send(true);
                Ok(ResponseData::Success("Daemon stopping".to_string()))
            }
        }
    }
}
