// IPC protocol - JSON lines exchanged between the CLI and the daemon

use crate::alert::Alert;
use crate::health::HealthRecord;
use crate::supervisor::WorkerInfo;
use crate::update::{ConfigPatch, ConfigSnapshot, UpdateOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Daemon management commands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DaemonCommand {
    Status,
    Stop,
}

/// All available commands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// List workers with lifecycle state and latest verdict
    Workers,
    /// List the latest health record of every component
    Health,
    /// Run a health cycle now
    Scan,
    Restart { name: String },
    /// Return a failed worker to stopped
    Reset { name: String },
    /// Submit a configuration change through the safe update protocol
    Update { name: String, patch: ConfigPatch },
    Snapshots { name: String },
    Alerts { include_resolved: bool },
    ResolveAlert { id: u64 },
    Daemon(DaemonCommand),
}

/// Daemon process information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub pid: u32,
    pub version: String,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
    pub workers: usize,
    pub pending_restarts: usize,
}

/// Response data variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponseData {
    Workers(Vec<WorkerInfo>),
    Health(Vec<HealthRecord>),
    Restarted { name: String },
    Reset { name: String },
    Update(UpdateOutcome),
    Snapshots(Vec<ConfigSnapshot>),
    Alerts(Vec<Alert>),
    AlertResolved(Alert),
    DaemonStatus(DaemonStatus),
    /// Generic success message
    Success(String),
}

/// Request message from client to daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub command: Command,
}

/// Response message from daemon to client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub result: Result<ResponseData, String>,
}

impl Request {
    pub fn new(id: u64, command: Command) -> Self {
        Self { id, command }
    }
}

impl Response {
    pub fn success(id: u64, data: ResponseData) -> Self {
        Self {
            id,
            result: Ok(data),
        }
    }

    pub fn error(id: u64, error: String) -> Self {
        Self {
            id,
            result: Err(error),
        }
    }
}
