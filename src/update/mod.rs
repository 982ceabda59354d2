// Update module - safe configuration changes with snapshot history

pub mod manager;
pub mod patch;
pub mod store;

pub use manager::{ConfigUpdateManager, UpdateSettings};
pub use patch::ConfigPatch;
pub use store::{ConfigSnapshot, ConfigStore};

use serde::{Deserialize, Serialize};

/// Result of a safe update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpdateOutcome {
    /// New configuration is live and verified healthy
    Committed { snapshot_id: u64 },
    /// Update failed; `recovered` tells whether the previous configuration is healthy again
    RolledBack { reason: String, recovered: bool },
    /// Update refused before anything changed
    Rejected { reason: String },
}

impl std::fmt::Display for UpdateOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateOutcome::Committed { snapshot_id } => {
                write!(f, "committed (previous config saved as snapshot {})", snapshot_id)
            }
            UpdateOutcome::RolledBack {
                reason,
                recovered: true,
            } => write!(f, "rolled back: {}", reason),
            UpdateOutcome::RolledBack {
                reason,
                recovered: false,
            } => write!(f, "rollback failed, worker marked failed: {}", reason),
            UpdateOutcome::Rejected { reason } => write!(f, "rejected: {}", reason),
        }
    }
}
