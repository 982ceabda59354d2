// State module - persisted supervisor state

use crate::alert::Alert;
use crate::error::{MlinziError, Result};
use crate::health::HealthRecord;
use crate::process::WorkerState;
use crate::supervisor::RestartState;
use crate::update::ConfigSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Version of the state file format
const STATE_VERSION: &str = "1";

/// Everything the supervisor keeps across restarts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorState {
    pub version: String,
    pub saved_at: DateTime<Utc>,
    /// Latest health record per component
    #[serde(default)]
    pub health: HashMap<String, HealthRecord>,
    /// Restart bookkeeping per worker
    #[serde(default)]
    pub restarts: HashMap<String, RestartState>,
    /// Config snapshots per target, oldest first
    #[serde(default)]
    pub snapshots: HashMap<String, Vec<ConfigSnapshot>>,
    #[serde(default)]
    pub alerts: Vec<Alert>,
    /// Lifecycle state per worker
    #[serde(default)]
    pub workers: HashMap<String, WorkerState>,
}

impl SupervisorState {
    pub fn new() -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            saved_at: Utc::now(),
            health: HashMap::new(),
            restarts: HashMap::new(),
            snapshots: HashMap::new(),
            alerts: Vec::new(),
            workers: HashMap::new(),
        }
    }

    /// Validate the state structure
    pub fn validate(&self) -> Result<()> {
        if self.version != STATE_VERSION {
            return Err(MlinziError::StateCorruption(format!(
                "Incompatible state version: expected {}, found {}",
                STATE_VERSION, self.version
            )));
        }

        let mut seen_ids = HashSet::new();
        for alert in &self.alerts {
            if !seen_ids.insert(alert.id) {
                return Err(MlinziError::StateCorruption(format!(
                    "Duplicate alert ID found: {}",
                    alert.id
                )));
            }
        }

        for (target, snapshots) in &self.snapshots {
            if let Some(stray) = snapshots.iter().find(|s| &s.target != target) {
                return Err(MlinziError::StateCorruption(format!(
                    "Snapshot {} of {} filed under {}",
                    stray.id, stray.target, target
                )));
            }
        }

        Ok(())
    }
}

impl Default for SupervisorState {
    fn default() -> Self {
        Self::new()
    }
}

/// Persists the supervisor state as one JSON document
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Load state from disk, or an empty state if there is none yet
    pub fn load(&self) -> Result<SupervisorState> {
        if !self.path.exists() {
            return Ok(SupervisorState::new());
        }

        let file = File::open(&self.path).map_err(|e| {
            MlinziError::StateLoadError(format!("Failed to open state file: {}", e))
        })?;

        let state: SupervisorState =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| {
                MlinziError::StateLoadError(format!("Failed to parse state file: {}", e))
            })?;

        state.validate()?;

        Ok(state)
    }

    /// Save state to disk: write a temp file, then rename it over the old one
    pub fn save(&self, state: &SupervisorState) -> Result<()> {
        state.validate()?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                MlinziError::StateSaveError(format!("Failed to create state directory: {}", e))
            })?;
        }

        let temp_path = self.path.with_extension("tmp");

        {
            let file = File::create(&temp_path).map_err(|e| {
                MlinziError::StateSaveError(format!("Failed to create temp state file: {}", e))
            })?;

            let mut writer = BufWriter::new(file);

            serde_json::to_writer_pretty(&mut writer, state).map_err(|e| {
                MlinziError::StateSaveError(format!("Failed to serialize state: {}", e))
            })?;

            writer.flush().map_err(|e| {
                MlinziError::StateSaveError(format!("Failed to flush state file: {}", e))
            })?;
        }

        fs::rename(&temp_path, &self.path).map_err(|e| {
            MlinziError::StateSaveError(format!("Failed to rename temp state file: {}", e))
        })?;

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertLevel;
    use crate::config::WorkerConfig;
    use tempfile::TempDir;

    fn alert(id: u64) -> Alert {
        Alert {
            id,
            level: AlertLevel::Critical,
            component: "prices".to_string(),
            message: "max restarts reached".to_string(),
            timestamp: Utc::now(),
            resolved: false,
            resolved_at: None,
        }
    }

    fn populated() -> SupervisorState {
        let mut state = SupervisorState::new();
        state.alerts.push(alert(1));
        state.workers.insert("prices".to_string(), WorkerState::Failed);
        state.restarts.insert(
            "prices".to_string(),
            RestartState {
                count: 3,
                window_start: Some(Utc::now()),
                last_restart: Some(Utc::now()),
            },
        );
        state.snapshots.insert(
            "prices".to_string(),
            vec![ConfigSnapshot {
                id: 1,
                target: "prices".to_string(),
                taken_at: Utc::now(),
                config: WorkerConfig::new("prices", "/bin/sleep"),
            }],
        );
        state
    }

    #[test]
    fn test_load_nonexistent() {
        let temp_dir = TempDir::new().unwrap();
        let store = StateStore::new(temp_dir.path().join("state.json"));

        let state = store.load().unwrap();
        assert!(state.alerts.is_empty());
        assert!(state.workers.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = StateStore::new(temp_dir.path().join("state.json"));

        store.save(&populated()).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.workers.get("prices"), Some(&WorkerState::Failed));
        assert_eq!(loaded.restarts["prices"].count, 3);
        assert_eq!(loaded.snapshots["prices"].len(), 1);
        assert_eq!(loaded.alerts[0].message, "max restarts reached");
        assert!(!temp_dir.path().join("state.tmp").exists());
    }

    #[test]
    fn test_validate_duplicate_alert_id() {
        let mut state = SupervisorState::new();
        state.alerts.push(alert(1));
        state.alerts.push(alert(1));

        assert!(matches!(
            state.validate(),
            Err(MlinziError::StateCorruption(_))
        ));
    }

    #[test]
    fn test_validate_wrong_version() {
        let mut state = SupervisorState::new();
        state.version = "0".to_string();
        assert!(matches!(
            state.validate(),
            Err(MlinziError::StateCorruption(_))
        ));
    }

    #[test]
    fn test_load_corrupt_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();

        let store = StateStore::new(&path);
        assert!(matches!(
            store.load(),
            Err(MlinziError::StateLoadError(_))
        ));
    }

    #[test]
    fn test_creates_parent_directory() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("subdir").join("state.json");
        let store = StateStore::new(&path);

        store.save(&SupervisorState::new()).unwrap();
        assert!(path.exists());
    }
}
