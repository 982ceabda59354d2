use crate::error::{MlinziError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Signals a worker may be asked to stop with
pub const VALID_STOP_SIGNALS: [&str; 7] = [
    "SIGTERM", "SIGINT", "SIGQUIT", "SIGKILL", "SIGHUP", "SIGUSR1", "SIGUSR2",
];

/// Complete supervisor configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupervisorFile {
    /// Control loop, restart policy and update protocol settings
    #[serde(default)]
    pub supervisor: SupervisorSettings,

    /// Supervised worker processes
    #[serde(default)]
    pub workers: Vec<WorkerConfig>,

    /// Dependencies the workers need (datastore, external endpoints)
    #[serde(default)]
    pub dependencies: Vec<DependencyConfig>,
}

/// Supervisor-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorSettings {
    /// Interval between health scans (in seconds)
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,

    /// Per-probe timeout (in milliseconds)
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,

    /// Upper bound on concurrently running probes
    #[serde(default = "default_probe_pool_cap")]
    pub probe_pool_cap: usize,

    /// Maximum consecutive restarts within the reset window
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    /// Base restart delay, doubled per consecutive restart (in milliseconds)
    #[serde(default = "default_restart_base_delay")]
    pub restart_base_delay_ms: u64,

    /// Ceiling for the restart delay (in milliseconds)
    #[serde(default = "default_restart_max_delay")]
    pub restart_max_delay_ms: u64,

    /// Window after which the restart counter resets (in seconds)
    #[serde(default = "default_restart_window")]
    pub restart_window_secs: u64,

    /// How long a safe update waits for the target to turn healthy (in seconds)
    #[serde(default = "default_verify_timeout")]
    pub verify_timeout_secs: u64,

    /// Poll interval while verifying an update (in milliseconds)
    #[serde(default = "default_verify_poll_interval")]
    pub verify_poll_interval_ms: u64,

    /// Consecutive healthy polls required to commit an update
    #[serde(default = "default_verify_healthy_polls")]
    pub verify_healthy_polls: u32,

    /// Config snapshots retained per target
    #[serde(default = "default_snapshot_limit")]
    pub snapshot_limit: usize,

    /// Rollback attempts before escalating
    #[serde(default = "default_rollback_attempts")]
    pub rollback_attempts: u32,

    /// Base delay between rollback attempts (in milliseconds)
    #[serde(default = "default_rollback_base_delay")]
    pub rollback_base_delay_ms: u64,

    /// How long a dependency may stay unhealthy before an alert is raised (in seconds)
    #[serde(default = "default_dependency_grace")]
    pub dependency_grace_secs: u64,

    /// Persisted supervisor state
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,

    /// Administrative socket
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// PID file guarding against a second supervisor instance
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,

    /// Append-only alert log (JSON lines)
    #[serde(default)]
    pub alert_log: Option<PathBuf>,

    /// Webhook that receives alerts as JSON
    #[serde(default)]
    pub webhook_url: Option<String>,
}

fn default_scan_interval() -> u64 {
    30
}

fn default_probe_timeout() -> u64 {
    5_000
}

fn default_probe_pool_cap() -> usize {
    16
}

fn default_max_restarts() -> u32 {
    3
}

fn default_restart_base_delay() -> u64 {
    5_000
}

fn default_restart_max_delay() -> u64 {
    600_000
}

fn default_restart_window() -> u64 {
    3_600
}

fn default_verify_timeout() -> u64 {
    30
}

fn default_verify_poll_interval() -> u64 {
    1_000
}

fn default_verify_healthy_polls() -> u32 {
    2
}

fn default_snapshot_limit() -> usize {
    5
}

fn default_rollback_attempts() -> u32 {
    3
}

fn default_rollback_base_delay() -> u64 {
    1_000
}

fn default_dependency_grace() -> u64 {
    120
}

fn default_state_path() -> PathBuf {
    PathBuf::from("/tmp/mlinzi_state.json")
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/tmp/mlinzi.sock")
}

fn default_pid_file() -> PathBuf {
    PathBuf::from("/tmp/mlinzi.pid")
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval(),
            probe_timeout_ms: default_probe_timeout(),
            probe_pool_cap: default_probe_pool_cap(),
            max_restarts: default_max_restarts(),
            restart_base_delay_ms: default_restart_base_delay(),
            restart_max_delay_ms: default_restart_max_delay(),
            restart_window_secs: default_restart_window(),
            verify_timeout_secs: default_verify_timeout(),
            verify_poll_interval_ms: default_verify_poll_interval(),
            verify_healthy_polls: default_verify_healthy_polls(),
            snapshot_limit: default_snapshot_limit(),
            rollback_attempts: default_rollback_attempts(),
            rollback_base_delay_ms: default_rollback_base_delay(),
            dependency_grace_secs: default_dependency_grace(),
            state_path: default_state_path(),
            socket_path: default_socket_path(),
            pid_file: default_pid_file(),
            alert_log: None,
            webhook_url: None,
        }
    }
}

impl SupervisorSettings {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn restart_base_delay(&self) -> Duration {
        Duration::from_millis(self.restart_base_delay_ms)
    }

    pub fn restart_max_delay(&self) -> Duration {
        Duration::from_millis(self.restart_max_delay_ms)
    }

    pub fn restart_window(&self) -> Duration {
        Duration::from_secs(self.restart_window_secs)
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.verify_timeout_secs)
    }

    pub fn verify_poll_interval(&self) -> Duration {
        Duration::from_millis(self.verify_poll_interval_ms)
    }

    pub fn rollback_base_delay(&self) -> Duration {
        Duration::from_millis(self.rollback_base_delay_ms)
    }

    pub fn dependency_grace(&self) -> Duration {
        Duration::from_secs(self.dependency_grace_secs)
    }

    /// Validate value ranges
    pub fn validate(&self) -> Result<()> {
        if self.scan_interval_secs == 0 {
            return Err(MlinziError::ConfigValidationError(
                "scan_interval_secs must be at least 1".to_string(),
            ));
        }

        if self.probe_timeout_ms == 0 {
            return Err(MlinziError::ConfigValidationError(
                "probe_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.probe_pool_cap == 0 {
            return Err(MlinziError::ConfigValidationError(
                "probe_pool_cap must be at least 1".to_string(),
            ));
        }

        if self.max_restarts == 0 {
            return Err(MlinziError::ConfigValidationError(
                "max_restarts must be at least 1".to_string(),
            ));
        }

        if self.snapshot_limit == 0 {
            return Err(MlinziError::ConfigValidationError(
                "snapshot_limit must be at least 1".to_string(),
            ));
        }

        if self.rollback_attempts == 0 {
            return Err(MlinziError::ConfigValidationError(
                "rollback_attempts must be at least 1".to_string(),
            ));
        }

        if self.verify_healthy_polls == 0 {
            return Err(MlinziError::ConfigValidationError(
                "verify_healthy_polls must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration of one supervised worker process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Worker name (unique identifier)
    pub name: String,

    /// Path to the script or executable to run
    pub script: PathBuf,

    /// Command-line arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for the worker
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Disabled workers are neither started nor probed
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Signal to send on stop (default: SIGTERM)
    #[serde(default = "default_stop_signal")]
    pub stop_signal: String,

    /// Grace period before force kill (in seconds)
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,

    /// Status file the worker writes after each unit of work
    #[serde(default)]
    pub status_file: Option<PathBuf>,

    /// Maximum age of the last successful unit of work (in seconds)
    #[serde(default = "default_freshness_window")]
    pub freshness_window_secs: u64,

    /// Error ratio at or above which the worker is degraded
    #[serde(default = "default_error_rate_threshold")]
    pub error_rate_threshold: f64,

    /// Memory ceiling in bytes; exceeding it marks the worker degraded
    #[serde(default)]
    pub max_memory: Option<u64>,

    /// Dependencies that must be reachable for a restart to make sense
    #[serde(default)]
    pub requires: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_stop_signal() -> String {
    "SIGTERM".to_string()
}

fn default_stop_timeout() -> u64 {
    10
}

fn default_freshness_window() -> u64 {
    300
}

fn default_error_rate_threshold() -> f64 {
    0.05
}

impl WorkerConfig {
    /// Create a worker configuration with default settings
    pub fn new(name: impl Into<String>, script: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            script: script.into(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            enabled: default_enabled(),
            stop_signal: default_stop_signal(),
            stop_timeout_secs: default_stop_timeout(),
            status_file: None,
            freshness_window_secs: default_freshness_window(),
            error_rate_threshold: default_error_rate_threshold(),
            max_memory: None,
            requires: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Validate the structure of the configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(MlinziError::MissingConfigField("name".to_string()));
        }

        if self.script.as_os_str().is_empty() {
            return Err(MlinziError::MissingConfigField("script".to_string()));
        }

        if !VALID_STOP_SIGNALS.contains(&self.stop_signal.as_str()) {
            return Err(MlinziError::ConfigValidationError(format!(
                "Invalid stop_signal: {}. Must be one of: {}",
                self.stop_signal,
                VALID_STOP_SIGNALS.join(", ")
            )));
        }

        if self.freshness_window_secs == 0 {
            return Err(MlinziError::ConfigValidationError(
                "freshness_window_secs must be at least 1".to_string(),
            ));
        }

        if !(self.error_rate_threshold > 0.0 && self.error_rate_threshold <= 1.0) {
            return Err(MlinziError::ConfigValidationError(format!(
                "error_rate_threshold must be in (0, 1], got {}",
                self.error_rate_threshold
            )));
        }

        if let Some(ref cwd) = self.cwd {
            if !cwd.exists() {
                return Err(MlinziError::ConfigValidationError(format!(
                    "Working directory does not exist: {}",
                    cwd.display()
                )));
            }
            if !cwd.is_dir() {
                return Err(MlinziError::ConfigValidationError(format!(
                    "Working directory is not a directory: {}",
                    cwd.display()
                )));
            }
        }

        Ok(())
    }

    /// Check that everything the worker references can be reached
    pub fn check_resources(&self) -> Result<()> {
        if !self.script.exists() {
            return Err(MlinziError::ConfigValidationError(format!(
                "Script does not exist: {}",
                self.script.display()
            )));
        }

        if let Some(ref status_file) = self.status_file {
            let parent = status_file.parent().unwrap_or_else(|| Path::new("."));
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                return Err(MlinziError::ConfigValidationError(format!(
                    "Status file directory does not exist: {}",
                    parent.display()
                )));
            }
        }

        Ok(())
    }

    /// Get stop grace period as Duration
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    /// Get freshness window as Duration
    pub fn freshness_window(&self) -> Duration {
        Duration::from_secs(self.freshness_window_secs)
    }

    fn expand_env_vars(&mut self) {
        self.script = expand_env_in_path(&self.script);

        if let Some(ref cwd) = self.cwd {
            self.cwd = Some(expand_env_in_path(cwd));
        }

        if let Some(ref status_file) = self.status_file {
            self.status_file = Some(expand_env_in_path(status_file));
        }

        self.args = self.args.iter().map(|arg| expand_env_in_string(arg)).collect();

        self.env = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), expand_env_in_string(v)))
            .collect();
    }
}

/// Configuration of one dependency probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyConfig {
    /// Dependency name (unique across workers and dependencies)
    pub name: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Round-trip latency above which the dependency is degraded (in milliseconds)
    #[serde(default = "default_latency_threshold")]
    pub latency_threshold_ms: u64,

    #[serde(flatten)]
    pub kind: DependencyKind,
}

fn default_latency_threshold() -> u64 {
    1_000
}

/// How a dependency is pinged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DependencyKind {
    /// PostgreSQL datastore, probed with a trivial query
    Postgres { url: String },
    /// HTTP endpoint, probed with a GET
    Http { url: String },
    /// Plain TCP endpoint, probed with a connect
    Tcp { address: String },
}

impl DependencyConfig {
    pub fn latency_threshold(&self) -> Duration {
        Duration::from_millis(self.latency_threshold_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(MlinziError::MissingConfigField("name".to_string()));
        }

        let target = match &self.kind {
            DependencyKind::Postgres { url } | DependencyKind::Http { url } => url,
            DependencyKind::Tcp { address } => address,
        };

        if target.is_empty() {
            return Err(MlinziError::ConfigValidationError(format!(
                "Dependency {} has an empty target",
                self.name
            )));
        }

        Ok(())
    }

    fn expand_env_vars(&mut self) {
        match &mut self.kind {
            DependencyKind::Postgres { url } | DependencyKind::Http { url } => {
                *url = expand_env_in_string(url);
            }
            DependencyKind::Tcp { address } => {
                *address = expand_env_in_string(address);
            }
        }
    }
}

impl SupervisorFile {
    /// Load the supervisor configuration from a file (supports TOML and JSON)
    pub fn from_file(path: &Path) -> Result<SupervisorFile> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| MlinziError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        let mut file = match extension {
            "toml" => Self::parse_toml(&contents)?,
            "json" => Self::parse_json(&contents)?,
            _ => {
                return Err(MlinziError::InvalidConfig(format!(
                    "Unsupported file format: {}. Use .toml or .json",
                    extension
                )))
            }
        };

        file.expand_env_vars();
        file.validate()?;

        Ok(file)
    }

    fn parse_toml(contents: &str) -> Result<SupervisorFile> {
        toml::from_str(contents)
            .map_err(|e| MlinziError::InvalidConfig(format!("Failed to parse TOML: {}", e)))
    }

    fn parse_json(contents: &str) -> Result<SupervisorFile> {
        serde_json::from_str(contents)
            .map_err(|e| MlinziError::InvalidConfig(format!("Failed to parse JSON: {}", e)))
    }

    /// Validate settings, every component and the references between them
    pub fn validate(&self) -> Result<()> {
        self.supervisor.validate()?;

        if self.workers.is_empty() {
            return Err(MlinziError::InvalidConfig(
                "No worker configuration found in file".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for name in self
            .workers
            .iter()
            .map(|w| &w.name)
            .chain(self.dependencies.iter().map(|d| &d.name))
        {
            if !names.insert(name.as_str()) {
                return Err(MlinziError::ConfigValidationError(format!(
                    "Duplicate component name: {}",
                    name
                )));
            }
        }

        for dependency in &self.dependencies {
            dependency.validate()?;
        }

        let dependency_names: HashSet<&str> =
            self.dependencies.iter().map(|d| d.name.as_str()).collect();

        for worker in &self.workers {
            worker.validate()?;
            for required in &worker.requires {
                if !dependency_names.contains(required.as_str()) {
                    return Err(MlinziError::ConfigValidationError(format!(
                        "Worker {} requires unknown dependency {}",
                        worker.name, required
                    )));
                }
            }
        }

        Ok(())
    }

    fn expand_env_vars(&mut self) {
        for worker in &mut self.workers {
            worker.expand_env_vars();
        }
        for dependency in &mut self.dependencies {
            dependency.expand_env_vars();
        }
        if let Some(ref url) = self.supervisor.webhook_url {
            self.supervisor.webhook_url = Some(expand_env_in_string(url));
        }
    }
}

/// Expand $VAR and ${VAR} references in a string
fn expand_env_in_string(s: &str) -> String {
    let mut result = s.to_string();

    for (key, value) in std::env::vars() {
        result = result.replace(&format!("${{{}}}", key), &value);
        result = result.replace(&format!("${}", key), &value);
    }

    result
}

fn expand_env_in_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    PathBuf::from(expand_env_in_string(&path_str))
}
