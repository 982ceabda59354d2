use thiserror::Error;

/// Main error type for the mlinzi supervisor
#[derive(Debug, Error)]
pub enum MlinziError {
    // Worker and component errors
    #[error("Worker not found: {0}")]
    WorkerNotFound(String),

    #[error("Component not found: {0}")]
    ComponentNotFound(String),

    #[error("Failed to start worker: {0}")]
    SpawnError(String),

    #[error("Failed to stop worker {0}: {1}")]
    StopError(String, String),

    #[error("Worker {0} is in invalid state for this operation: {1}")]
    InvalidWorkerState(String, String),

    // Health probing errors
    #[error("Probe timed out for {0}")]
    ProbeTimeout(String),

    #[error("Probe failed: {0}")]
    ProbeError(String),

    // Safe update protocol errors
    #[error("Validation failed: {0}")]
    ValidationError(String),

    #[error("Apply failed: {0}")]
    ApplyError(String),

    #[error("Rollback failed: {0}")]
    RollbackError(String),

    // Alert errors
    #[error("Alert not found: {0}")]
    AlertNotFound(u64),

    #[error("Notification failed: {0}")]
    NotifyError(String),

    // IPC-related errors
    #[error("IPC error: {0}")]
    IpcError(String),

    #[error("Failed to connect to daemon: {0}")]
    ConnectionError(String),

    #[error("IPC protocol error: {0}")]
    ProtocolError(String),

    #[error("Daemon not running")]
    DaemonNotRunning,

    #[error("Daemon already running: {0}")]
    DaemonAlreadyRunning(String),

    // State store errors
    #[error("State store error: {0}")]
    StateError(String),

    #[error("Failed to load state: {0}")]
    StateLoadError(String),

    #[error("Failed to save state: {0}")]
    StateSaveError(String),

    #[error("State corruption detected: {0}")]
    StateCorruption(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Missing required configuration field: {0}")]
    MissingConfigField(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // System errors
    #[error("Signal error: {0}")]
    SignalError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for mlinzi operations
pub type Result<T> = std::result::Result<T, MlinziError>;
