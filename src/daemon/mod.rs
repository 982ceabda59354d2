// Daemon module - PID file and out-of-process control

pub mod manager;
pub mod pid;

pub use manager::{DaemonManager, StopResult};
pub use pid::{PidFile, DEFAULT_PID_FILE};
