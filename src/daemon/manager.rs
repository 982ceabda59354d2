// Daemon lifecycle management from outside the daemon process

use super::pid::{is_process_alive, PidFile};
use crate::error::{MlinziError, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How the daemon went down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopResult {
    /// Exited after SIGTERM
    Graceful,
    /// Needed SIGKILL
    Forced,
}

/// Controls a daemon through its PID file
pub struct DaemonManager {
    pid_file: PidFile,
}

impl DaemonManager {
    pub fn new() -> Self {
        Self {
            pid_file: PidFile::new(),
        }
    }

    pub fn with_pid_file(pid_file: PidFile) -> Self {
        Self { pid_file }
    }

    pub fn is_running(&self) -> bool {
        self.pid_file.is_daemon_running()
    }

    /// PID of the running daemon, if any
    pub fn get_pid(&self) -> Option<u32> {
        self.pid_file.running_pid()
    }

    /// Send SIGTERM and wait up to `timeout` for the daemon to exit, then SIGKILL
    pub fn stop_daemon(&self, timeout: Duration) -> Result<StopResult> {
        let pid = self.get_pid().ok_or(MlinziError::DaemonNotRunning)?;
        let target = Pid::from_raw(
            i32::try_from(pid)
                .map_err(|_| MlinziError::SignalError(format!("PID {} out of range", pid)))?,
        );

        kill(target, Signal::SIGTERM)
            .map_err(|e| MlinziError::SignalError(format!("Failed to send SIGTERM: {}", e)))?;

        if wait_for_exit(pid, timeout) {
            self.pid_file.remove()?;
            return Ok(StopResult::Graceful);
        }

        kill(target, Signal::SIGKILL)
            .map_err(|e| MlinziError::SignalError(format!("Failed to send SIGKILL: {}", e)))?;

        if wait_for_exit(pid, Duration::from_secs(1)) {
            self.pid_file.remove()?;
            return Ok(StopResult::Forced);
        }

        Err(MlinziError::SignalError(format!(
            "Daemon (PID {}) survived SIGKILL",
            pid
        )))
    }

    pub fn pid_file(&self) -> &PidFile {
        &self.pid_file
    }
}

impl Default for DaemonManager {
    fn default() -> Self {
        Self::new()
    }
}

fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if !is_process_alive(pid) {
            return true;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    !is_process_alive(pid)
}
