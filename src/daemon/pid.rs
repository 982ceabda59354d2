// PID file management for the daemon process

use crate::error::{MlinziError, Result};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::fs;
use std::path::{Path, PathBuf};

/// Default PID file location
pub const DEFAULT_PID_FILE: &str = "/tmp/mlinzi.pid";

/// The daemon PID file, also used as a single-instance guard
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new() -> Self {
        Self::with_path(DEFAULT_PID_FILE)
    }

    pub fn with_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Claim the PID file for the current process
    ///
    /// Fails with `DaemonAlreadyRunning` when the file names another live
    /// process. A stale file left by a dead daemon is replaced.
    pub fn acquire(&self) -> Result<()> {
        if let Some(pid) = self.running_pid() {
            if pid != std::process::id() {
                return Err(MlinziError::DaemonAlreadyRunning(format!(
                    "PID {} holds {}",
                    pid,
                    self.path.display()
                )));
            }
        }

        self.write()
    }

    /// Write the current process PID to the file
    pub fn write(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| MlinziError::StateError(format!("Failed to create PID directory: {}", e)))?;
        }
        fs::write(&self.path, std::process::id().to_string())
            .map_err(|e| MlinziError::StateError(format!("Failed to write PID file: {}", e)))
    }

    pub fn read(&self) -> Result<u32> {
        let content = fs::read_to_string(&self.path)
            .map_err(|e| MlinziError::StateError(format!("Failed to read PID file: {}", e)))?;

        content
            .trim()
            .parse::<u32>()
            .map_err(|e| MlinziError::StateError(format!("Invalid PID in file: {}", e)))
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn remove(&self) -> Result<()> {
        if self.exists() {
            fs::remove_file(&self.path)
                .map_err(|e| MlinziError::StateError(format!("Failed to remove PID file: {}", e)))?;
        }
        Ok(())
    }

    /// PID recorded in the file, if that process is still alive
    pub fn running_pid(&self) -> Option<u32> {
        if !self.exists() {
            return None;
        }

        self.read().ok().filter(|pid| is_process_alive(*pid))
    }

    pub fn is_daemon_running(&self) -> bool {
        self.running_pid().is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for PidFile {
    fn default() -> Self {
        Self::new()
    }
}

/// Probe a PID with signal 0
pub(crate) fn is_process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };

    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        // Exists but belongs to someone else
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_and_read_pid() {
        let temp_dir = TempDir::new().unwrap();
        let pid_file = PidFile::with_path(temp_dir.path().join("mlinzi.pid"));

        pid_file.write().unwrap();
        assert_eq!(pid_file.read().unwrap(), std::process::id());
    }

    #[test]
    fn test_remove() {
        let temp_dir = TempDir::new().unwrap();
        let pid_file = PidFile::with_path(temp_dir.path().join("mlinzi.pid"));

        pid_file.write().unwrap();
        assert!(pid_file.exists());

        pid_file.remove().unwrap();
        assert!(!pid_file.exists());
        // Removing twice is fine
        pid_file.remove().unwrap();
    }

    #[test]
    fn test_running_pid_current_process() {
        let temp_dir = TempDir::new().unwrap();
        let pid_file = PidFile::with_path(temp_dir.path().join("mlinzi.pid"));

        pid_file.write().unwrap();
        assert_eq!(pid_file.running_pid(), Some(std::process::id()));
    }

    #[test]
    fn test_acquire_replaces_stale_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("mlinzi.pid");
        // Far above any pid_max
        fs::write(&path, "2147483000").unwrap();

        let pid_file = PidFile::with_path(&path);
        assert!(!pid_file.is_daemon_running());
        pid_file.acquire().unwrap();
        assert_eq!(pid_file.read().unwrap(), std::process::id());
    }

    #[test]
    fn test_acquire_refuses_live_instance() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("mlinzi.pid");

        let mut child = std::process::Command::new("/bin/sleep").arg("5").spawn().unwrap();
        fs::write(&path, child.id().to_string()).unwrap();

        let result = PidFile::with_path(&path).acquire();
        assert!(matches!(result, Err(MlinziError::DaemonAlreadyRunning(_))));

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn test_garbage_pid_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("mlinzi.pid");
        fs::write(&path, "not a pid").unwrap();

        let pid_file = PidFile::with_path(&path);
        assert!(pid_file.read().is_err());
        assert!(!pid_file.is_daemon_running());
    }
}
