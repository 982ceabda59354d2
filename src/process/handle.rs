use crate::config::WorkerConfig;
use crate::error::{MlinziError, Result};
use chrono::{DateTime, Utc};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// How long to wait for the exit notification after SIGKILL
const KILL_WAIT: Duration = Duration::from_secs(5);

/// Exit notification of a worker process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessExit {
    /// Exit code, if the process exited normally
    pub code: Option<i32>,
    /// Terminating signal, if the process was killed
    pub signal: Option<i32>,
    pub exited_at: DateTime<Utc>,
}

impl std::fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exited with code {}", code),
            (None, Some(signal)) => write!(f, "killed by signal {}", signal),
            (None, None) => write!(f, "exited"),
        }
    }
}

/// Handle to one running (or exited) worker process
///
/// The child itself is owned by a waiter task that reaps it and publishes
/// the exit through a watch channel, so handles can be cloned freely.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    name: String,
    pid: u32,
    started_at: DateTime<Utc>,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
}

impl ProcessHandle {
    /// Spawn a worker process from its configuration
    ///
    /// Stdout and stderr are captured and forwarded line by line to the
    /// `mlinzi::worker` tracing target.
    ///
    /// # Returns
    /// * `Ok(ProcessHandle)` - Process is running
    /// * `Err(MlinziError::SpawnError)` - Executable or working directory missing, or spawn failed
    pub async fn start(config: &WorkerConfig) -> Result<Self> {
        if !config.script.exists() {
            return Err(MlinziError::SpawnError(format!(
                "Script does not exist: {}",
                config.script.display()
            )));
        }

        let mut command = Command::new(&config.script);

        if !config.args.is_empty() {
            command.args(&config.args);
        }

        if let Some(ref cwd) = config.cwd {
            command.current_dir(cwd);
        }

        for (key, value) in &config.env {
            command.env(key, value);
        }

        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| {
            MlinziError::SpawnError(format!("Failed to spawn worker '{}': {}", config.name, e))
        })?;

        let pid = child.id().ok_or_else(|| {
            MlinziError::SpawnError(format!("Failed to get PID for worker '{}'", config.name))
        })?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(config.name.clone(), "stdout", stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(config.name.clone(), "stderr", stderr));
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        let worker = config.name.clone();
        tokio::spawn(async move {
            let exit = match child.wait().await {
                Ok(status) => ProcessExit {
                    code: status.code(),
                    signal: status.signal(),
                    exited_at: Utc::now(),
                },
                Err(e) => {
                    warn!(worker = %worker, "Failed to wait for worker process: {}", e);
                    ProcessExit {
                        code: None,
                        signal: None,
                        exited_at: Utc::now(),
                    }
                }
            };
            debug!(worker = %worker, pid, "Worker process {}", exit);
            exit_tx.send_replace(Some(exit));
        });

        info!(worker = %config.name, pid, "Worker process started");

        Ok(Self {
            name: config.name.clone(),
            pid,
            started_at: Utc::now(),
            exit_rx,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Whether the process has not exited yet
    pub fn is_running(&self) -> bool {
        self.exit_rx.borrow().is_none()
    }

    /// Exit information, if the process has exited
    pub fn exit_status(&self) -> Option<ProcessExit> {
        *self.exit_rx.borrow()
    }

    /// Wait until the process exits
    ///
    /// Returns `None` only if the waiter task disappeared without reporting.
    pub async fn on_exit(&self) -> Option<ProcessExit> {
        let mut rx = self.exit_rx.clone();
        let exit = match rx.wait_for(|exit| exit.is_some()).await {
            Ok(exit) => *exit,
            Err(_) => None,
        };
        exit
    }

    /// Stop the process: graceful signal first, SIGKILL once `grace` elapses
    ///
    /// Stopping a process that already exited is a no-op.
    pub async fn stop(&self, stop_signal: &str, grace: Duration) -> Result<()> {
        if !self.is_running() {
            return Ok(());
        }

        let signal = parse_signal(stop_signal)?;
        let pid = Pid::from_raw(self.pid as i32);

        info!(
            worker = %self.name,
            pid = self.pid,
            "Gracefully stopping worker with {}",
            stop_signal
        );

        if let Err(e) = send_signal(pid, signal) {
            return Err(MlinziError::StopError(
                self.name.clone(),
                format!("Failed to send {}: {}", stop_signal, e),
            ));
        }

        if self.wait_for_exit(grace).await {
            info!(worker = %self.name, "Worker stopped");
            return Ok(());
        }

        warn!(
            worker = %self.name,
            "Worker did not exit within {:?}, sending SIGKILL",
            grace
        );

        send_signal(pid, Signal::SIGKILL).map_err(|e| {
            MlinziError::StopError(
                self.name.clone(),
                format!("Failed to send SIGKILL after timeout: {}", e),
            )
        })?;

        if self.wait_for_exit(KILL_WAIT).await {
            Ok(())
        } else {
            Err(MlinziError::StopError(
                self.name.clone(),
                "Process did not exit after SIGKILL".to_string(),
            ))
        }
    }

    async fn wait_for_exit(&self, limit: Duration) -> bool {
        let mut rx = self.exit_rx.clone();
        let result = tokio::time::timeout(limit, rx.wait_for(|exit| exit.is_some())).await;
        result.is_ok()
    }
}

/// Send a signal, treating an already-gone process as success
fn send_signal(pid: Pid, signal: Signal) -> std::result::Result<(), nix::errno::Errno> {
    match signal::kill(pid, signal) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Parse a configured signal name
pub fn parse_signal(signal_name: &str) -> Result<Signal> {
    match signal_name {
        "SIGTERM" => Ok(Signal::SIGTERM),
        "SIGINT" => Ok(Signal::SIGINT),
        "SIGQUIT" => Ok(Signal::SIGQUIT),
        "SIGKILL" => Ok(Signal::SIGKILL),
        "SIGHUP" => Ok(Signal::SIGHUP),
        "SIGUSR1" => Ok(Signal::SIGUSR1),
        "SIGUSR2" => Ok(Signal::SIGUSR2),
        _ => Err(MlinziError::SignalError(format!(
            "Invalid signal name: {}",
            signal_name
        ))),
    }
}

async fn forward_output<R>(worker: String, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if stream == "stderr" {
                    warn!(target: "mlinzi::worker", worker = %worker, stream, "{}", line);
                } else {
                    info!(target: "mlinzi::worker", worker = %worker, stream, "{}", line);
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(worker = %worker, stream, "Stopped reading worker output: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn sleeper(name: &str) -> WorkerConfig {
        WorkerConfig::new(name, "/bin/sleep").with_args(["30"])
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let handle = ProcessHandle::start(&sleeper("sleeper")).await.unwrap();
        assert!(handle.pid() > 0);
        assert!(handle.is_running());
        assert_eq!(handle.name(), "sleeper");

        handle.stop("SIGTERM", Duration::from_secs(2)).await.unwrap();
        assert!(!handle.is_running());

        let exit = handle.exit_status().unwrap();
        assert_eq!(exit.signal, Some(Signal::SIGTERM as i32));
    }

    #[tokio::test]
    async fn test_start_nonexistent_script() {
        let config = WorkerConfig::new("missing", "/nonexistent/worker");

        match ProcessHandle::start(&config).await {
            Err(MlinziError::SpawnError(msg)) => assert!(msg.contains("does not exist")),
            other => panic!("Expected SpawnError, got {:?}", other.map(|h| h.pid())),
        }
    }

    #[tokio::test]
    async fn test_start_invalid_working_directory() {
        let mut config = WorkerConfig::new("bad-cwd", "/bin/echo");
        config.cwd = Some(PathBuf::from("/nonexistent/directory"));

        let result = ProcessHandle::start(&config).await;
        assert!(matches!(result, Err(MlinziError::SpawnError(_))));
    }

    #[tokio::test]
    async fn test_on_exit_reports_code() {
        let config = WorkerConfig::new("exit-3", "/bin/sh").with_args(["-c", "exit 3"]);
        let handle = ProcessHandle::start(&config).await.unwrap();

        let exit = handle.on_exit().await.unwrap();
        assert_eq!(exit.code, Some(3));
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let config = WorkerConfig::new("short", "/bin/sh").with_args(["-c", "exit 0"]);
        let handle = ProcessHandle::start(&config).await.unwrap();
        handle.on_exit().await;

        assert!(handle.stop("SIGTERM", Duration::from_secs(1)).await.is_ok());
        assert!(handle.stop("SIGTERM", Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_start_with_env_and_cwd() {
        let temp_dir = TempDir::new().unwrap();
        let marker = temp_dir.path().join("marker");
        let mut config = WorkerConfig::new("env", "/bin/sh")
            .with_args(["-c", "echo \"$MLINZI_MARKER\" > marker"]);
        config.cwd = Some(temp_dir.path().to_path_buf());
        config
            .env
            .insert("MLINZI_MARKER".to_string(), "written".to_string());

        let handle = ProcessHandle::start(&config).await.unwrap();
        let exit = handle.on_exit().await.unwrap();
        assert_eq!(exit.code, Some(0));

        let contents = std::fs::read_to_string(marker).unwrap();
        assert_eq!(contents.trim(), "written");
    }

    #[test]
    fn test_parse_signal() {
        assert_eq!(parse_signal("SIGTERM").unwrap(), Signal::SIGTERM);
        assert_eq!(parse_signal("SIGHUP").unwrap(), Signal::SIGHUP);
        assert!(matches!(
            parse_signal("SIGFOO"),
            Err(MlinziError::SignalError(_))
        ));
    }
}
