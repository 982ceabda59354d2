// IPC Client - Communicates with the daemon via Unix socket

use crate::error::{MlinziError, Result};
use crate::ipc::{Command, Request, Response};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default socket path for daemon communication
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/mlinzi.sock";

/// Maximum number of connection attempts
const MAX_RETRY_ATTEMPTS: u32 = 3;

const RETRY_DELAY: Duration = Duration::from_millis(100);

/// IPC client for communicating with the daemon
pub struct IpcClient {
    socket_path: PathBuf,
    request_id: AtomicU64,
}

impl IpcClient {
    pub fn new() -> Self {
        Self::with_socket_path(DEFAULT_SOCKET_PATH)
    }

    pub fn with_socket_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            socket_path: path.as_ref().to_path_buf(),
            request_id: AtomicU64::new(1),
        }
    }

    /// Send a command to the daemon and wait for its response
    ///
    /// Only the connection is retried. Once a request has been written it
    /// is never sent twice, since commands like `Update` are not idempotent.
    pub fn send_command(&self, command: Command) -> Result<Response> {
        let request_id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = Request::new(request_id, command);

        let stream = self.connect_with_retry()?;
        let response = self.exchange(stream, &request)?;

        if response.id != request_id {
            return Err(MlinziError::ProtocolError(format!(
                "Response ID mismatch: expected {}, got {}",
                request_id, response.id
            )));
        }

        Ok(response)
    }

    fn connect_with_retry(&self) -> Result<UnixStream> {
        let mut last_error = None;
        for attempt in 1..=MAX_RETRY_ATTEMPTS {
            match self.connect() {
                Ok(stream) => return Ok(stream),
                // No daemon to wait for
                Err(MlinziError::DaemonNotRunning) => return Err(MlinziError::DaemonNotRunning),
                Err(e) => {
                    last_error = Some(e);
                    if attempt < MAX_RETRY_ATTEMPTS {
                        std::thread::sleep(RETRY_DELAY);
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            MlinziError::ConnectionError("Failed to connect after retries".to_string())
        }))
    }

    fn exchange(&self, mut stream: UnixStream, request: &Request) -> Result<Response> {
        let request_json = serde_json::to_string(request).map_err(|e| {
            MlinziError::SerializationError(format!("Failed to serialize request: {}", e))
        })?;

        writeln!(stream, "{}", request_json)
            .map_err(|e| MlinziError::IpcError(format!("Failed to write request: {}", e)))?;
        stream
            .flush()
            .map_err(|e| MlinziError::IpcError(format!("Failed to flush stream: {}", e)))?;

        let mut reader = BufReader::new(stream);
        let mut response_line = String::new();
        let read = reader
            .read_line(&mut response_line)
            .map_err(|e| MlinziError::IpcError(format!("Failed to read response: {}", e)))?;
        if read == 0 {
            return Err(MlinziError::IpcError(
                "Daemon closed the connection without responding".to_string(),
            ));
        }

        serde_json::from_str(&response_line).map_err(|e| {
            MlinziError::DeserializationError(format!("Failed to deserialize response: {}", e))
        })
    }

    fn connect(&self) -> Result<UnixStream> {
        if !self.socket_path.exists() {
            return Err(MlinziError::DaemonNotRunning);
        }

        UnixStream::connect(&self.socket_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::ConnectionRefused
                || e.kind() == std::io::ErrorKind::NotFound
            {
                MlinziError::DaemonNotRunning
            } else {
                MlinziError::ConnectionError(format!("Failed to connect to daemon: {}", e))
            }
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Default for IpcClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = IpcClient::new();
        assert_eq!(client.socket_path(), Path::new(DEFAULT_SOCKET_PATH));
    }

    #[test]
    fn test_request_id_increment() {
        let client = IpcClient::with_socket_path("/tmp/mlinzi-test-missing.sock");
        let _ = client.send_command(Command::Workers);
        let _ = client.send_command(Command::Workers);
        assert_eq!(client.request_id.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_daemon_not_running_error() {
        let client = IpcClient::with_socket_path("/tmp/mlinzi-test-nonexistent.sock");
        match client.send_command(Command::Health) {
            Err(MlinziError::DaemonNotRunning) => {}
            other => panic!("Expected DaemonNotRunning, got: {:?}", other),
        }
    }
}
