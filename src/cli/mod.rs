// CLI module - User-facing command-line interface

mod output;

use crate::daemon::{DaemonManager, PidFile, StopResult, DEFAULT_PID_FILE};
use crate::error::{MlinziError, Result};
use crate::ipc::{Command, DaemonCommand, IpcClient, ResponseData, DEFAULT_SOCKET_PATH};
use crate::update::{ConfigPatch, UpdateOutcome};
use clap::{Args, Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// mlinzi - self-healing supervisor for ingestion workers
#[derive(Parser)]
#[command(name = "mlinzi")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Daemon socket
    #[arg(long, global = true, default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,

    /// Daemon PID file
    #[arg(long, global = true, default_value = DEFAULT_PID_FILE)]
    pid_file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List workers with their state and latest verdict
    Status,

    /// Show the latest health record of every component
    Health,

    /// Run a health cycle now and show the results
    Scan,

    /// Restart a worker immediately
    Restart { name: String },

    /// Return a failed worker to stopped so it can be started again
    Reset { name: String },

    /// Change a worker's configuration with automatic rollback
    Update {
        name: String,

        #[command(flatten)]
        patch: PatchArgs,
    },

    /// Show configuration snapshots taken before updates
    Snapshots { name: String },

    /// List alerts
    Alerts {
        /// Include resolved alerts
        #[arg(short, long)]
        all: bool,
    },

    /// Mark an alert as resolved
    Resolve { id: u64 },

    /// Manage the daemon
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },
}

#[derive(Subcommand)]
enum DaemonCommands {
    /// Check daemon status
    Status,
    /// Stop the daemon (SIGTERM, then SIGKILL after the timeout)
    Stop {
        #[arg(short, long, default_value = "30")]
        timeout: u64,
    },
}

#[derive(Args, Debug, Default)]
struct PatchArgs {
    /// New executable
    #[arg(long)]
    script: Option<PathBuf>,

    /// Replace the argument list (repeat for several)
    #[arg(long = "arg", allow_hyphen_values = true)]
    args: Vec<String>,

    /// Clear the argument list
    #[arg(long, conflicts_with = "args")]
    clear_args: bool,

    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Set an environment variable (KEY=VALUE)
    #[arg(short, long)]
    env: Vec<String>,

    /// Remove an environment variable
    #[arg(long)]
    unset_env: Vec<String>,

    #[arg(long)]
    stop_signal: Option<String>,

    #[arg(long)]
    stop_timeout: Option<u64>,

    #[arg(long)]
    status_file: Option<PathBuf>,

    /// Status freshness window in seconds
    #[arg(long)]
    freshness_window: Option<u64>,

    #[arg(long)]
    error_rate_threshold: Option<f64>,

    /// Memory ceiling in bytes
    #[arg(long)]
    max_memory: Option<u64>,

    /// Replace the required dependencies (repeat for several)
    #[arg(long = "require")]
    requires: Vec<String>,
}

impl PatchArgs {
    fn into_patch(self) -> Result<ConfigPatch> {
        let args = if self.clear_args {
            Some(Vec::new())
        } else if self.args.is_empty() {
            None
        } else {
            Some(self.args)
        };

        let patch = ConfigPatch {
            script: self.script,
            args,
            cwd: self.cwd,
            env_set: parse_env_vars(&self.env)?,
            env_unset: self.unset_env,
            enabled: None,
            stop_signal: self.stop_signal,
            stop_timeout_secs: self.stop_timeout,
            status_file: self.status_file,
            freshness_window_secs: self.freshness_window,
            error_rate_threshold: self.error_rate_threshold,
            max_memory: self.max_memory,
            requires: if self.requires.is_empty() {
                None
            } else {
                Some(self.requires)
            },
        };

        if patch.is_empty() {
            return Err(MlinziError::InvalidConfig(
                "update needs at least one change".to_string(),
            ));
        }

        Ok(patch)
    }
}

impl Cli {
    /// Run the CLI application
    pub fn run() -> Result<()> {
        let cli = Cli::parse();
        cli.execute()
    }

    fn execute(self) -> Result<()> {
        if let Commands::Daemon {
            command: DaemonCommands::Stop { timeout },
        } = self.command
        {
            return stop_daemon(&self.pid_file, Duration::from_secs(timeout));
        }

        let client = IpcClient::with_socket_path(&self.socket);
        let daemon_status = matches!(
            self.command,
            Commands::Daemon {
                command: DaemonCommands::Status
            }
        );
        let progress_label = match &self.command {
            Commands::Update { name, .. } => Some(format!("Updating {} (validate, apply, verify)", name)),
            Commands::Scan => Some("Scanning".to_string()),
            _ => None,
        };

        let command = build_command(self.command)?;

        let progress = progress_label.map(|label| output::create_progress_bar(&label));
        let response = client.send_command(command);
        if let Some(progress) = progress {
            progress.finish_and_clear();
        }

        match response {
            Err(MlinziError::DaemonNotRunning) if daemon_status => {
                output::print_daemon_not_running();
                Ok(())
            }
            response => handle_response(response?.result),
        }
    }
}

/// Translate a parsed subcommand into an IPC request
fn build_command(command: Commands) -> Result<Command> {
    let command = match command {
        Commands::Status => Command::Workers,
        Commands::Health => Command::Health,
        Commands::Scan => Command::Scan,
        Commands::Restart { name } => Command::Restart { name },
        Commands::Reset { name } => Command::Reset { name },
        Commands::Update { name, patch } => Command::Update {
            name,
            patch: patch.into_patch()?,
        },
        Commands::Snapshots { name } => Command::Snapshots { name },
        Commands::Alerts { all } => Command::Alerts {
            include_resolved: all,
        },
        Commands::Resolve { id } => Command::ResolveAlert { id },
        Commands::Daemon { command } => Command::Daemon(match command {
            DaemonCommands::Status => DaemonCommand::Status,
            DaemonCommands::Stop { .. } => DaemonCommand::Stop,
        }),
    };

    Ok(command)
}

fn handle_response(result: std::result::Result<ResponseData, String>) -> Result<()> {
    match result {
        Ok(data) => {
            output::print_success(&data);
            match data {
                ResponseData::Update(outcome) if !matches!(outcome, UpdateOutcome::Committed { .. }) => {
                    Err(MlinziError::Other("update was not committed".to_string()))
                }
                _ => Ok(()),
            }
        }
        Err(error_msg) => Err(MlinziError::Other(error_msg)),
    }
}

fn stop_daemon(pid_file: &std::path::Path, timeout: Duration) -> Result<()> {
    let manager = DaemonManager::with_pid_file(PidFile::with_path(pid_file));
    let Some(pid) = manager.get_pid() else {
        output::print_daemon_not_running();
        return Ok(());
    };

    let progress = output::create_progress_bar(&format!("Stopping daemon (PID: {})", pid));
    match manager.stop_daemon(timeout) {
        Ok(StopResult::Graceful) => {
            output::finish_progress_success(progress, "Daemon stopped");
            Ok(())
        }
        Ok(StopResult::Forced) => {
            output::finish_progress_success(progress, "Daemon did not stop in time and was killed");
            Ok(())
        }
        Err(e) => {
            output::finish_progress_error(progress, "Failed to stop daemon");
            Err(e)
        }
    }
}

/// Parse environment variables from KEY=VALUE format
fn parse_env_vars(env_vars: &[String]) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();

    for env_str in env_vars {
        match env_str.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                map.insert(key.to_string(), value.to_string());
            }
            _ => {
                return Err(MlinziError::ConfigError(format!(
                    "Invalid environment variable format: '{}'. Expected KEY=VALUE",
                    env_str
                )));
            }
        }
    }

    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_vars() {
        let env_vars = vec!["FEED=prices".to_string(), "URL=http://x?a=b".to_string()];
        let result = parse_env_vars(&env_vars).unwrap();
        assert_eq!(result.get("FEED"), Some(&"prices".to_string()));
        assert_eq!(result.get("URL"), Some(&"http://x?a=b".to_string()));
    }

    #[test]
    fn test_parse_env_vars_invalid() {
        assert!(parse_env_vars(&["INVALID".to_string()]).is_err());
        assert!(parse_env_vars(&["=value".to_string()]).is_err());
    }

    #[test]
    fn test_update_flags_to_patch() {
        let cli = Cli::try_parse_from([
            "mlinzi", "update", "prices", "--arg", "--once", "--arg", "30", "-e", "MODE=fast",
            "--require", "db",
        ])
        .unwrap();

        let Commands::Update { name, patch } = cli.command else {
            panic!("expected update");
        };
        let patch = patch.into_patch().unwrap();

        assert_eq!(name, "prices");
        assert_eq!(patch.args, Some(vec!["--once".to_string(), "30".to_string()]));
        assert_eq!(patch.env_set.get("MODE"), Some(&"fast".to_string()));
        assert_eq!(patch.requires, Some(vec!["db".to_string()]));
        assert!(patch.script.is_none());
    }

    #[test]
    fn test_update_without_changes_is_refused() {
        let cli = Cli::try_parse_from(["mlinzi", "update", "prices"]).unwrap();
        let Commands::Update { patch, .. } = cli.command else {
            panic!("expected update");
        };
        assert!(patch.into_patch().is_err());
    }

    #[test]
    fn test_clear_args() {
        let cli = Cli::try_parse_from(["mlinzi", "update", "prices", "--clear-args"]).unwrap();
        let Commands::Update { patch, .. } = cli.command else {
            panic!("expected update");
        };
        assert_eq!(patch.into_patch().unwrap().args, Some(Vec::new()));
    }

    #[test]
    fn test_global_socket_flag() {
        let cli = Cli::try_parse_from(["mlinzi", "alerts", "--all", "--socket", "/run/m.sock"]).unwrap();
        assert_eq!(cli.socket, PathBuf::from("/run/m.sock"));
        assert_eq!(
            build_command(cli.command).unwrap(),
            Command::Alerts {
                include_resolved: true
            }
        );
    }
}
