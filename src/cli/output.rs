// Output formatting and display for CLI

use crate::alert::{Alert, AlertLevel};
use crate::health::{HealthRecord, HealthStatus};
use crate::ipc::{DaemonStatus, ResponseData};
use crate::process::WorkerState;
use crate::supervisor::WorkerInfo;
use crate::update::{ConfigSnapshot, UpdateOutcome};
use chrono::{DateTime, Local, Utc};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

/// Print a success response to stdout
pub fn print_success(data: &ResponseData) {
    match data {
        ResponseData::Workers(workers) => {
            if workers.is_empty() {
                println!("{}", "No workers configured".yellow());
            } else {
                print_worker_table(workers);
            }
        }

        ResponseData::Health(records) => {
            if records.is_empty() {
                println!("{}", "No health records yet".yellow());
            } else {
                print_health_table(records);
            }
        }

        ResponseData::Restarted { name } => {
            println!(
                "{}",
                format!("✓ Worker {} restarted", name).green().bold()
            );
        }

        ResponseData::Reset { name } => {
            println!(
                "{}",
                format!("✓ Worker {} reset to stopped", name).green().bold()
            );
        }

        ResponseData::Update(outcome) => print_update_outcome(outcome),

        ResponseData::Snapshots(snapshots) => {
            if snapshots.is_empty() {
                println!("{}", "No snapshots recorded".yellow());
            } else {
                print_snapshots(snapshots);
            }
        }

        ResponseData::Alerts(alerts) => {
            if alerts.is_empty() {
                println!("{}", "No alerts".green());
            } else {
                print_alert_table(alerts);
            }
        }

        ResponseData::AlertResolved(alert) => {
            println!(
                "{}",
                format!("✓ Alert {} resolved ({})", alert.id, alert.component)
                    .green()
                    .bold()
            );
        }

        ResponseData::DaemonStatus(status) => print_daemon_status(status),

        ResponseData::Success(message) => {
            println!("{} {}", "✓".green().bold(), message);
        }
    }
}

pub fn print_daemon_not_running() {
    println!("{}", "✗ Daemon is not running".red().bold());
}

fn print_daemon_status(status: &DaemonStatus) {
    println!("{}", "✓ Daemon is running".green().bold());
    println!("  {:<18} {}", "PID:".bold(), status.pid);
    println!("  {:<18} {}", "Version:".bold(), status.version);
    println!(
        "  {:<18} {}",
        "Uptime:".bold(),
        format_duration(&Duration::from_secs(status.uptime_secs))
    );
    println!("  {:<18} {}", "Workers:".bold(), status.workers);
    println!("  {:<18} {}", "Pending restarts:".bold(), status.pending_restarts);
}

fn print_update_outcome(outcome: &UpdateOutcome) {
    match outcome {
        UpdateOutcome::Committed { .. } => {
            println!("{} {}", "✓ Update".green().bold(), outcome);
        }
        UpdateOutcome::RolledBack {
            recovered: true, ..
        } => {
            println!("{} {}", "↺ Update".yellow().bold(), outcome);
        }
        UpdateOutcome::RolledBack { .. } => {
            println!("{} {}", "✗ Update".red().bold(), outcome);
        }
        UpdateOutcome::Rejected { .. } => {
            println!("{} {}", "✗ Update".yellow().bold(), outcome);
        }
    }
}

fn print_worker_table(workers: &[WorkerInfo]) {
    #[derive(Tabled)]
    struct WorkerRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "State")]
        state: String,
        #[tabled(rename = "Health")]
        health: String,
        #[tabled(rename = "PID")]
        pid: String,
        #[tabled(rename = "Uptime")]
        uptime: String,
        #[tabled(rename = "Restarts")]
        restarts: String,
        #[tabled(rename = "Reason")]
        reason: String,
    }

    let now = Utc::now();
    let rows: Vec<WorkerRow> = workers
        .iter()
        .map(|w| WorkerRow {
            name: truncate(&w.name, 20),
            state: if w.enabled {
                format_state_colored(&w.state)
            } else {
                "disabled".bright_black().to_string()
            },
            health: format_health_colored(&w.health),
            pid: w
                .pid
                .map(|pid| pid.to_string())
                .unwrap_or_else(|| "-".to_string()),
            uptime: w
                .started_at
                .filter(|_| w.pid.is_some())
                .map(|started| format_duration(&since(started, now)))
                .unwrap_or_else(|| "-".to_string()),
            restarts: w.restarts.to_string(),
            reason: truncate(&w.reason, 40),
        })
        .collect();

    print_table(Table::new(rows));
    println!(
        "{}",
        format!("Total: {} worker(s)", workers.len()).dimmed().italic()
    );
}

fn print_health_table(records: &[HealthRecord]) {
    #[derive(Tabled)]
    struct HealthRow {
        #[tabled(rename = "Component")]
        component: String,
        #[tabled(rename = "Kind")]
        kind: String,
        #[tabled(rename = "Status")]
        status: String,
        #[tabled(rename = "Latency")]
        latency: String,
        #[tabled(rename = "Memory")]
        memory: String,
        #[tabled(rename = "Checked")]
        checked: String,
        #[tabled(rename = "Reason")]
        reason: String,
    }

    let rows: Vec<HealthRow> = records
        .iter()
        .map(|r| HealthRow {
            component: truncate(&r.component, 20),
            kind: r.kind.to_string(),
            status: format_health_colored(&r.status),
            latency: r
                .metrics
                .latency_ms
                .map(|ms| format!("{}ms", ms))
                .unwrap_or_else(|| "-".to_string()),
            memory: r
                .metrics
                .memory_bytes
                .map(format_memory)
                .unwrap_or_else(|| "-".to_string()),
            checked: format_local(r.checked_at, "%H:%M:%S"),
            reason: truncate(&r.reason, 40),
        })
        .collect();

    print_table(Table::new(rows));
}

fn print_alert_table(alerts: &[Alert]) {
    #[derive(Tabled)]
    struct AlertRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Level")]
        level: String,
        #[tabled(rename = "Component")]
        component: String,
        #[tabled(rename = "Raised")]
        raised: String,
        #[tabled(rename = "Status")]
        status: String,
        #[tabled(rename = "Message")]
        message: String,
    }

    let rows: Vec<AlertRow> = alerts
        .iter()
        .map(|a| AlertRow {
            id: a.id.to_string(),
            level: match a.level {
                AlertLevel::Critical => a.level.to_string().red().bold().to_string(),
                AlertLevel::Warning => a.level.to_string().yellow().to_string(),
            },
            component: truncate(&a.component, 20),
            raised: format_local(a.timestamp, "%Y-%m-%d %H:%M:%S"),
            status: if a.resolved {
                "resolved".bright_black().to_string()
            } else {
                "open".red().to_string()
            },
            message: truncate(&a.message, 50),
        })
        .collect();

    print_table(Table::new(rows));
}

fn print_snapshots(snapshots: &[ConfigSnapshot]) {
    println!("\n{}", "Configuration snapshots (oldest first)".bold().underline());
    for snapshot in snapshots {
        let config = &snapshot.config;
        println!();
        println!(
            "  {} {}  {}",
            "#".dimmed(),
            snapshot.id.to_string().cyan(),
            format_local(snapshot.taken_at, "%Y-%m-%d %H:%M:%S").dimmed()
        );
        println!("    {:<10} {}", "Script:".bold(), config.script.display());
        if !config.args.is_empty() {
            println!("    {:<10} {}", "Args:".bold(), config.args.join(" "));
        }
        if !config.env.is_empty() {
            let mut keys: Vec<&String> = config.env.keys().collect();
            keys.sort();
            let keys: Vec<&str> = keys.into_iter().map(String::as_str).collect();
            println!("    {:<10} {}", "Env:".bold(), keys.join(", "));
        }
        if !config.requires.is_empty() {
            println!("    {:<10} {}", "Requires:".bold(), config.requires.join(", "));
        }
    }
    println!();
}

fn print_table(mut table: Table) {
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));
    println!("\n{}\n", table);
}

fn format_state_colored(state: &WorkerState) -> String {
    match state {
        WorkerState::Healthy | WorkerState::Running => state.to_string().green().to_string(),
        WorkerState::Starting | WorkerState::Restarting | WorkerState::Degraded => {
            state.to_string().yellow().to_string()
        }
        WorkerState::Stopped => state.to_string().bright_black().to_string(),
        WorkerState::Unhealthy | WorkerState::Crashed => state.to_string().red().to_string(),
        WorkerState::Failed => state.to_string().red().bold().to_string(),
    }
}

fn format_health_colored(status: &HealthStatus) -> String {
    match status {
        HealthStatus::Healthy => status.to_string().green().to_string(),
        HealthStatus::Degraded => status.to_string().yellow().to_string(),
        HealthStatus::Unhealthy => status.to_string().red().to_string(),
        HealthStatus::Unknown => status.to_string().bright_black().to_string(),
    }
}

fn format_local(at: DateTime<Utc>, pattern: &str) -> String {
    let local: DateTime<Local> = at.into();
    local.format(pattern).to_string()
}

fn since(started: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - started).to_std().unwrap_or_default()
}

/// Format a duration in human-readable format
fn format_duration(duration: &Duration) -> String {
    let secs = duration.as_secs();

    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        let mins = secs / 60;
        let secs = secs % 60;
        if secs > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}m", mins)
        }
    } else if secs < 86400 {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        if mins > 0 {
            format!("{}h {}m", hours, mins)
        } else {
            format!("{}h", hours)
        }
    } else {
        let days = secs / 86400;
        let hours = (secs % 86400) / 3600;
        if hours > 0 {
            format!("{}d {}h", days, hours)
        } else {
            format!("{}d", days)
        }
    }
}

fn format_memory(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes < KB {
        format!("{}B", bytes)
    } else if bytes < MB {
        format!("{:.1}KB", bytes as f64 / KB as f64)
    } else if bytes < GB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else {
        format!("{:.2}GB", bytes as f64 / GB as f64)
    }
}

/// Truncate on a character boundary
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Spinner for requests that may take a while (updates, scans, daemon stop)
pub fn create_progress_bar(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

pub fn finish_progress_success(pb: ProgressBar, message: &str) {
    pb.finish_with_message(format!("{} {}", "✓".green(), message));
}

pub fn finish_progress_error(pb: ProgressBar, message: &str) {
    pb.finish_with_message(format!("{} {}", "✗".red(), message));
}
