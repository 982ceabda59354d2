use mlinzi::config::WorkerConfig;
use mlinzi::process::{ProcessHandle, WorkerState};
use mlinzi::supervisor::WorkerTable;
use std::time::{Duration, Instant};

fn create_test_config(name: &str) -> WorkerConfig {
    let mut config = WorkerConfig::new(name, "/bin/sleep").with_args(["30"]);
    config.stop_timeout_secs = 5;
    config
}

/// A worker that ignores SIGTERM
fn stubborn_config(name: &str) -> WorkerConfig {
    let mut config = WorkerConfig::new(name, "/bin/sh")
        .with_args(["-c", "trap '' TERM; while true; do sleep 0.1; done"]);
    config.stop_timeout_secs = 1;
    config
}

#[tokio::test]
async fn test_graceful_shutdown_with_sigterm() {
    let config = create_test_config("sigterm-test");
    let handle = ProcessHandle::start(&config).await.unwrap();
    assert!(handle.is_running());

    let start = Instant::now();
    handle.stop("SIGTERM", config.stop_timeout()).await.unwrap();

    // sleep exits on SIGTERM, well before the grace period
    assert!(start.elapsed() < Duration::from_secs(3));
    let exit = handle.exit_status().unwrap();
    assert_eq!(exit.signal, Some(libc_sigterm()));
}

#[tokio::test]
async fn test_graceful_shutdown_respects_signal_config() {
    for signal in ["SIGTERM", "SIGINT", "SIGQUIT", "SIGHUP", "SIGUSR1", "SIGUSR2"] {
        let mut config = create_test_config(&format!("signal-{}", signal));
        config.stop_signal = signal.to_string();

        let handle = ProcessHandle::start(&config).await.unwrap();
        let result = handle.stop(&config.stop_signal, config.stop_timeout()).await;

        assert!(result.is_ok(), "Failed to stop with signal {}", signal);
        assert!(!handle.is_running());
    }
}

#[tokio::test]
async fn test_escalates_to_sigkill_after_grace() {
    let config = stubborn_config("stubborn");
    let handle = ProcessHandle::start(&config).await.unwrap();
    // Give the shell time to install its trap
    tokio::time::sleep(Duration::from_millis(200)).await;

    let start = Instant::now();
    handle.stop("SIGTERM", config.stop_timeout()).await.unwrap();
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_secs(5));
    assert_eq!(handle.exit_status().unwrap().signal, Some(9));
}

#[tokio::test]
async fn test_shutdown_all_stops_every_worker() {
    let table = WorkerTable::new(vec![
        create_test_config("multi-1"),
        create_test_config("multi-2"),
        stubborn_config("multi-3"),
    ]);

    for name in table.names() {
        table.start(&name).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let pids: Vec<u32> = {
        let mut pids = Vec::new();
        for name in table.names() {
            pids.push(table.info(&name).await.unwrap().pid.unwrap());
        }
        pids
    };

    table.shutdown_all().await;

    for name in table.names() {
        let info = table.info(&name).await.unwrap();
        assert!(info.pid.is_none(), "{} still has a process", name);
        assert!(info.last_exit.is_some());
        // Lifecycle state is kept for persistence
        assert_eq!(info.state, WorkerState::Running);
    }

    // Reaped, so signal 0 finds nothing
    for pid in pids {
        let alive = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok();
        assert!(!alive, "process {} survived shutdown", pid);
    }
}

fn libc_sigterm() -> i32 {
    nix::sys::signal::Signal::SIGTERM as i32
}
