use anyhow::{Context, Result};
use clap::Parser;
use mlinzi::config::SupervisorFile;
use mlinzi::daemon::PidFile;
use mlinzi::ipc::{CommandHandler, IpcServer};
use mlinzi::logging::init_logging;
use mlinzi::supervisor::Supervisor;
use std::path::PathBuf;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info};

/// mlinzi supervisor daemon
#[derive(Parser)]
#[command(name = "mlinzi-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Supervisor configuration file (TOML or JSON)
    #[arg(short, long)]
    config: PathBuf,

    /// Override the socket path from the configuration
    #[arg(long)]
    socket: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();

    let mut file = SupervisorFile::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(socket) = args.socket {
        file.supervisor.socket_path = socket;
    }

    let pid_file = PidFile::with_path(&file.supervisor.pid_file);
    pid_file.acquire().context("taking the PID file")?;

    let result = run(file).await;

    if let Err(e) = pid_file.remove() {
        error!("Failed to remove PID file: {}", e);
    }

    result
}

async fn run(file: SupervisorFile) -> Result<()> {
    let socket_path = file.supervisor.socket_path.clone();
    let supervisor = Supervisor::new(file).context("building the supervisor")?;

    let mut server = IpcServer::with_socket_path(&socket_path);
    server.start().context("binding the IPC socket")?;
    info!("IPC server listening on {}", socket_path.display());

    supervisor.start().await.context("starting workers")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let control_loop = {
        let supervisor = supervisor.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { supervisor.run(shutdown).await })
    };

    let handler = CommandHandler::new(supervisor.clone(), shutdown_tx.clone());
    let server_task = {
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let result = server
                .run(
                    move |command| {
                        let handler = handler.clone();
                        async move { handler.handle(command).await }
                    },
                    shutdown,
                )
                .await;
            if let Err(e) = result {
                error!("IPC server error: {}", e);
            }
            // Dropping the server removes the socket file
        })
    };

    wait_for_shutdown(shutdown_rx).await?;
    let _ = shutdown_tx.send(true);

    if let Err(e) = control_loop.await {
        error!("Control loop task failed: {}", e);
    }
    supervisor.shutdown().await;
    if let Err(e) = server_task.await {
        error!("IPC server task failed: {}", e);
    }

    info!("Daemon stopped");
    Ok(())
}

/// Resolves on SIGTERM, SIGINT or a stop request over IPC
async fn wait_for_shutdown(mut requested: watch::Receiver<bool>) -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
        _ = sigint.recv() => info!("Received SIGINT, shutting down"),
        _ = requested.wait_for(|stop| *stop) => info!("Shutdown requested over IPC"),
    }

    Ok(())
}
