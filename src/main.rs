#![forbid(unsafe_code)]

//! `spark-dispatch` — task dispatch and SLA enforcement server binary.
//!
//! Bootstraps configuration, the task store, the event bus, the assigner
//! and deadline monitor loops, and the admin IPC server for `dispatchctl`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use spark_dispatch::bus::EventBus;
use spark_dispatch::config::GlobalConfig;
use spark_dispatch::dispatch::{assigner, deadline_monitor};
use spark_dispatch::intake::{AutoApplyRequest, IntakeService};
use spark_dispatch::ipc::{spawn_ipc_server, AdminState};
use spark_dispatch::persistence::reviewer_repo::ReviewerRepo;
use spark_dispatch::persistence::store::TaskStore;
use spark_dispatch::persistence::task_repo::TaskRepo;
use spark_dispatch::persistence::{db, retention};
use spark_dispatch::{AppError, Result};

/// Depth of the auto-apply hand-off channel.
const AUTO_APPLY_BUFFER: usize = 64;

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "spark-dispatch", about = "Task dispatch and SLA enforcement core", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the configured data directory.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("spark-dispatch server bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config).map_err(|err| {
        AppError::Config(format!(
            "cannot load config '{}': {err} — pass --config <path> or create config.toml \
             next to the binary",
            args.config.display()
        ))
    })?;

    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    let config = Arc::new(config);
    info!("configuration loaded");

    // ── Initialize database ─────────────────────────────
    let db = Arc::new(db::connect(&config.db_path()).await?);
    info!("database connected");

    // ── Build shared state ──────────────────────────────
    let bus = EventBus::new();
    let store = TaskStore::new(Arc::clone(&db), bus.clone(), Arc::clone(&config));

    let (auto_apply_tx, auto_apply_rx) = mpsc::channel(AUTO_APPLY_BUFFER);
    let intake = IntakeService::new(store.clone(), auto_apply_tx, config.score_threshold);

    // ── Check in-flight work from prior run ─────────────
    startup_recovery_scan(&store).await;

    // ── Start background components ─────────────────────
    let ct = CancellationToken::new();

    let retention_handle =
        retention::spawn_retention_task(Arc::clone(&db), config.retention_days, ct.clone());
    let assigner_handle = assigner::spawn_assigner(store.clone(), Arc::clone(&config), ct.clone());
    let monitor_handle =
        deadline_monitor::spawn_deadline_monitor(store.clone(), Arc::clone(&config), ct.clone());
    let handoff_handle = spawn_auto_apply_handoff(auto_apply_rx, ct.clone());

    let admin_state = Arc::new(AdminState {
        store: store.clone(),
        intake,
        ipc_name: config.ipc_name.clone(),
        auth_token: std::env::var("SPARK_DISPATCH_IPC_TOKEN").ok(),
    });
    let ipc_handle = spawn_ipc_server(admin_state, ct.clone())?;

    info!("spark-dispatch ready");

    // ── Wait for first shutdown signal ──────────────────
    shutdown_signal().await;
    info!("shutdown signal received — starting graceful shutdown");
    ct.cancel();

    // Spawn a background listener for a second Ctrl+C (force-exit).
    tokio::spawn(async {
        shutdown_signal().await;
        error!("second shutdown signal received — forcing exit");
        std::process::exit(1);
    });

    // ── Graceful shutdown with timeout ───────────────────
    let shutdown_fut = async {
        for handle in [
            assigner_handle,
            monitor_handle,
            retention_handle,
            handoff_handle,
            ipc_handle,
        ] {
            let _ = handle.await;
        }
    };
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, shutdown_fut)
        .await
        .is_err()
    {
        error!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "graceful shutdown timed out — exiting"
        );
    }

    info!("spark-dispatch shut down");
    Ok(())
}

/// Maximum time to wait for graceful shutdown before force-exiting.
const SHUTDOWN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Log the in-flight work rediscovered after a restart.
///
/// Nothing is mutated: queued tasks are picked up by the assigner's next
/// pass, and in-flight tasks keep their deadlines for the monitor to
/// enforce, so a crash-restart converges to the same state as a graceful
/// continuation.
async fn startup_recovery_scan(store: &TaskStore) {
    let tasks = TaskRepo::new(store.db());
    let reviewers = ReviewerRepo::new(store.db());

    match tasks.counts().await {
        Ok(counts) => {
            if counts.queued + counts.assigned + counts.in_progress > 0 {
                info!(
                    queued = counts.queued,
                    assigned = counts.assigned,
                    in_progress = counts.in_progress,
                    "found in-flight tasks on startup"
                );
            } else {
                info!("no in-flight tasks found on startup");
            }
        }
        Err(err) => warn!(%err, "failed to scan tasks on startup"),
    }

    match reviewers.count_suspended().await {
        Ok(0) => {}
        Ok(suspended) => info!(suspended, "suspended reviewers awaiting admin reset"),
        Err(err) => warn!(%err, "failed to scan reviewers on startup"),
    }
}

/// Drain the auto-apply hand-off channel.
///
/// The auto-apply actor is an external collaborator; this boundary task
/// logs each hand-off so operators can trace the split until the actor
/// consumes the channel directly.
fn spawn_auto_apply_handoff(
    mut rx: mpsc::Receiver<AutoApplyRequest>,
    ct: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = ct.cancelled() => {
                    info!("auto-apply hand-off shutting down");
                    break;
                }
                request = rx.recv() => {
                    let Some(request) = request else { break };
                    info!(
                        candidate_id = %request.candidate_id,
                        job_id = %request.job_id,
                        ats_score = request.ats_score,
                        "handed off to auto-apply"
                    );
                }
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
