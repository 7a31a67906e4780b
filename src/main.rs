use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use lifehub_server::background_jobs::jobs::ExecutionHistoryCleanupJob;
use lifehub_server::background_jobs::lock::{PgAdvisoryLock, SqliteLeaseLock};
use lifehub_server::background_jobs::{
    DistributedLock, JobService, Monitor, Registry, Scheduler, WorkerPool, WorkerPoolConfig,
    DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS,
};
use lifehub_server::config::{self, AppConfig, FileConfig, LockSettings};
use lifehub_server::execution_store::{
    ExecutionStore, SqliteExecutionStore, STALE_EXECUTION_GRACE,
};
use lifehub_server::server::websocket::{Broadcaster, Hub, HubConfig};
use lifehub_server::server::{
    metrics, run_metrics_server, run_server, RequestsLoggingLevel, ServerState, TokenVerifier,
};

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    if path_buf.is_absolute() {
        return Ok(path_buf);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(path_buf))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// SQLite database holding job execution history (and lock leases).
    #[clap(long, value_parser = parse_path, default_value = "lifehub.db")]
    pub db_path: PathBuf,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3001)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// HMAC secret used to verify bearer tokens.
    #[clap(long)]
    pub jwt_secret: Option<String>,

    /// Number of background job workers.
    #[clap(long, default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Capacity of the background job queue.
    #[clap(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_path: args.db_path.clone(),
            port: args.port,
            metrics_port: args.metrics_port,
            logging_level: args.logging_level.clone(),
            jwt_secret: args.jwt_secret.clone(),
            workers: args.workers,
            queue_capacity: args.queue_capacity,
        }
    }
}

async fn create_lock(
    settings: &LockSettings,
    db_path: &std::path::Path,
) -> Result<Arc<dyn DistributedLock>> {
    match settings {
        LockSettings::Sqlite { lease_ttl } => {
            info!("Using SQLite lease locks (ttl {:?})", lease_ttl);
            Ok(Arc::new(SqliteLeaseLock::new(db_path, *lease_ttl)?))
        }
        LockSettings::Postgres { url } => {
            info!("Using PostgreSQL advisory locks");
            let lock = PgAdvisoryLock::connect(url)
                .await
                .context("Failed to connect to PostgreSQL for job locks")?;
            Ok(Arc::new(lock))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    metrics::init_metrics();

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let app_config = AppConfig::resolve(&(&cli_args).into(), file_config)?;

    info!("Opening execution history at {:?}", app_config.db_path);
    let execution_store: Arc<dyn ExecutionStore> =
        Arc::new(SqliteExecutionStore::new(&app_config.db_path)?);
    let lock = create_lock(&app_config.lock, &app_config.db_path).await?;

    let shutdown_token = CancellationToken::new();

    let hub = Hub::spawn(
        HubConfig::from(&app_config.websocket),
        shutdown_token.child_token(),
    );
    let broadcaster = Broadcaster::new(hub.clone());
    let monitor = Arc::new(Monitor::new());

    let worker_pool = Arc::new(
        WorkerPool::new(WorkerPoolConfig::from(&app_config.worker_pool))
            .with_lock(lock)
            .with_emitter(Arc::new(broadcaster.clone()))
            .with_monitor(monitor.clone())
            .with_execution_store(execution_store.clone()),
    );

    let registry = Arc::new(Registry::new());
    let scheduler = Arc::new(Scheduler::new(registry.clone(), worker_pool.clone()));
    scheduler.register(Arc::new(ExecutionHistoryCleanupJob::new(
        execution_store.clone(),
        app_config.jobs.history_retention_days,
        &app_config.jobs.history_cleanup_schedule,
    )))?;

    // Peers sharing the database may still be running recent executions.
    let longest_run = registry
        .list()
        .iter()
        .map(|job| worker_pool.effective_timeout(job.as_ref()))
        .max()
        .unwrap_or(app_config.worker_pool.min_timeout);
    let stale_before =
        Utc::now() - chrono::Duration::from_std(longest_run + STALE_EXECUTION_GRACE)?;
    let interrupted = execution_store.mark_stale_executions_failed(stale_before)?;
    if interrupted > 0 {
        info!(
            "Marked {} executions abandoned before {} as failed",
            interrupted, stale_before
        );
    }

    worker_pool.start();
    scheduler.start();

    let state = ServerState {
        config: app_config.server_config(),
        start_time: Instant::now(),
        hub,
        broadcaster,
        job_service: JobService::new(scheduler.clone(), monitor, execution_store),
        token_verifier: Arc::new(TokenVerifier::new(&app_config.jwt_secret)),
        worker_pool: worker_pool.clone(),
    };

    let result = tokio::select! {
        result = run_server(state, shutdown_token.clone()) => {
            info!("HTTP server stopped: {:?}", result);
            result
        },
        result = run_metrics_server(app_config.metrics_port, shutdown_token.clone()) => {
            info!("Metrics server stopped: {:?}", result);
            result
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown");
            Ok(())
        }
    };

    shutdown_token.cancel();
    scheduler.stop().await;
    worker_pool.stop().await;

    if let Err(e) = &result {
        error!("Server exited with error: {:#}", e);
    }
    info!("Shutdown complete");
    result
}
