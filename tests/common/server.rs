//! Test server lifecycle management
//!
//! Each test gets an isolated server with its own execution database, worker
//! pool, scheduler and realtime hub.

use super::constants::*;
use super::jobs::EchoJob;
use lifehub_server::background_jobs::jobs::ExecutionHistoryCleanupJob;
use lifehub_server::background_jobs::lock::SqliteLeaseLock;
use lifehub_server::background_jobs::{
    JobService, Monitor, Registry, Scheduler, WorkerPool, WorkerPoolConfig,
};
use lifehub_server::execution_store::{ExecutionStore, SqliteExecutionStore};
use lifehub_server::server::websocket::{Broadcaster, Hub, HubConfig};
use lifehub_server::server::{
    serve, RequestsLoggingLevel, ServerConfig, ServerState, TokenVerifier,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Test server instance with an isolated database
///
/// When dropped, the server and hub shut down and temp resources are cleaned up.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// Publishes events straight into the server's hub
    pub broadcaster: Broadcaster,

    pub hub: Arc<Hub>,

    pub verifier: Arc<TokenVerifier>,

    // Private fields - keep resources alive until drop
    shutdown: CancellationToken,
    _temp_dir: TempDir,
}

impl TestServer {
    /// Spawns a new test server on a random port
    ///
    /// # Panics
    ///
    /// Panics if the database cannot be created, the port cannot be bound,
    /// or the server doesn't become ready within the timeout.
    pub async fn spawn() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("lifehub.db");

        let store: Arc<dyn ExecutionStore> =
            Arc::new(SqliteExecutionStore::new(&db_path).expect("Failed to open execution store"));
        let lock = Arc::new(
            SqliteLeaseLock::new(&db_path, Duration::from_secs(60))
                .expect("Failed to open lock table"),
        );

        let shutdown = CancellationToken::new();
        let hub = Hub::spawn(HubConfig::default(), shutdown.child_token());
        let broadcaster = Broadcaster::new(hub.clone());
        let monitor = Arc::new(Monitor::new());

        let pool = Arc::new(
            WorkerPool::new(WorkerPoolConfig {
                workers: 2,
                queue_capacity: 16,
                drain_timeout: Duration::from_secs(1),
                ..WorkerPoolConfig::default()
            })
            .with_lock(lock)
            .with_emitter(Arc::new(broadcaster.clone()))
            .with_monitor(monitor.clone())
            .with_execution_store(store.clone()),
        );
        pool.start();

        let scheduler = Arc::new(Scheduler::new(Arc::new(Registry::new()), pool.clone()));
        scheduler
            .register(Arc::new(EchoJob::new()))
            .expect("Failed to register echo job");
        scheduler
            .register(Arc::new(ExecutionHistoryCleanupJob::new(
                store.clone(),
                30,
                "0 30 3 * * *",
            )))
            .expect("Failed to register cleanup job");

        let verifier = Arc::new(TokenVerifier::new(TEST_JWT_SECRET));
        let state = ServerState {
            config: ServerConfig {
                requests_logging_level: RequestsLoggingLevel::None,
                port: 0,
                ws_ping_interval: Duration::from_secs(30),
            },
            start_time: Instant::now(),
            hub: hub.clone(),
            broadcaster: broadcaster.clone(),
            job_service: JobService::new(scheduler, monitor, store),
            token_verifier: verifier.clone(),
            worker_pool: pool,
        };

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let server_shutdown = shutdown.clone();
        tokio::spawn(async move {
            serve(listener, state, server_shutdown)
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            broadcaster,
            hub,
            verifier,
            shutdown,
            _temp_dir: temp_dir,
        };

        server.wait_for_ready().await;

        server
    }

    /// A valid bearer token for `user_id`.
    pub fn token_for(&self, user_id: u64) -> String {
        self.verifier
            .issue(user_id, Duration::from_secs(3600))
            .expect("Failed to issue token")
    }

    /// WebSocket URL for `token`.
    pub fn ws_url(&self, token: &str) -> String {
        format!(
            "{}/v1/ws?token={}",
            self.base_url.replace("http://", "ws://"),
            token
        )
    }

    /// Waits for the server to become ready by polling the /health endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/health", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
