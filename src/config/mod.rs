mod file_config;

pub use file_config::{
    FileConfig, JobsFileConfig, LockFileConfig, WebSocketFileConfig, WorkerPoolFileConfig,
};

use crate::background_jobs::jobs::execution_history_cleanup;
use crate::background_jobs::{
    WorkerPoolConfig, DEFAULT_DRAIN_TIMEOUT, DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS,
    MIN_JOB_TIMEOUT,
};
use crate::server::config::DEFAULT_WS_PING_INTERVAL;
use crate::server::websocket::{
    HubConfig, DEFAULT_BROADCAST_CAPACITY, DEFAULT_CLIENT_QUEUE_CAPACITY,
};
use crate::server::{RequestsLoggingLevel, ServerConfig};
use anyhow::{anyhow, bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_LOCK_LEASE_TTL: Duration = Duration::from_secs(15 * 60);

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub db_path: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub jwt_secret: Option<String>,
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("lifehub.db"),
            port: 3001,
            metrics_port: 9091,
            logging_level: RequestsLoggingLevel::Path,
            jwt_secret: None,
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_path: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub jwt_secret: String,

    // Feature configs (with defaults)
    pub worker_pool: WorkerPoolSettings,
    pub websocket: WebSocketSettings,
    pub lock: LockSettings,
    pub jobs: JobsSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerPoolSettings {
    pub workers: usize,
    pub queue_capacity: usize,
    pub min_timeout: Duration,
    pub drain_timeout: Duration,
}

impl Default for WorkerPoolSettings {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            min_timeout: MIN_JOB_TIMEOUT,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

impl From<&WorkerPoolSettings> for WorkerPoolConfig {
    fn from(settings: &WorkerPoolSettings) -> Self {
        WorkerPoolConfig {
            workers: settings.workers,
            queue_capacity: settings.queue_capacity,
            min_timeout: settings.min_timeout,
            drain_timeout: settings.drain_timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebSocketSettings {
    pub broadcast_capacity: usize,
    pub client_queue_capacity: usize,
    pub ping_interval: Duration,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
            client_queue_capacity: DEFAULT_CLIENT_QUEUE_CAPACITY,
            ping_interval: DEFAULT_WS_PING_INTERVAL,
        }
    }
}

impl From<&WebSocketSettings> for HubConfig {
    fn from(settings: &WebSocketSettings) -> Self {
        HubConfig {
            broadcast_capacity: settings.broadcast_capacity,
            client_queue_capacity: settings.client_queue_capacity,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LockSettings {
    /// Lease rows in the server's SQLite database.
    Sqlite { lease_ttl: Duration },
    /// Native advisory locks of a shared PostgreSQL server.
    Postgres { url: String },
}

impl Default for LockSettings {
    fn default() -> Self {
        LockSettings::Sqlite {
            lease_ttl: DEFAULT_LOCK_LEASE_TTL,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobsSettings {
    pub history_retention_days: u32,
    pub history_cleanup_schedule: String,
}

impl Default for JobsSettings {
    fn default() -> Self {
        Self {
            history_retention_days: execution_history_cleanup::DEFAULT_RETENTION_DAYS,
            history_cleanup_schedule: execution_history_cleanup::DEFAULT_SCHEDULE.to_string(),
        }
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_path = file
            .db_path
            .map(PathBuf::from)
            .unwrap_or_else(|| cli.db_path.clone());
        if db_path.is_dir() {
            bail!("db_path points to a directory: {:?}", db_path);
        }

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);
        if port == metrics_port && port != 0 {
            bail!("port and metrics_port must differ (both are {})", port);
        }

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let jwt_secret = file
            .jwt_secret
            .or_else(|| cli.jwt_secret.clone())
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                anyhow!("jwt_secret must be specified via --jwt-secret or in config file")
            })?;

        let wp_file = file.worker_pool.unwrap_or_default();
        let worker_pool = WorkerPoolSettings {
            workers: wp_file.workers.unwrap_or(cli.workers),
            queue_capacity: wp_file.queue_capacity.unwrap_or(cli.queue_capacity),
            min_timeout: wp_file
                .min_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(MIN_JOB_TIMEOUT),
            drain_timeout: wp_file
                .drain_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_DRAIN_TIMEOUT),
        };
        if worker_pool.workers == 0 {
            bail!("worker_pool.workers must be at least 1");
        }
        if worker_pool.queue_capacity == 0 {
            bail!("worker_pool.queue_capacity must be at least 1");
        }
        if worker_pool.min_timeout < MIN_JOB_TIMEOUT {
            bail!(
                "worker_pool.min_timeout_secs must be at least {}",
                MIN_JOB_TIMEOUT.as_secs()
            );
        }

        let ws_file = file.websocket.unwrap_or_default();
        let websocket = WebSocketSettings {
            broadcast_capacity: ws_file
                .broadcast_capacity
                .unwrap_or(DEFAULT_BROADCAST_CAPACITY),
            client_queue_capacity: ws_file
                .client_queue_capacity
                .unwrap_or(DEFAULT_CLIENT_QUEUE_CAPACITY),
            ping_interval: ws_file
                .ping_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_WS_PING_INTERVAL),
        };
        if websocket.ping_interval.is_zero() {
            bail!("websocket.ping_interval_secs must be at least 1");
        }

        let lock = resolve_lock(file.lock.unwrap_or_default())?;

        let jobs_file = file.jobs.unwrap_or_default();
        let jobs = JobsSettings {
            history_retention_days: jobs_file
                .history_retention_days
                .unwrap_or(execution_history_cleanup::DEFAULT_RETENTION_DAYS),
            history_cleanup_schedule: jobs_file
                .history_cleanup_schedule
                .unwrap_or_else(|| execution_history_cleanup::DEFAULT_SCHEDULE.to_string()),
        };

        Ok(Self {
            db_path,
            port,
            metrics_port,
            logging_level,
            jwt_secret,
            worker_pool,
            websocket,
            lock,
            jobs,
        })
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            requests_logging_level: self.logging_level.clone(),
            port: self.port,
            ws_ping_interval: self.websocket.ping_interval,
        }
    }
}

fn resolve_lock(file: LockFileConfig) -> Result<LockSettings> {
    let backend = file.backend.unwrap_or_else(|| "sqlite".to_string());
    match backend.to_ascii_lowercase().as_str() {
        "sqlite" => {
            let lease_ttl = file
                .lease_ttl_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_LOCK_LEASE_TTL);
            if lease_ttl.is_zero() {
                bail!("lock.lease_ttl_secs must be at least 1");
            }
            Ok(LockSettings::Sqlite { lease_ttl })
        }
        "postgres" => {
            let url = file
                .postgres_url
                .ok_or_else(|| anyhow!("lock.postgres_url is required for the postgres backend"))?;
            Ok(LockSettings::Postgres { url })
        }
        other => bail!("Unknown lock backend: {} (expected sqlite or postgres)", other),
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli_with_secret() -> CliConfig {
        CliConfig {
            jwt_secret: Some("cli-secret".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_logging_level() {
        assert!(matches!(
            parse_logging_level("none"),
            Some(RequestsLoggingLevel::None)
        ));
        assert!(matches!(
            parse_logging_level("headers"),
            Some(RequestsLoggingLevel::Headers)
        ));
        // Case insensitive
        assert!(matches!(
            parse_logging_level("PATH"),
            Some(RequestsLoggingLevel::Path)
        ));
        assert!(parse_logging_level("invalid").is_none());
    }

    #[test]
    fn test_resolve_cli_only() {
        let cli = CliConfig {
            db_path: PathBuf::from("/tmp/lifehub-test.db"),
            port: 4000,
            metrics_port: 9100,
            logging_level: RequestsLoggingLevel::Headers,
            jwt_secret: Some("cli-secret".to_string()),
            workers: 3,
            queue_capacity: 10,
        };

        let config = AppConfig::resolve(&cli, None).unwrap();

        assert_eq!(config.db_path, PathBuf::from("/tmp/lifehub-test.db"));
        assert_eq!(config.port, 4000);
        assert_eq!(config.metrics_port, 9100);
        assert_eq!(config.logging_level, RequestsLoggingLevel::Headers);
        assert_eq!(config.jwt_secret, "cli-secret");
        assert_eq!(config.worker_pool.workers, 3);
        assert_eq!(config.worker_pool.queue_capacity, 10);
        assert_eq!(config.worker_pool.min_timeout, MIN_JOB_TIMEOUT);
        assert_eq!(config.websocket, WebSocketSettings::default());
        assert_eq!(config.lock, LockSettings::default());
        assert_eq!(config.jobs, JobsSettings::default());
    }

    #[test]
    fn test_resolve_toml_overrides_cli() {
        let cli = cli_with_secret();
        let file_config = FileConfig {
            port: Some(5000),
            logging_level: Some("none".to_string()),
            jwt_secret: Some("file-secret".to_string()),
            worker_pool: Some(WorkerPoolFileConfig {
                workers: Some(12),
                drain_timeout_secs: Some(5),
                ..Default::default()
            }),
            websocket: Some(WebSocketFileConfig {
                ping_interval_secs: Some(15),
                ..Default::default()
            }),
            jobs: Some(JobsFileConfig {
                history_retention_days: Some(7),
                ..Default::default()
            }),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli, Some(file_config)).unwrap();

        // TOML values should override CLI
        assert_eq!(config.port, 5000);
        assert_eq!(config.logging_level, RequestsLoggingLevel::None);
        assert_eq!(config.jwt_secret, "file-secret");
        assert_eq!(config.worker_pool.workers, 12);
        assert_eq!(config.worker_pool.drain_timeout, Duration::from_secs(5));
        assert_eq!(config.websocket.ping_interval, Duration::from_secs(15));
        assert_eq!(config.jobs.history_retention_days, 7);
        // CLI value used when TOML doesn't specify
        assert_eq!(config.metrics_port, 9091);
        assert_eq!(config.worker_pool.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(
            config.jobs.history_cleanup_schedule,
            execution_history_cleanup::DEFAULT_SCHEDULE
        );
    }

    #[test]
    fn test_resolve_missing_jwt_secret_error() {
        let result = AppConfig::resolve(&CliConfig::default(), None);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("jwt_secret"));

        let blank = CliConfig {
            jwt_secret: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(AppConfig::resolve(&blank, None).is_err());
    }

    #[test]
    fn test_resolve_postgres_lock() {
        let file_config = FileConfig {
            lock: Some(LockFileConfig {
                backend: Some("postgres".to_string()),
                postgres_url: Some("postgres://localhost/lifehub".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli_with_secret(), Some(file_config)).unwrap();
        assert_eq!(
            config.lock,
            LockSettings::Postgres {
                url: "postgres://localhost/lifehub".to_string()
            }
        );
    }

    #[test]
    fn test_resolve_postgres_lock_requires_url() {
        let file_config = FileConfig {
            lock: Some(LockFileConfig {
                backend: Some("postgres".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let err = AppConfig::resolve(&cli_with_secret(), Some(file_config)).unwrap_err();
        assert!(err.to_string().contains("postgres_url"));
    }

    #[test]
    fn test_resolve_unknown_lock_backend() {
        let file_config = FileConfig {
            lock: Some(LockFileConfig {
                backend: Some("redis".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        assert!(AppConfig::resolve(&cli_with_secret(), Some(file_config)).is_err());
    }

    #[test]
    fn test_resolve_rejects_zero_workers() {
        let cli = CliConfig {
            workers: 0,
            ..cli_with_secret()
        };
        assert!(AppConfig::resolve(&cli, None).is_err());
    }

    #[test]
    fn test_resolve_rejects_min_timeout_below_floor() {
        let file_config = FileConfig {
            worker_pool: Some(WorkerPoolFileConfig {
                min_timeout_secs: Some(1),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = AppConfig::resolve(&cli_with_secret(), Some(file_config)).unwrap_err();
        assert!(err.to_string().contains("min_timeout_secs"));

        let file_config = FileConfig {
            worker_pool: Some(WorkerPoolFileConfig {
                min_timeout_secs: Some(60),
                ..Default::default()
            }),
            ..Default::default()
        };
        let config = AppConfig::resolve(&cli_with_secret(), Some(file_config)).unwrap();
        assert_eq!(config.worker_pool.min_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_settings_convert_to_runtime_configs() {
        let settings = WorkerPoolSettings {
            workers: 2,
            queue_capacity: 7,
            min_timeout: Duration::from_secs(45),
            drain_timeout: Duration::from_secs(3),
        };
        let pool = WorkerPoolConfig::from(&settings);
        assert_eq!(pool.workers, 2);
        assert_eq!(pool.queue_capacity, 7);
        assert_eq!(pool.min_timeout, Duration::from_secs(45));

        let hub = HubConfig::from(&WebSocketSettings::default());
        assert_eq!(hub.broadcast_capacity, DEFAULT_BROADCAST_CAPACITY);
    }
}
