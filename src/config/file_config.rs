use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_path: Option<String>,
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,
    pub jwt_secret: Option<String>,

    // Feature configs
    pub worker_pool: Option<WorkerPoolFileConfig>,
    pub websocket: Option<WebSocketFileConfig>,
    pub lock: Option<LockFileConfig>,
    pub jobs: Option<JobsFileConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct WorkerPoolFileConfig {
    pub workers: Option<usize>,
    pub queue_capacity: Option<usize>,
    pub min_timeout_secs: Option<u64>,
    pub drain_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct WebSocketFileConfig {
    pub broadcast_capacity: Option<usize>,
    pub client_queue_capacity: Option<usize>,
    pub ping_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct LockFileConfig {
    /// "sqlite" or "postgres"
    pub backend: Option<String>,
    pub lease_ttl_secs: Option<u64>,
    pub postgres_url: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct JobsFileConfig {
    pub history_retention_days: Option<u32>,
    pub history_cleanup_schedule: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
