use std::time::Duration;

use super::RequestsLoggingLevel;

pub const DEFAULT_WS_PING_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub requests_logging_level: RequestsLoggingLevel,
    pub port: u16,
    /// How often idle WebSocket connections are pinged.
    pub ws_ping_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            requests_logging_level: RequestsLoggingLevel::Path,
            port: 3001,
            ws_ping_interval: DEFAULT_WS_PING_INTERVAL,
        }
    }
}
