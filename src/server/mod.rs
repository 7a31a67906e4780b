pub mod auth;
pub mod config;
mod http_layers;
pub mod job_routes;
pub mod metrics;
#[allow(clippy::module_inception)]
pub mod server;
pub mod state;
pub mod websocket;

pub use auth::{AuthError, AuthUser, TokenVerifier};
pub use config::ServerConfig;
pub use http_layers::*;
pub use server::{make_app, run_metrics_server, run_server, serve};
pub use state::ServerState;
