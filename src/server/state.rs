use axum::extract::FromRef;
use std::sync::Arc;
use std::time::Instant;

use super::auth::TokenVerifier;
use super::websocket::{Broadcaster, Hub};
use super::ServerConfig;
use crate::background_jobs::{JobService, WorkerPool};

pub type GuardedHub = Arc<Hub>;
pub type GuardedTokenVerifier = Arc<TokenVerifier>;
pub type GuardedWorkerPool = Arc<WorkerPool>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub hub: GuardedHub,
    pub broadcaster: Broadcaster,
    pub job_service: JobService,
    pub token_verifier: GuardedTokenVerifier,
    pub worker_pool: GuardedWorkerPool,
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}

impl FromRef<ServerState> for GuardedHub {
    fn from_ref(input: &ServerState) -> Self {
        input.hub.clone()
    }
}

impl FromRef<ServerState> for Broadcaster {
    fn from_ref(input: &ServerState) -> Self {
        input.broadcaster.clone()
    }
}

impl FromRef<ServerState> for JobService {
    fn from_ref(input: &ServerState) -> Self {
        input.job_service.clone()
    }
}

impl FromRef<ServerState> for GuardedTokenVerifier {
    fn from_ref(input: &ServerState) -> Self {
        input.token_verifier.clone()
    }
}

impl FromRef<ServerState> for GuardedWorkerPool {
    fn from_ref(input: &ServerState) -> Self {
        input.worker_pool.clone()
    }
}
