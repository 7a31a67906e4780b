//! HTTP client wrapper for the job endpoints

use super::constants::TEST_USER_ID;
use super::server::TestServer;
use reqwest::{Client, Response};

pub struct TestClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl TestClient {
    /// Client carrying a valid token for [`TEST_USER_ID`].
    pub fn authenticated(server: &TestServer) -> Self {
        Self::with_token(server, Some(server.token_for(TEST_USER_ID)))
    }

    /// Client that sends no Authorization header.
    pub fn anonymous(server: &TestServer) -> Self {
        Self::with_token(server, None)
    }

    pub fn with_token(server: &TestServer, token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: server.base_url.clone(),
            token,
        }
    }

    async fn get(&self, path: &str) -> Response {
        let mut request = self.client.get(format!("{}{}", self.base_url, path));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        request.send().await.expect("GET request failed")
    }

    async fn post(&self, path: &str) -> Response {
        let mut request = self.client.post(format!("{}{}", self.base_url, path));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        request.send().await.expect("POST request failed")
    }

    pub async fn health(&self) -> Response {
        self.get("/health").await
    }

    pub async fn list_jobs(&self) -> Response {
        self.get("/v1/jobs").await
    }

    pub async fn job_metrics(&self) -> Response {
        self.get("/v1/jobs/metrics").await
    }

    pub async fn get_job(&self, name: &str) -> Response {
        self.get(&format!("/v1/jobs/{}", name)).await
    }

    pub async fn job_history(&self, name: &str, limit: Option<usize>) -> Response {
        match limit {
            Some(limit) => {
                self.get(&format!("/v1/jobs/{}/history?limit={}", name, limit))
                    .await
            }
            None => self.get(&format!("/v1/jobs/{}/history", name)).await,
        }
    }

    pub async fn trigger_job(&self, name: &str) -> Response {
        self.post(&format!("/v1/jobs/{}/trigger", name)).await
    }
}
