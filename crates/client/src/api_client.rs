//! HTTP client for the AutoMed simulation service.

use std::time::Duration;

use async_trait::async_trait;
use automed_shared::{
    remote_message, CreateSimulationResponse, EchoResponse, EventLog, ServerInfo,
    SimulationConfig, SimulationId, SimulationList, SimulationStats, SimulationStatus,
    TransportError,
};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::DEFAULT_API_URL;

/// One method per remote operation. No retries happen at this layer; callers
/// own the retry policy. Implementations must not touch shared state.
///
/// Futures are `?Send`: the session drives them on a single-threaded
/// `LocalSet`.
#[async_trait(?Send)]
pub trait SimulationApi {
    /// Liveness probe. Any 2xx counts as healthy.
    async fn health_check(&self) -> Result<(), TransportError>;
    async fn server_info(&self) -> Result<ServerInfo, TransportError>;
    async fn echo(&self, payload: &serde_json::Value) -> Result<EchoResponse, TransportError>;
    async fn list_simulations(&self) -> Result<SimulationList, TransportError>;
    async fn create_simulation(
        &self,
        config: &SimulationConfig,
    ) -> Result<SimulationId, TransportError>;
    async fn start_simulation(&self, id: SimulationId) -> Result<(), TransportError>;
    async fn pause_simulation(&self, id: SimulationId) -> Result<(), TransportError>;
    async fn resume_simulation(&self, id: SimulationId) -> Result<(), TransportError>;
    async fn stop_simulation(&self, id: SimulationId) -> Result<(), TransportError>;
    async fn delete_simulation(&self, id: SimulationId) -> Result<(), TransportError>;
    async fn simulation_status(&self, id: SimulationId)
        -> Result<SimulationStatus, TransportError>;
    async fn simulation_stats(&self, id: SimulationId) -> Result<SimulationStats, TransportError>;
    async fn simulation_events(&self, id: SimulationId) -> Result<EventLog, TransportError>;
}

/// reqwest-backed [`SimulationApi`].
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl ApiClient {
    /// Create a new API client
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: DEFAULT_API_URL.to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Set the base URL for API requests
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Bound every request; an elapsed timeout surfaces as `Unreachable`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if self.base_url.is_empty() {
            if path.starts_with('/') {
                path.to_string()
            } else {
                format!("/{path}")
            }
        } else {
            let base = self.base_url.trim_end_matches('/');
            let path = path.trim_start_matches('/');
            format!("{base}/{path}")
        }
    }

    /// Send a request and return the body of a 2xx response.
    async fn execute(&self, rb: RequestBuilder) -> Result<String, TransportError> {
        let resp = rb.timeout(self.timeout).send().await.map_err(network_error)?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();

        let text = resp
            .text()
            .await
            .map_err(|e| TransportError::Unreachable(format!("failed to read body: {e}")))?;

        if !is_success {
            return Err(TransportError::RemoteRejected {
                status,
                message: remote_message(&text),
            });
        }

        Ok(text)
    }

    /// Make a GET request and decode the JSON body
    pub async fn get_json<TRes: DeserializeOwned>(&self, path: &str) -> Result<TRes, TransportError> {
        let text = self.execute(self.client.get(self.url(path))).await?;
        decode(&text)
    }

    /// Make a POST request with JSON body
    pub async fn post_json<TReq: Serialize + ?Sized, TRes: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TRes, TransportError> {
        let text = self
            .execute(self.client.post(self.url(path)).json(body))
            .await?;
        decode(&text)
    }

    /// POST without a body, for lifecycle commands. The response body is ignored.
    pub async fn post_command(&self, path: &str) -> Result<(), TransportError> {
        self.execute(self.client.post(self.url(path))).await?;
        Ok(())
    }

    /// Make a DELETE request
    pub async fn delete(&self, path: &str) -> Result<(), TransportError> {
        self.execute(self.client.delete(self.url(path))).await?;
        Ok(())
    }
}

impl Default for ApiClient {
    fn default() -> Self {
        Self::new()
    }
}

fn network_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Unreachable(format!("request timed out: {e}"))
    } else {
        TransportError::Unreachable(e.to_string())
    }
}

fn decode<T: DeserializeOwned>(text: &str) -> Result<T, TransportError> {
    let text = if text.trim().is_empty() { "null" } else { text };
    serde_json::from_str(text).map_err(|e| TransportError::DecodeFailed(e.to_string()))
}

fn simulation_path(id: SimulationId, action: &str) -> String {
    format!("/simulation/{id}/{action}")
}

#[async_trait(?Send)]
impl SimulationApi for ApiClient {
    async fn health_check(&self) -> Result<(), TransportError> {
        self.execute(self.client.get(self.url("/health"))).await?;
        Ok(())
    }

    async fn server_info(&self) -> Result<ServerInfo, TransportError> {
        self.get_json("/info").await
    }

    async fn echo(&self, payload: &serde_json::Value) -> Result<EchoResponse, TransportError> {
        self.post_json("/echo", payload).await
    }

    async fn list_simulations(&self) -> Result<SimulationList, TransportError> {
        self.get_json("/simulations").await
    }

    async fn create_simulation(
        &self,
        config: &SimulationConfig,
    ) -> Result<SimulationId, TransportError> {
        let created: CreateSimulationResponse =
            self.post_json("/simulation/create", config).await?;
        Ok(created.simulation_id)
    }

    async fn start_simulation(&self, id: SimulationId) -> Result<(), TransportError> {
        self.post_command(&simulation_path(id, "start")).await
    }

    async fn pause_simulation(&self, id: SimulationId) -> Result<(), TransportError> {
        self.post_command(&simulation_path(id, "pause")).await
    }

    async fn resume_simulation(&self, id: SimulationId) -> Result<(), TransportError> {
        self.post_command(&simulation_path(id, "resume")).await
    }

    async fn stop_simulation(&self, id: SimulationId) -> Result<(), TransportError> {
        self.post_command(&simulation_path(id, "stop")).await
    }

    async fn delete_simulation(&self, id: SimulationId) -> Result<(), TransportError> {
        self.delete(&format!("/simulation/{id}")).await
    }

    async fn simulation_status(
        &self,
        id: SimulationId,
    ) -> Result<SimulationStatus, TransportError> {
        self.get_json(&simulation_path(id, "status")).await
    }

    async fn simulation_stats(&self, id: SimulationId) -> Result<SimulationStats, TransportError> {
        self.get_json(&simulation_path(id, "stats")).await
    }

    async fn simulation_events(&self, id: SimulationId) -> Result<EventLog, TransportError> {
        self.get_json(&simulation_path(id, "events")).await
    }
}
