//! HTTP client for a Registry Service owned by another process.

use crate::shared::error::{RegistryError, RegistryResult};
use async_trait::async_trait;
use devlink_core::{InstanceRecord, RegistrySnapshot, RegistrySource};
use devlink_proto::HealthResponse;
use reqwest::{StatusCode, Url};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct RegistryClient {
    base: Url,
    http: reqwest::Client,
}

impl RegistryClient {
    pub fn new(addr: SocketAddr) -> RegistryResult<Self> {
        let base = Url::parse(&format!("http://{addr}/"))
            .map_err(|error| RegistryError::InvalidRequest(error.to_string()))?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { base, http })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn url(&self, segments: &[&str]) -> RegistryResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| RegistryError::InvalidRequest(format!("{} cannot be a base", self.base)))?
            .clear()
            .extend(segments);
        Ok(url)
    }

    /// Fails unless the peer identifies itself as a compatible registry.
    pub async fn health(&self) -> RegistryResult<HealthResponse> {
        let response = self.http.get(self.url(&["health"])?).send().await?;
        if !response.status().is_success() {
            return Err(RegistryError::RegistryUnavailable(format!(
                "health probe returned {}",
                response.status()
            )));
        }
        let health: HealthResponse = response.json().await.map_err(|error| {
            RegistryError::RegistryUnavailable(format!("health probe body was not recognised: {error}"))
        })?;
        if !health.is_compatible() {
            return Err(RegistryError::RegistryUnavailable(format!(
                "port is held by {:?}, not a devlink registry",
                health.service
            )));
        }
        Ok(health)
    }

    pub async fn register(&self, name: &str, record: &InstanceRecord) -> RegistryResult<()> {
        let response = self
            .http
            .post(self.url(&["workers", name])?)
            .json(record)
            .send()
            .await?;
        Self::expect_success(response).await
    }

    pub async fn unregister(&self, name: &str) -> RegistryResult<()> {
        let response = self.http.delete(self.url(&["workers", name])?).send().await?;
        Self::expect_success(response).await
    }

    /// `None` when the registry has no entry for `name`.
    pub async fn get(&self, name: &str) -> RegistryResult<Option<InstanceRecord>> {
        let response = self.http.get(self.url(&["workers", name])?).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response.error_for_status()?;
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    pub async fn list(&self) -> RegistryResult<RegistrySnapshot> {
        let response = self
            .http
            .get(self.url(&["workers"])?)
            .send()
            .await?
            .error_for_status()?;
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(RegistrySnapshot::default());
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Clears every registration on the shared service.
    pub async fn init(&self) -> RegistryResult<()> {
        let response = self
            .http
            .post(self.url(&["workers", "init"])?)
            .send()
            .await?;
        Self::expect_success(response).await
    }

    async fn expect_success(response: reqwest::Response) -> RegistryResult<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::BAD_REQUEST => Err(RegistryError::InvalidRequest(body)),
            _ => Err(RegistryError::RegistryUnavailable(format!(
                "registry answered {status}: {body}"
            ))),
        }
    }

    /// Registers `record` now and then again every `every`, so the
    /// authoritative service keeps treating the instance as alive.
    pub fn spawn_heartbeat(&self, record: InstanceRecord, every: Duration) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                match client.register(&record.name, &record).await {
                    Ok(()) => debug!(name = %record.name, "Heartbeat sent"),
                    Err(error) => {
                        warn!(name = %record.name, error = %error, "Failed to send heartbeat")
                    }
                }
            }
        })
    }
}

#[async_trait]
impl RegistrySource for RegistryClient {
    async fn snapshot(&self) -> RegistrySnapshot {
        self.list().await.unwrap_or_else(|error| {
            warn!(error = %error, "Registry unreachable; treating every instance as absent");
            RegistrySnapshot::default()
        })
    }

    async fn lookup(&self, name: &str) -> Option<InstanceRecord> {
        match self.get(name).await {
            Ok(record) => record,
            Err(error) => {
                warn!(name = %name, error = %error, "Registry unreachable; treating instance as absent");
                None
            }
        }
    }
}
