use crate::shared::error::TunnelResult;
use async_trait::async_trait;
use devlink_core::{CoreError, InstanceRecord, RegistrySource};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Where the debug endpoints of running instances live.
#[async_trait]
pub trait InspectorTargetRepository: Send + Sync {
    /// Current debug endpoint URL for `name`, if it is running with one.
    async fn inspector_url(&self, name: &str) -> Option<String>;

    /// Every running instance that exposes a debug endpoint, sorted by name.
    async fn debuggable(&self) -> Vec<InstanceRecord>;

    async fn connect(&self, url: &str) -> TunnelResult<UpstreamSocket>;
}

pub struct RegistryInspectorTargets {
    source: Arc<dyn RegistrySource>,
}

impl RegistryInspectorTargets {
    pub fn new(source: Arc<dyn RegistrySource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl InspectorTargetRepository for RegistryInspectorTargets {
    async fn inspector_url(&self, name: &str) -> Option<String> {
        self.source
            .lookup(name)
            .await
            .and_then(|record| record.inspector)
            .map(|inspector| inspector.websocket_url())
    }

    async fn debuggable(&self) -> Vec<InstanceRecord> {
        self.source
            .snapshot()
            .await
            .into_records()
            .into_values()
            .filter(|record| record.inspector.is_some())
            .collect()
    }

    async fn connect(&self, url: &str) -> TunnelResult<UpstreamSocket> {
        let (socket, _response) = connect_async(url)
            .await
            .map_err(|e| CoreError::UpstreamReset(format!("{url}: {e}")))?;
        Ok(socket)
    }
}
