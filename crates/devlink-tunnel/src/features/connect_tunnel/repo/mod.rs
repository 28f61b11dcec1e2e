use async_trait::async_trait;
use devlink_core::{CoreError, InstanceAddress, InstanceMode, RegistrySource};
use std::sync::Arc;
use tokio::net::TcpStream;

use crate::shared::error::TunnelResult;

/// Resolves a tunnel target name and opens the outbound leg.
#[async_trait]
pub trait ConnectTargetRepository: Send + Sync {
    async fn resolve(&self, name: &str) -> TunnelResult<InstanceAddress>;
    async fn dial(&self, address: &InstanceAddress) -> TunnelResult<TcpStream>;
}

/// Looks names up in the registry and dials them over loopback TCP.
pub struct RegistryConnectTargets {
    source: Arc<dyn RegistrySource>,
}

impl RegistryConnectTargets {
    pub fn new(source: Arc<dyn RegistrySource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl ConnectTargetRepository for RegistryConnectTargets {
    async fn resolve(&self, name: &str) -> TunnelResult<InstanceAddress> {
        let record = self
            .source
            .lookup(name)
            .await
            .ok_or_else(|| CoreError::UnregisteredBinding(name.to_string()))?;

        // A remote preview session needs its extra headers on every request,
        // which a raw byte relay cannot add.
        if record.mode == InstanceMode::Remote {
            return Err(CoreError::InvalidRecord(format!(
                "\"{name}\" is a remote session and cannot be tunneled"
            ))
            .into());
        }
        Ok(record.address)
    }

    async fn dial(&self, address: &InstanceAddress) -> TunnelResult<TcpStream> {
        let stream = TcpStream::connect(address.authority())
            .await
            .map_err(|e| CoreError::UpstreamReset(format!("{}: {e}", address.authority())))?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::error::TunnelError;
    use devlink_core::{InstanceRecord, RegistryStore};

    fn targets(store: &RegistryStore) -> RegistryConnectTargets {
        RegistryConnectTargets::new(Arc::new(store.clone()))
    }

    #[tokio::test]
    async fn test_resolve_registered_local_instance() {
        let store = RegistryStore::new();
        store.upsert(
            "worker-123",
            InstanceRecord::local("worker-123", InstanceAddress::http("127.0.0.1", 8787)),
        );

        let address = targets(&store).resolve("worker-123").await.unwrap();
        assert_eq!(address.authority(), "127.0.0.1:8787");
    }

    #[tokio::test]
    async fn test_resolve_missing_or_remote_fails() {
        let store = RegistryStore::new();
        store.upsert(
            "preview",
            InstanceRecord::new(
                "preview",
                InstanceAddress::http("preview.example", 443),
                InstanceMode::Remote,
            ),
        );

        let missing = targets(&store).resolve("worker-123").await.unwrap_err();
        assert!(matches!(
            missing,
            TunnelError::Core(CoreError::UnregisteredBinding(_))
        ));

        let remote = targets(&store).resolve("preview").await.unwrap_err();
        assert!(matches!(remote, TunnelError::Core(CoreError::InvalidRecord(_))));
    }

    #[tokio::test]
    async fn test_dial_closed_port_is_upstream_reset() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let error = targets(&RegistryStore::new())
            .dial(&InstanceAddress::http("127.0.0.1", port))
            .await
            .unwrap_err();
        assert!(error.is_disconnect());
    }
}
