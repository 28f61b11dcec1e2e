use crate::features::connect_tunnel::service::ConnectTunnelService;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct ConnectTunnelController {
    service: Arc<ConnectTunnelService>,
}

impl ConnectTunnelController {
    pub fn new(service: Arc<ConnectTunnelService>) -> Self {
        Self { service }
    }

    /// Accepts connections until the task is aborted, relaying each on its
    /// own task.
    pub fn spawn_accept_loop(self: Arc<Self>, listener: TcpListener) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let (inbound, peer) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(error) => {
                        warn!(error = %error, "Failed to accept tunnel connection");
                        continue;
                    }
                };
                if let Err(error) = inbound.set_nodelay(true) {
                    debug!(%peer, error = %error, "Could not disable Nagle on tunnel connection");
                }

                let service = self.service.clone();
                tokio::spawn(async move {
                    match service.relay(inbound).await {
                        Ok(stats) => info!(
                            %peer,
                            name = %stats.name,
                            bytes_up = stats.bytes_up,
                            bytes_down = stats.bytes_down,
                            idle_closed = stats.idle_closed,
                            "Tunnel connection closed"
                        ),
                        Err(error) if error.is_disconnect() => {
                            debug!(%peer, error = %error, "Tunnel connection reset")
                        }
                        Err(error) => warn!(
                            %peer,
                            code = error.error_code(),
                            error = %error,
                            "Tunnel connection dropped"
                        ),
                    }
                });
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::connect_tunnel::repo::RegistryConnectTargets;
    use devlink_core::{InstanceAddress, InstanceRecord, RegistryStore};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn spawn_tunnel(store: &RegistryStore) -> std::net::SocketAddr {
        let service = ConnectTunnelService::new(
            Arc::new(RegistryConnectTargets::new(Arc::new(store.clone()))),
            "proxyname",
            Duration::from_secs(5),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        Arc::new(ConnectTunnelController::new(Arc::new(service))).spawn_accept_loop(listener);
        addr
    }

    #[tokio::test]
    async fn test_connect_line_is_stripped_and_payload_forwarded_unchanged() {
        let instance = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = instance.local_addr().unwrap().port();
        let store = RegistryStore::new();
        store.upsert(
            "worker-123",
            InstanceRecord::local("worker-123", InstanceAddress::http("127.0.0.1", port)),
        );
        let tunnel = spawn_tunnel(&store).await;

        let head = b"CONNECT proxyname-worker-123 HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let payload: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        let mut client = TcpStream::connect(tunnel).await.unwrap();
        client.write_all(head).await.unwrap();
        client.write_all(&payload).await.unwrap();

        let (mut upstream, _) = instance.accept().await.unwrap();
        let expected_head = b"CONNECT proxyname HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let mut received = vec![0u8; expected_head.len() + payload.len()];
        upstream.read_exact(&mut received).await.unwrap();
        assert_eq!(&received[..expected_head.len()], expected_head);
        assert_eq!(&received[expected_head.len()..], payload.as_slice());
        assert_eq!(received.len(), head.len() + payload.len() - "-worker-123".len());

        upstream.write_all(b"HTTP/1.1 200 OK\r\n\r\n").await.unwrap();
        let mut reply = [0u8; 19];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"HTTP/1.1 200 OK\r\n\r\n");

        drop(upstream);
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_worker_header_is_removed() {
        let instance = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = instance.local_addr().unwrap().port();
        let store = RegistryStore::new();
        store.upsert(
            "billing",
            InstanceRecord::local("billing", InstanceAddress::http("127.0.0.1", port)),
        );
        let tunnel = spawn_tunnel(&store).await;

        let mut client = TcpStream::connect(tunnel).await.unwrap();
        client
            .write_all(b"GET /invoices HTTP/1.1\r\nX-Worker: billing\r\nHost: x\r\n\r\n")
            .await
            .unwrap();

        let (mut upstream, _) = instance.accept().await.unwrap();
        let expected = b"GET /invoices HTTP/1.1\r\nHost: x\r\n\r\n";
        let mut received = vec![0u8; expected.len()];
        upstream.read_exact(&mut received).await.unwrap();
        assert_eq!(received, expected.to_vec());
    }

    #[tokio::test]
    async fn test_half_closed_client_still_receives_reply() {
        let instance = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = instance.local_addr().unwrap().port();
        let store = RegistryStore::new();
        store.upsert(
            "billing",
            InstanceRecord::local("billing", InstanceAddress::http("127.0.0.1", port)),
        );
        let tunnel = spawn_tunnel(&store).await;

        let mut client = TcpStream::connect(tunnel).await.unwrap();
        client
            .write_all(b"GET / HTTP/1.0\r\nX-Worker: billing\r\n\r\n")
            .await
            .unwrap();
        client.shutdown().await.unwrap();

        let (mut upstream, _) = instance.accept().await.unwrap();
        let mut request = Vec::new();
        upstream.read_to_end(&mut request).await.unwrap();
        assert_eq!(request, b"GET / HTTP/1.0\r\n\r\n".to_vec());
        upstream
            .write_all(b"HTTP/1.0 200 OK\r\n\r\nbilled")
            .await
            .unwrap();
        drop(upstream);

        let mut response = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut response))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response, b"HTTP/1.0 200 OK\r\n\r\nbilled".to_vec());
    }

    #[tokio::test]
    async fn test_unknown_target_closes_inbound() {
        let tunnel = spawn_tunnel(&RegistryStore::new()).await;

        let mut client = TcpStream::connect(tunnel).await.unwrap();
        client
            .write_all(b"CONNECT proxyname-ghost HTTP/1.1\r\n\r\n")
            .await
            .unwrap();

        let mut rest = Vec::new();
        // A reset is as good as a clean close here; only a hang fails.
        let _ = tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut rest))
            .await
            .unwrap();
        assert!(rest.is_empty());
    }
}
