use crate::features::connect_tunnel::controller::ConnectTunnelController;
use crate::features::connect_tunnel::repo::RegistryConnectTargets;
use crate::features::connect_tunnel::service::ConnectTunnelService;
use crate::features::inspector_tunnel::controller::{router, InspectorController};
use crate::features::inspector_tunnel::repo::RegistryInspectorTargets;
use crate::features::inspector_tunnel::service::SessionOptions;
use crate::shared::config::TunnelConfig;
use crate::shared::error::TunnelResult;
use devlink_core::RegistrySource;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Both tunnels, resolving names through one registry source.
pub struct TunnelServer {
    connect_addr: SocketAddr,
    inspector_addr: SocketAddr,
    accept: JoinHandle<()>,
    shutdown: Option<oneshot::Sender<()>>,
    inspector: JoinHandle<()>,
}

impl TunnelServer {
    pub async fn start(config: &TunnelConfig, source: Arc<dyn RegistrySource>) -> TunnelResult<Self> {
        let connect_listener = TcpListener::bind(config.connect_addr).await?;
        let connect_addr = connect_listener.local_addr()?;
        let inspector_listener = TcpListener::bind(config.inspector_addr).await?;
        let inspector_addr = inspector_listener.local_addr()?;

        let connect_service = ConnectTunnelService::new(
            Arc::new(RegistryConnectTargets::new(source.clone())),
            config.connect_prefix.clone(),
            config.idle_timeout,
        );
        let accept = Arc::new(ConnectTunnelController::new(Arc::new(connect_service)))
            .spawn_accept_loop(connect_listener);
        info!(addr = %connect_addr, prefix = %config.connect_prefix, "Connect tunnel listening");

        let options = SessionOptions {
            poll_interval: config.registry_poll_interval,
            keepalive_interval: config.keepalive_interval,
        };
        let controller = Arc::new(InspectorController::new(
            Arc::new(RegistryInspectorTargets::new(source)),
            options,
            inspector_addr,
        ));
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = router(controller);
        let inspector = tokio::spawn(async move {
            let result = axum::serve(inspector_listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(error) = result {
                error!(error = %error, "Inspector tunnel stopped with an error");
            }
        });
        info!(addr = %inspector_addr, "Inspector tunnel listening");

        Ok(Self {
            connect_addr,
            inspector_addr,
            accept,
            shutdown: Some(shutdown_tx),
            inspector,
        })
    }

    pub fn connect_addr(&self) -> SocketAddr {
        self.connect_addr
    }

    pub fn inspector_addr(&self) -> SocketAddr {
        self.inspector_addr
    }

    /// Stops accepting. Tunnel connections already piping run until either
    /// side closes them.
    pub async fn stop(mut self) {
        self.accept.abort();
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut self.inspector)
            .await
            .is_err()
        {
            warn!(addr = %self.inspector_addr, "Inspector tunnel did not drain in time; aborting");
            self.inspector.abort();
        }
        info!("Tunnels stopped");
    }
}

impl Drop for TunnelServer {
    fn drop(&mut self) {
        self.accept.abort();
    }
}
