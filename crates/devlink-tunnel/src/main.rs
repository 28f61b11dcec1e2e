use devlink_core::{RegistrySource, StaticRegistry};
use devlink_registry::{start, RegistryConfig};
use devlink_tunnel::{TunnelConfig, TunnelServer};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("devlink_tunnel=info,devlink_registry=info,info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = TunnelConfig::from_env();
    let statics = StaticRegistry::from_env();

    // A static instance list stands in for the shared registry entirely.
    let (source, role): (Arc<dyn RegistrySource>, _) = if statics.is_empty() {
        let role = start(&RegistryConfig::from_env()).await?;
        info!(authoritative = role.is_authoritative(), "Resolving names through the registry service");
        (role.source(), Some(role))
    } else {
        info!(instances = statics.len(), "Resolving names from DEVLINK_STATIC_INSTANCES");
        (Arc::new(statics), None)
    };

    let server = TunnelServer::start(&config, source).await?;
    info!(
        connect = %server.connect_addr(),
        inspector = %server.inspector_addr(),
        "Devlink tunnels running"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    server.stop().await;
    if let Some(role) = role {
        role.stop().await;
    }

    Ok(())
}
