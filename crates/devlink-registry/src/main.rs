use devlink_registry::{start, RegistryConfig, RegistryRole};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("devlink_registry=info,info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = RegistryConfig::from_env();
    info!(addr = %config.addr, "Starting devlink registry");

    let role = start(&config).await?;
    match &role {
        RegistryRole::Authoritative(server) => {
            info!(addr = %server.local_addr(), "Serving as the authoritative registry")
        }
        RegistryRole::Client(client) => {
            info!(registry = %client.base_url(), "Registry already running; nothing to serve")
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    role.stop().await;

    Ok(())
}
