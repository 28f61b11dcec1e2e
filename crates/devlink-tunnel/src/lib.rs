pub mod features;
pub mod server;
pub mod shared;

pub use features::connect_tunnel::service::{ConnectTunnelService, TunnelStats};
pub use features::inspector_tunnel::service::{InspectorSession, SessionOptions};
pub use server::TunnelServer;
pub use shared::config::TunnelConfig;
pub use shared::error::{TunnelError, TunnelResult};
