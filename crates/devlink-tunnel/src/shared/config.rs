use devlink_registry::shared::config::{env_or, env_secs_or};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

pub const DEFAULT_CONNECT_PORT: u16 = 6285;
pub const DEFAULT_INSPECTOR_PORT: u16 = 9229;
pub const DEFAULT_CONNECT_PREFIX: &str = "devlink";
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConfig {
    pub connect_addr: SocketAddr,
    /// Token before the `-<name>` suffix in `CONNECT <prefix>-<name>`.
    pub connect_prefix: String,
    pub inspector_addr: SocketAddr,
    /// A piped connection with no traffic either way for this long is closed.
    pub idle_timeout: Duration,
    /// How often an inspector session re-reads the registry for its instance.
    pub registry_poll_interval: Duration,
    pub keepalive_interval: Duration,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            connect_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_CONNECT_PORT)),
            connect_prefix: DEFAULT_CONNECT_PREFIX.to_string(),
            inspector_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_INSPECTOR_PORT)),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            registry_poll_interval: Duration::from_secs(1),
            keepalive_interval: Duration::from_secs(10),
        }
    }
}

impl TunnelConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            connect_addr: env_or("DEVLINK_TUNNEL_ADDR", defaults.connect_addr),
            connect_prefix: env_or("DEVLINK_CONNECT_PREFIX", defaults.connect_prefix),
            inspector_addr: env_or("DEVLINK_INSPECTOR_ADDR", defaults.inspector_addr),
            idle_timeout: env_secs_or("DEVLINK_IDLE_TIMEOUT_SECS", DEFAULT_IDLE_TIMEOUT_SECS),
            ..defaults
        }
    }

    /// Both tunnels on ephemeral loopback ports.
    pub fn ephemeral() -> Self {
        let any = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
        Self {
            connect_addr: any,
            inspector_addr: any,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TunnelConfig::default();
        assert_eq!(config.connect_addr.port(), DEFAULT_CONNECT_PORT);
        assert_eq!(config.inspector_addr.port(), DEFAULT_INSPECTOR_PORT);
        assert_eq!(config.connect_prefix, "devlink");
        assert_eq!(config.idle_timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_zero_idle_timeout_falls_back_to_default() {
        std::env::set_var("DEVLINK_IDLE_TIMEOUT_SECS", "0");
        let config = TunnelConfig::from_env();
        std::env::remove_var("DEVLINK_IDLE_TIMEOUT_SECS");
        assert_eq!(config.idle_timeout, Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS));
    }

    #[test]
    fn test_ephemeral_config_keeps_timeouts() {
        let config = TunnelConfig::ephemeral();
        assert_eq!(config.connect_addr.port(), 0);
        assert_eq!(config.inspector_addr.port(), 0);
        assert_eq!(config.idle_timeout, TunnelConfig::default().idle_timeout);
    }
}
