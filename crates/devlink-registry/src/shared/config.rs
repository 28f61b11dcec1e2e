use devlink_proto::REGISTRY_DEFAULT_PORT;
use std::net::{Ipv4Addr, SocketAddr};
use std::num::NonZeroU64;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_STALE_AFTER_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    pub addr: SocketAddr,
    /// Persist registrations as one file per instance instead of in memory.
    pub registry_dir: Option<PathBuf>,
    pub heartbeat_interval: Duration,
    pub stale_after: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::LOCALHOST, REGISTRY_DEFAULT_PORT)),
            registry_dir: None,
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            stale_after: Duration::from_secs(DEFAULT_STALE_AFTER_SECS),
        }
    }
}

impl RegistryConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            addr: env_or("DEVLINK_REGISTRY_ADDR", defaults.addr),
            registry_dir: std::env::var("DEVLINK_REGISTRY_DIR")
                .ok()
                .map(|dir| dir.trim().to_string())
                .filter(|dir| !dir.is_empty())
                .map(PathBuf::from),
            heartbeat_interval: env_secs_or(
                "DEVLINK_HEARTBEAT_INTERVAL_SECS",
                DEFAULT_HEARTBEAT_INTERVAL_SECS,
            ),
            stale_after: env_secs_or("DEVLINK_STALE_AFTER_SECS", DEFAULT_STALE_AFTER_SECS),
        }
    }

    /// Same settings bound to another address; tests use port 0.
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }
}

/// Reads and parses `var`, falling back to `default` when it is unset or
/// unparsable.
pub fn env_or<T>(var: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match std::env::var(var) {
        Ok(raw) => parse_or(var, raw.trim(), default),
        Err(_) => default,
    }
}

fn parse_or<T>(var: &str, raw: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match raw.parse() {
        Ok(value) => value,
        Err(_) => {
            warn!(variable = %var, value = %raw, default = %default, "Ignoring invalid configuration value");
            default
        }
    }
}

/// Reads a whole number of seconds from `var`. Zero is treated as invalid.
pub fn env_secs_or(var: &str, default_secs: u64) -> Duration {
    let secs = match std::env::var(var) {
        Ok(raw) => parse_secs_or(var, raw.trim(), default_secs),
        Err(_) => default_secs,
    };
    Duration::from_secs(secs)
}

fn parse_secs_or(var: &str, raw: &str, default_secs: u64) -> u64 {
    match raw.parse::<NonZeroU64>() {
        Ok(secs) => secs.get(),
        Err(_) => {
            warn!(variable = %var, value = %raw, default = default_secs, "Ignoring invalid duration");
            default_secs
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_uses_well_known_port() {
        let config = RegistryConfig::default();
        assert_eq!(config.addr.to_string(), "127.0.0.1:6284");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.stale_after, Duration::from_secs(300));
        assert!(config.registry_dir.is_none());
    }

    #[test]
    fn test_parse_or_falls_back_on_garbage() {
        assert_eq!(parse_or("X", "45", 30u64), 45);
        assert_eq!(parse_or("X", "soon", 30u64), 30);
        assert_eq!(parse_or("X", "-1", 30u64), 30);

        let addr: SocketAddr = parse_or("X", "not-an-addr", "127.0.0.1:1".parse().unwrap());
        assert_eq!(addr.port(), 1);
    }

    #[test]
    fn test_zero_seconds_falls_back_to_default() {
        assert_eq!(parse_secs_or("X", "0", 30), 30);
        assert_eq!(parse_secs_or("X", "5", 30), 5);
        assert_eq!(parse_secs_or("X", "soon", 30), 30);
    }

    #[test]
    fn test_env_or_reads_variable() {
        std::env::set_var("DEVLINK_TEST_ENV_OR_SECS", "12");
        assert_eq!(env_or("DEVLINK_TEST_ENV_OR_SECS", 30u64), 12);
        std::env::remove_var("DEVLINK_TEST_ENV_OR_SECS");
        assert_eq!(env_or("DEVLINK_TEST_ENV_OR_SECS", 30u64), 30);
    }

    #[test]
    fn test_with_addr_overrides_only_address() {
        let config = RegistryConfig::default().with_addr("127.0.0.1:0".parse().unwrap());
        assert_eq!(config.addr.port(), 0);
        assert_eq!(config.stale_after, Duration::from_secs(300));
    }
}
