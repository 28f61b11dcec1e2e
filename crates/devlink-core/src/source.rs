use async_trait::async_trait;
use tracing::warn;

use crate::store::{RegistrySnapshot, RegistryStore};
use crate::{CoreError, InstanceAddress, InstanceRecord, Protocol, Result};

/// Anything the binding and tunnel layers can ask "who is running right now".
///
/// Implementations never fail: an unreachable backing registry reads as an
/// empty one, and callers treat every absent name as "not running".
#[async_trait]
pub trait RegistrySource: Send + Sync {
    async fn snapshot(&self) -> RegistrySnapshot;

    async fn lookup(&self, name: &str) -> Option<InstanceRecord> {
        self.snapshot().await.get(name).cloned()
    }
}

#[async_trait]
impl RegistrySource for RegistryStore {
    async fn snapshot(&self) -> RegistrySnapshot {
        self.all()
    }

    async fn lookup(&self, name: &str) -> Option<InstanceRecord> {
        self.get(name)
    }
}

/// Fixed set of instances, for pointing at processes that never register
/// themselves.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    store: RegistryStore,
}

impl StaticRegistry {
    pub fn new(records: impl IntoIterator<Item = InstanceRecord>) -> Self {
        let store = RegistryStore::new();
        for record in records {
            let name = record.name.clone();
            store.upsert(&name, record);
        }
        Self { store }
    }

    /// Reads `DEVLINK_STATIC_INSTANCES`. Unparsable entries are skipped with a
    /// warning.
    pub fn from_env() -> Self {
        let raw = std::env::var("DEVLINK_STATIC_INSTANCES").unwrap_or_default();
        let mut records = Vec::new();
        for entry in raw.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
            match parse_static_entry(entry) {
                Ok(record) => records.push(record),
                Err(error) => warn!(entry = %entry, error = %error, "Skipping static instance"),
            }
        }
        Self::new(records)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

#[async_trait]
impl RegistrySource for StaticRegistry {
    async fn snapshot(&self) -> RegistrySnapshot {
        self.store.all()
    }

    async fn lookup(&self, name: &str) -> Option<InstanceRecord> {
        self.store.get(name)
    }
}

/// Parses `name=scheme://host:port`.
pub fn parse_static_entry(entry: &str) -> Result<InstanceRecord> {
    let invalid = || CoreError::InvalidRecord(format!("expected name=http://host:port, got {entry:?}"));

    let (name, url) = entry.split_once('=').ok_or_else(invalid)?;
    let (protocol, rest) = if let Some(rest) = url.strip_prefix("http://") {
        (Protocol::Http, rest)
    } else if let Some(rest) = url.strip_prefix("https://") {
        (Protocol::Https, rest)
    } else {
        return Err(invalid());
    };
    let authority = rest.trim_end_matches('/');
    let (host, port) = authority.rsplit_once(':').ok_or_else(invalid)?;
    let port: u16 = port.parse().map_err(|_| invalid())?;

    let record = InstanceRecord::local(name.trim(), InstanceAddress::new(protocol, host, port));
    record.validate()?;
    Ok(record)
}
