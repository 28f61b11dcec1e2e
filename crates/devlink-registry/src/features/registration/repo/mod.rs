pub mod filesystem;

use crate::shared::error::RegistryResult;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use devlink_core::{InstanceRecord, RegistrySnapshot, RegistryStore};

pub use filesystem::FilesystemRegistryRepository;

/// Storage for the authoritative registry
#[async_trait]
pub trait RegistryRepository: Send + Sync {
    /// Store or replace the record for `name`
    async fn upsert(&self, name: &str, record: InstanceRecord) -> RegistryResult<()>;

    async fn get(&self, name: &str) -> RegistryResult<Option<InstanceRecord>>;

    /// Returns whether an entry existed
    async fn remove(&self, name: &str) -> RegistryResult<bool>;

    async fn snapshot(&self) -> RegistryResult<RegistrySnapshot>;

    async fn clear(&self) -> RegistryResult<()>;

    /// Drop entries not refreshed within `max_age`; returns evicted names
    async fn evict_stale(&self, now: DateTime<Utc>, max_age: Duration)
        -> RegistryResult<Vec<String>>;

    /// Whether state outlives the process that owns the repository
    fn is_persistent(&self) -> bool {
        false
    }
}

/// In-memory implementation backed by a shared [`RegistryStore`]
#[derive(Clone, Default)]
pub struct InMemoryRegistryRepository {
    store: RegistryStore,
}

impl InMemoryRegistryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(store: RegistryStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &RegistryStore {
        &self.store
    }
}

#[async_trait]
impl RegistryRepository for InMemoryRegistryRepository {
    async fn upsert(&self, name: &str, record: InstanceRecord) -> RegistryResult<()> {
        self.store.upsert(name, record);
        Ok(())
    }

    async fn get(&self, name: &str) -> RegistryResult<Option<InstanceRecord>> {
        Ok(self.store.get(name))
    }

    async fn remove(&self, name: &str) -> RegistryResult<bool> {
        Ok(self.store.remove(name))
    }

    async fn snapshot(&self) -> RegistryResult<RegistrySnapshot> {
        Ok(self.store.all())
    }

    async fn clear(&self) -> RegistryResult<()> {
        self.store.clear();
        Ok(())
    }

    async fn evict_stale(
        &self,
        now: DateTime<Utc>,
        max_age: Duration,
    ) -> RegistryResult<Vec<String>> {
        Ok(self.store.evict_stale(now, max_age))
    }
}
