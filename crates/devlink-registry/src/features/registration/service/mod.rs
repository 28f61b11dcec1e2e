use crate::features::observability::controller::ObservabilityController;
use crate::features::registration::repo::RegistryRepository;
use crate::shared::error::{RegistryError, RegistryResult};
use async_trait::async_trait;
use chrono::Utc;
use devlink_core::{InstanceRecord, RegistrySnapshot, RegistrySource};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// `POST /workers/init` resets the registry, so no instance may use this name.
pub const RESERVED_NAME: &str = "init";

/// Service for registering and looking up running instances
pub struct RegistrationService {
    repo: Arc<dyn RegistryRepository>,
    observability: Arc<ObservabilityController>,
}

impl RegistrationService {
    pub fn new(
        repo: Arc<dyn RegistryRepository>,
        observability: Arc<ObservabilityController>,
    ) -> Self {
        Self {
            repo,
            observability,
        }
    }

    fn validate(name: &str, record: &InstanceRecord) -> RegistryResult<()> {
        if name == RESERVED_NAME {
            return Err(RegistryError::InvalidRequest(format!(
                "instance name {RESERVED_NAME:?} is reserved"
            )));
        }
        let mut keyed = record.clone();
        keyed.name = name.to_string();
        keyed.validate()?;
        Ok(())
    }

    async fn refresh_active_count(&self) {
        match self.repo.snapshot().await {
            Ok(snapshot) => self.observability.set_active_instances(snapshot.len()),
            Err(error) => debug!(error = %error, "Could not refresh active instance count"),
        }
    }

    /// Register or re-register an instance; the previous record, if any, is
    /// replaced in full
    pub async fn register(&self, name: &str, record: InstanceRecord) -> RegistryResult<()> {
        Self::validate(name, &record)?;

        let address = record.address.origin();
        self.repo.upsert(name, record).await?;
        self.observability.record_registration();
        self.refresh_active_count().await;

        debug!(name = %name, address = %address, "Instance registered");
        Ok(())
    }

    /// Remove an instance; absent names are not an error
    pub async fn unregister(&self, name: &str) -> RegistryResult<()> {
        if self.repo.remove(name).await? {
            self.observability.record_removal();
            info!(name = %name, "Instance unregistered");
        }
        self.refresh_active_count().await;
        Ok(())
    }

    pub async fn get(&self, name: &str) -> RegistryResult<InstanceRecord> {
        self.repo
            .get(name)
            .await?
            .ok_or_else(|| RegistryError::InstanceNotFound(name.to_string()))
    }

    pub async fn list(&self) -> RegistryResult<RegistrySnapshot> {
        self.repo.snapshot().await
    }

    /// Clear all registrations
    pub async fn reset(&self) -> RegistryResult<()> {
        self.repo.clear().await?;
        self.observability.set_active_instances(0);
        info!("Registry reset");
        Ok(())
    }

    /// Remove every instance that has not re-registered within `stale_after`
    pub async fn evict_stale(&self, stale_after: Duration) -> RegistryResult<Vec<String>> {
        let max_age = chrono::Duration::from_std(stale_after).unwrap_or(chrono::Duration::MAX);
        let evicted = self.repo.evict_stale(Utc::now(), max_age).await?;

        if !evicted.is_empty() {
            self.observability.record_evictions(evicted.len());
            self.refresh_active_count().await;
            for name in &evicted {
                warn!(name = %name, stale_after_secs = stale_after.as_secs(), "Evicted instance with no recent heartbeat");
            }
        }
        Ok(evicted)
    }

    /// Periodically evict stale registrations until the handle is aborted
    pub fn spawn_eviction_sweep(
        self: Arc<Self>,
        every: Duration,
        stale_after: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                if let Err(error) = self.evict_stale(stale_after).await {
                    warn!(error = %error, "Stale registration sweep failed");
                }
            }
        })
    }

    /// Whether registrations survive this service going away
    pub fn is_persistent(&self) -> bool {
        self.repo.is_persistent()
    }
}

#[async_trait]
impl RegistrySource for RegistrationService {
    async fn snapshot(&self) -> RegistrySnapshot {
        self.list().await.unwrap_or_else(|error| {
            warn!(error = %error, "Registry read failed; treating every instance as absent");
            RegistrySnapshot::default()
        })
    }

    async fn lookup(&self, name: &str) -> Option<InstanceRecord> {
        self.repo.get(name).await.ok().flatten()
    }
}
