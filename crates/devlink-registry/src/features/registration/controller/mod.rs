use crate::features::registration::service::RegistrationService;
use crate::shared::error::RegistryResult;
use devlink_core::{InstanceRecord, RegistrySnapshot};
use std::sync::Arc;
use tracing::{debug, info};

/// Controller for the registry HTTP API
/// Thin wrapper that delegates to service
pub struct RegistrationController {
    service: Arc<RegistrationService>,
}

impl RegistrationController {
    pub fn new(service: Arc<RegistrationService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<RegistrationService> {
        &self.service
    }

    pub async fn register(&self, name: String, record: InstanceRecord) -> RegistryResult<()> {
        debug!(name = %name, "Received register request");
        self.service.register(&name, record).await
    }

    pub async fn unregister(&self, name: String) -> RegistryResult<()> {
        debug!(name = %name, "Received unregister request");
        self.service.unregister(&name).await
    }

    pub async fn get(&self, name: String) -> RegistryResult<InstanceRecord> {
        self.service.get(&name).await
    }

    pub async fn list(&self) -> RegistryResult<RegistrySnapshot> {
        self.service.list().await
    }

    pub async fn reset(&self) -> RegistryResult<()> {
        info!("Received registry init request");
        self.service.reset().await
    }
}
