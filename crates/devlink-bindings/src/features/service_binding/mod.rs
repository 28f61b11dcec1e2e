pub mod controller;
pub mod repo;
pub mod service;

use crate::Binding;
use async_trait::async_trait;
use controller::ServiceBindingController;
use repo::{BindingRequest, BindingResponse};
use service::BindingResolver;
use std::sync::Arc;

/// Handle for a binding to a whole instance (or one of its entrypoints).
pub struct ServiceBinding {
    name: String,
    service: String,
    entrypoint: Option<String>,
    controller: ServiceBindingController,
}

impl ServiceBinding {
    pub fn new(
        name: impl Into<String>,
        service: impl Into<String>,
        entrypoint: Option<String>,
        resolver: Arc<BindingResolver>,
    ) -> Self {
        Self {
            name: name.into(),
            service: service.into(),
            entrypoint,
            controller: ServiceBindingController::new(resolver),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn entrypoint(&self) -> Option<&str> {
        self.entrypoint.as_deref()
    }
}

#[async_trait]
impl Binding for ServiceBinding {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, request: BindingRequest) -> BindingResponse {
        self.controller
            .handle_fetch(&self.name, &self.service, self.entrypoint.as_deref(), request)
            .await
    }
}
