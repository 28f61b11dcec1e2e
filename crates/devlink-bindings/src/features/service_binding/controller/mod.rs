use crate::features::service_binding::repo::{BindingRequest, BindingResponse};
use crate::features::service_binding::service::BindingResolver;
use std::sync::Arc;
use tracing::debug;

/// Entry point for calls made through a service binding
pub struct ServiceBindingController {
    resolver: Arc<BindingResolver>,
}

impl ServiceBindingController {
    pub fn new(resolver: Arc<BindingResolver>) -> Self {
        Self { resolver }
    }

    pub async fn handle_fetch(
        &self,
        binding: &str,
        service: &str,
        entrypoint: Option<&str>,
        request: BindingRequest,
    ) -> BindingResponse {
        debug!(binding = %binding, service = %service, method = %request.method, "Binding fetch");
        self.resolver
            .fetch_service(binding, service, entrypoint, request)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::service_binding::repo::BindingTransport;
    use async_trait::async_trait;
    use devlink_core::{RegistryStore, Result};

    struct DummyTransport;

    #[async_trait]
    impl BindingTransport for DummyTransport {
        async fn dispatch(&self, _request: BindingRequest) -> Result<BindingResponse> {
            Ok(BindingResponse::diagnostic(200, "ok"))
        }
    }

    #[tokio::test]
    async fn test_handle_fetch_on_empty_registry_is_diagnostic() {
        let resolver = Arc::new(BindingResolver::new(
            Arc::new(RegistryStore::new()),
            Arc::new(DummyTransport),
        ));
        let controller = ServiceBindingController::new(resolver);

        let response = controller
            .handle_fetch("BILLING", "billing", None, BindingRequest::get("http://x/"))
            .await;
        assert_eq!(response.status, 503);
    }
}
