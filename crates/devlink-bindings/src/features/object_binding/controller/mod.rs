use crate::features::object_binding::repo::ObjectProxyEnvelope;
use crate::features::object_binding::service::ObjectBindingService;
use crate::features::service_binding::repo::{BindingRequest, BindingResponse};
use tracing::debug;

pub struct ObjectBindingController {
    service: ObjectBindingService,
}

impl ObjectBindingController {
    pub fn new(service: ObjectBindingService) -> Self {
        Self { service }
    }

    pub async fn handle_class_fetch(
        &self,
        binding: &str,
        class_name: &str,
        script_name: Option<&str>,
        request: BindingRequest,
    ) -> BindingResponse {
        debug!(binding = %binding, class = %class_name, "Object class fetch");
        self.service
            .fetch_class(binding, class_name, script_name, request)
            .await
    }

    pub async fn handle_object_fetch(
        &self,
        binding: &str,
        script_name: Option<&str>,
        envelope: &ObjectProxyEnvelope,
        request: BindingRequest,
    ) -> BindingResponse {
        debug!(
            binding = %binding,
            class = %envelope.class_name,
            object_id = %envelope.object_id,
            "Object fetch"
        );
        self.service
            .fetch_object(binding, script_name, envelope, request)
            .await
    }
}
