use crate::features::object_binding::repo::ObjectProxyEnvelope;
use crate::features::service_binding::repo::{BindingRequest, BindingResponse};
use crate::features::service_binding::service::{BindingResolver, Resolution};
use std::sync::Arc;

/// Routes calls on stateful objects to whichever instance exports the class.
pub struct ObjectBindingService {
    resolver: Arc<BindingResolver>,
}

impl ObjectBindingService {
    pub fn new(resolver: Arc<BindingResolver>) -> Self {
        Self { resolver }
    }

    /// Call addressed to the class as a whole, sent to the exporter as is.
    pub async fn fetch_class(
        &self,
        binding: &str,
        class_name: &str,
        script_name: Option<&str>,
        request: BindingRequest,
    ) -> BindingResponse {
        match self
            .resolver
            .resolve_object(binding, class_name, script_name)
            .await
        {
            Resolution::Dispatch(target) => self.resolver.dispatch(binding, &target, request).await,
            Resolution::Unavailable(response) => response,
        }
    }

    /// Call addressed to one object, wrapped in the object-proxy envelope.
    pub async fn fetch_object(
        &self,
        binding: &str,
        script_name: Option<&str>,
        envelope: &ObjectProxyEnvelope,
        request: BindingRequest,
    ) -> BindingResponse {
        match self
            .resolver
            .resolve_object(binding, &envelope.class_name, script_name)
            .await
        {
            Resolution::Dispatch(target) => {
                let wrapped = envelope.encode(request);
                self.resolver.dispatch(binding, &target, wrapped).await
            }
            Resolution::Unavailable(response) => response,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::service_binding::repo::BindingTransport;
    use async_trait::async_trait;
    use devlink_core::{
        InstanceAddress, InstanceRecord, RegistryStore, Result, StatefulObjectBinding,
    };
    use devlink_proto::{OBJECT_ID_HEADER, OBJECT_PROXY_PATH};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        seen: Mutex<Vec<BindingRequest>>,
    }

    #[async_trait]
    impl BindingTransport for RecordingTransport {
        async fn dispatch(&self, request: BindingRequest) -> Result<BindingResponse> {
            self.seen.lock().unwrap().push(request);
            Ok(BindingResponse::diagnostic(200, "ok"))
        }
    }

    #[tokio::test]
    async fn test_fetch_object_dispatches_envelope_to_exporter() {
        let store = RegistryStore::new();
        store.upsert(
            "ledger-host",
            InstanceRecord::local("", InstanceAddress::http("127.0.0.1", 7000))
                .with_object(StatefulObjectBinding::new("Ledger")),
        );
        let transport = Arc::new(RecordingTransport::default());
        let service = ObjectBindingService::new(Arc::new(BindingResolver::new(
            Arc::new(store),
            transport.clone(),
        )));

        let envelope = ObjectProxyEnvelope {
            original_url: "http://x/balance".to_string(),
            class_name: "Ledger".to_string(),
            object_id: "abc".to_string(),
            object_name: None,
        };
        let response = service
            .fetch_object("LEDGER", None, &envelope, BindingRequest::get("http://x/balance"))
            .await;

        assert_eq!(response.status, 200);
        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].url, format!("http://127.0.0.1:7000{OBJECT_PROXY_PATH}"));
        assert_eq!(seen[0].header(OBJECT_ID_HEADER), Some("abc"));
    }

    #[tokio::test]
    async fn test_fetch_class_without_exporter_is_diagnostic() {
        let service = ObjectBindingService::new(Arc::new(BindingResolver::new(
            Arc::new(RegistryStore::new()),
            Arc::new(RecordingTransport::default()),
        )));

        let response = service
            .fetch_class("LEDGER", "Ledger", Some("ledger-host"), BindingRequest::get("http://x/"))
            .await;
        assert_eq!(response.status, 503);
        assert!(response.text().contains("ledger-host"));
    }
}
