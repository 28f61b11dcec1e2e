pub mod features;

use async_trait::async_trait;
use devlink_core::{BindingDeclaration, BindingTarget, CoreError, InstanceRecord, RegistrySource};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub use features::object_binding::repo::{is_object_proxy_url, ObjectProxyEnvelope};
pub use features::object_binding::{ObjectId, ObjectNamespace, ObjectStub};
pub use features::service_binding::repo::{
    BindingRequest, BindingResponse, BindingTransport, ReqwestBindingTransport,
};
pub use features::service_binding::service::{
    rewrite_url, BindingResolver, UNAVAILABLE_STATUS, UNREACHABLE_STATUS,
};
pub use features::service_binding::ServiceBinding;

/// Status returned for a binding name the instance never declared.
pub const UNDECLARED_STATUS: u16 = 500;

/// One declared binding, as seen by the instance that declared it.
///
/// `fetch` never fails: an absent or unreachable target comes back as a
/// diagnostic response naming the binding.
#[async_trait]
pub trait Binding: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch(&self, request: BindingRequest) -> BindingResponse;
}

pub enum BindingHandle {
    Service(ServiceBinding),
    Object(ObjectNamespace),
}

impl BindingHandle {
    fn from_declaration(declaration: BindingDeclaration, resolver: Arc<BindingResolver>) -> Self {
        match declaration.target {
            BindingTarget::Service {
                service,
                entrypoint,
            } => BindingHandle::Service(ServiceBinding::new(
                declaration.binding,
                service,
                entrypoint,
                resolver,
            )),
            BindingTarget::StatefulObject {
                class_name,
                script_name,
            } => BindingHandle::Object(ObjectNamespace::new(
                declaration.binding,
                class_name,
                script_name,
                resolver,
            )),
        }
    }

    pub fn as_service(&self) -> Option<&ServiceBinding> {
        match self {
            BindingHandle::Service(binding) => Some(binding),
            BindingHandle::Object(_) => None,
        }
    }

    /// The namespace accessor, for `get`/`get_by_name` on stateful objects.
    pub fn as_object(&self) -> Option<&ObjectNamespace> {
        match self {
            BindingHandle::Object(namespace) => Some(namespace),
            BindingHandle::Service(_) => None,
        }
    }
}

#[async_trait]
impl Binding for BindingHandle {
    fn name(&self) -> &str {
        match self {
            BindingHandle::Service(binding) => binding.name(),
            BindingHandle::Object(namespace) => namespace.name(),
        }
    }

    async fn fetch(&self, request: BindingRequest) -> BindingResponse {
        match self {
            BindingHandle::Service(binding) => binding.fetch(request).await,
            BindingHandle::Object(namespace) => namespace.fetch(request).await,
        }
    }
}

/// Dispatch table built once at instance start-up from the declared bindings.
pub struct BindingTable {
    handles: HashMap<String, BindingHandle>,
    resolver: Arc<BindingResolver>,
}

impl BindingTable {
    pub fn new(declarations: Vec<BindingDeclaration>, resolver: Arc<BindingResolver>) -> Self {
        let mut handles = HashMap::with_capacity(declarations.len());
        for declaration in declarations {
            let name = declaration.binding.clone();
            let handle = BindingHandle::from_declaration(declaration, resolver.clone());
            if handles.insert(name.clone(), handle).is_some() {
                warn!(binding = %name, "Binding declared twice; keeping the last declaration");
            }
        }
        debug!(bindings = handles.len(), "Binding table built");
        Self { handles, resolver }
    }

    /// Table dispatching over HTTP, resolving names through `source`.
    pub fn connect(
        declarations: Vec<BindingDeclaration>,
        source: Arc<dyn RegistrySource>,
        own: Option<InstanceRecord>,
    ) -> devlink_core::Result<Self> {
        let transport = Arc::new(ReqwestBindingTransport::new()?);
        let mut resolver = BindingResolver::new(source, transport);
        if let Some(own) = own {
            resolver = resolver.with_own_record(own);
        }
        Ok(Self::new(declarations, Arc::new(resolver)))
    }

    pub fn get(&self, name: &str) -> Option<&BindingHandle> {
        self.handles.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handles.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn resolver(&self) -> &Arc<BindingResolver> {
        &self.resolver
    }

    pub async fn fetch(&self, name: &str, request: BindingRequest) -> BindingResponse {
        match self.handles.get(name) {
            Some(handle) => handle.fetch(request).await,
            None => {
                let error = CoreError::UnregisteredBinding(name.to_string());
                warn!(binding = %name, "Fetch through undeclared binding");
                BindingResponse::diagnostic(
                    UNDECLARED_STATUS,
                    format!("{error}. Declare binding \"{name}\" in this instance's configuration."),
                )
            }
        }
    }
}
