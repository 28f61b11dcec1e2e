pub mod controller;
pub mod repo;
pub mod service;

use crate::features::service_binding::repo::{BindingRequest, BindingResponse};
use crate::features::service_binding::service::BindingResolver;
use crate::Binding;
use async_trait::async_trait;
use controller::ObjectBindingController;
use repo::ObjectProxyEnvelope;
use service::ObjectBindingService;
use std::fmt;
use std::sync::Arc;

/// Identifies one object of a stateful-object class.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectId {
    id: String,
    name: Option<String>,
}

impl ObjectId {
    /// The same name always yields the same id.
    pub fn from_name(name: &str) -> Self {
        let id = hex::encode(name.as_bytes());
        Self {
            id,
            name: Some(name.to_string()),
        }
    }

    pub fn from_string(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Handle for a binding to a stateful-object class.
pub struct ObjectNamespace {
    name: String,
    class_name: String,
    script_name: Option<String>,
    controller: Arc<ObjectBindingController>,
}

impl ObjectNamespace {
    pub fn new(
        name: impl Into<String>,
        class_name: impl Into<String>,
        script_name: Option<String>,
        resolver: Arc<BindingResolver>,
    ) -> Self {
        Self {
            name: name.into(),
            class_name: class_name.into(),
            script_name,
            controller: Arc::new(ObjectBindingController::new(ObjectBindingService::new(
                resolver,
            ))),
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn id_from_name(&self, name: &str) -> ObjectId {
        ObjectId::from_name(name)
    }

    pub fn get(&self, id: ObjectId) -> ObjectStub {
        ObjectStub {
            binding: self.name.clone(),
            class_name: self.class_name.clone(),
            script_name: self.script_name.clone(),
            id,
            controller: self.controller.clone(),
        }
    }

    pub fn get_by_name(&self, name: &str) -> ObjectStub {
        self.get(self.id_from_name(name))
    }
}

#[async_trait]
impl Binding for ObjectNamespace {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, request: BindingRequest) -> BindingResponse {
        self.controller
            .handle_class_fetch(
                &self.name,
                &self.class_name,
                self.script_name.as_deref(),
                request,
            )
            .await
    }
}

/// Proxy for one object; every call is resolved afresh.
#[derive(Clone)]
pub struct ObjectStub {
    binding: String,
    class_name: String,
    script_name: Option<String>,
    id: ObjectId,
    controller: Arc<ObjectBindingController>,
}

impl ObjectStub {
    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    pub async fn fetch(&self, request: BindingRequest) -> BindingResponse {
        let envelope = ObjectProxyEnvelope {
            original_url: request.url.clone(),
            class_name: self.class_name.clone(),
            object_id: self.id.as_str().to_string(),
            object_name: self.id.name().map(str::to_string),
        };
        self.controller
            .handle_object_fetch(&self.binding, self.script_name.as_deref(), &envelope, request)
            .await
    }
}
