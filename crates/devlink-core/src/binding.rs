use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::store::RegistrySnapshot;

/// What a binding declared by a dependent instance points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BindingTarget {
    /// A whole instance, optionally one of its named entrypoints.
    #[serde(rename_all = "camelCase")]
    Service {
        service: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        entrypoint: Option<String>,
    },
    /// A stateful-object class, optionally pinned to the instance that
    /// defines it.
    #[serde(rename_all = "camelCase")]
    StatefulObject {
        class_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        script_name: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingDeclaration {
    pub binding: String,
    #[serde(flatten)]
    pub target: BindingTarget,
}

impl BindingDeclaration {
    pub fn service(binding: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            binding: binding.into(),
            target: BindingTarget::Service {
                service: service.into(),
                entrypoint: None,
            },
        }
    }

    pub fn service_entrypoint(
        binding: impl Into<String>,
        service: impl Into<String>,
        entrypoint: impl Into<String>,
    ) -> Self {
        Self {
            binding: binding.into(),
            target: BindingTarget::Service {
                service: service.into(),
                entrypoint: Some(entrypoint.into()),
            },
        }
    }

    pub fn stateful_object(binding: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self {
            binding: binding.into(),
            target: BindingTarget::StatefulObject {
                class_name: class_name.into(),
                script_name: None,
            },
        }
    }

    pub fn stateful_object_in(
        binding: impl Into<String>,
        class_name: impl Into<String>,
        script_name: impl Into<String>,
    ) -> Self {
        Self {
            binding: binding.into(),
            target: BindingTarget::StatefulObject {
                class_name: class_name.into(),
                script_name: Some(script_name.into()),
            },
        }
    }

    /// The instance name this binding names directly, if any.
    pub fn named_instance(&self) -> Option<&str> {
        match &self.target {
            BindingTarget::Service { service, .. } => Some(service),
            BindingTarget::StatefulObject { script_name, .. } => script_name.as_deref(),
        }
    }

    /// Whether this binding resolves to the declaring instance itself and so
    /// never needs the registry.
    pub fn is_self_binding(&self, own_name: &str) -> bool {
        self.named_instance() == Some(own_name)
    }
}

/// Instance names a set of bindings depends on, excluding self-bindings.
pub fn required_instances(declarations: &[BindingDeclaration], own_name: &str) -> BTreeSet<String> {
    declarations
        .iter()
        .filter(|declaration| !declaration.is_self_binding(own_name))
        .filter_map(|declaration| declaration.named_instance().map(str::to_string))
        .collect()
}

impl RegistrySnapshot {
    /// The subset of this snapshot that `declarations` actually reach.
    ///
    /// Service bindings keep the named instance; stateful-object bindings
    /// keep whichever instance currently exports the class. Names with no
    /// record are simply absent.
    pub fn bound_subset(&self, declarations: &[BindingDeclaration], own_name: &str) -> RegistrySnapshot {
        declarations
            .iter()
            .filter(|declaration| !declaration.is_self_binding(own_name))
            .filter_map(|declaration| match &declaration.target {
                BindingTarget::Service { service, .. } => self.get(service),
                BindingTarget::StatefulObject {
                    class_name,
                    script_name,
                } => self.object_exporter(class_name, script_name.as_deref()),
            })
            .map(|record| (record.name.clone(), record.clone()))
            .collect()
    }
}
