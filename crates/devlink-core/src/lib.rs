pub mod binding;
pub mod source;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;

pub use binding::{BindingDeclaration, BindingTarget};
pub use source::{RegistrySource, StaticRegistry};
pub use store::{RegistrySnapshot, RegistryStore};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("Unregistered binding: {0}")]
    UnregisteredBinding(String),
    #[error("Registry unavailable: {0}")]
    RegistryUnavailable(String),
    #[error("Tunnel handshake malformed: {0}")]
    TunnelHandshakeMalformed(String),
    #[error("Upstream reset: {0}")]
    UpstreamReset(String),
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Timeout: {0}")]
    Timeout(String),
}

impl CoreError {
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::UnregisteredBinding(_) => "UNREGISTERED_BINDING",
            CoreError::RegistryUnavailable(_) => "REGISTRY_UNAVAILABLE",
            CoreError::TunnelHandshakeMalformed(_) => "TUNNEL_HANDSHAKE_MALFORMED",
            CoreError::UpstreamReset(_) => "UPSTREAM_RESET",
            CoreError::InvalidRecord(_) => "INVALID_RECORD",
            CoreError::SerializationError(_) => "SERIALIZATION_ERROR",
            CoreError::StorageError(_) => "STORAGE_ERROR",
            CoreError::Timeout(_) => "TIMEOUT",
        }
    }
}

impl From<CoreError> for ErrorResponse {
    fn from(err: CoreError) -> Self {
        ErrorResponse::new(err.error_code(), err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether requests go straight to the instance or through a remote preview
/// session that needs the record's extra headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceMode {
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceAddress {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
}

impl InstanceAddress {
    pub fn new(protocol: Protocol, host: impl Into<String>, port: u16) -> Self {
        Self {
            protocol,
            host: host.into(),
            port,
        }
    }

    pub fn http(host: impl Into<String>, port: u16) -> Self {
        Self::new(Protocol::Http, host, port)
    }

    /// `scheme://host:port` with no trailing slash.
    pub fn origin(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }

    /// `host:port`, suitable for a raw TCP connect.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatefulObjectBinding {
    pub exported_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defining_instance: Option<String>,
}

impl StatefulObjectBinding {
    pub fn new(exported_name: impl Into<String>) -> Self {
        Self {
            exported_name: exported_name.into(),
            defining_instance: None,
        }
    }

    pub fn defined_by(mut self, instance: impl Into<String>) -> Self {
        self.defining_instance = Some(instance.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrypointAddress {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectorAddress {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_inspector_path")]
    pub path: String,
}

fn default_inspector_path() -> String {
    "/".to_string()
}

impl InspectorAddress {
    pub fn websocket_url(&self) -> String {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        format!("ws://{}:{}{}", self.host, self.port, path)
    }
}

/// Connection metadata for one running instance, keyed by its logical name.
///
/// Records are always replaced wholesale: a re-registration never merges with
/// the previous record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRecord {
    #[serde(default)]
    pub name: String,
    pub address: InstanceAddress,
    pub mode: InstanceMode,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stateful_object_bindings: Vec<StatefulObjectBinding>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub entrypoints: BTreeMap<String, EntrypointAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inspector: Option<InspectorAddress>,
}

impl InstanceRecord {
    pub fn new(name: impl Into<String>, address: InstanceAddress, mode: InstanceMode) -> Self {
        Self {
            name: name.into(),
            address,
            mode,
            headers: BTreeMap::new(),
            stateful_object_bindings: Vec::new(),
            entrypoints: BTreeMap::new(),
            inspector: None,
        }
    }

    pub fn local(name: impl Into<String>, address: InstanceAddress) -> Self {
        Self::new(name, address, InstanceMode::Local)
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_object(mut self, binding: StatefulObjectBinding) -> Self {
        self.stateful_object_bindings.push(binding);
        self
    }

    pub fn with_entrypoint(mut self, entrypoint: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        self.entrypoints.insert(
            entrypoint.into(),
            EntrypointAddress {
                host: host.into(),
                port,
            },
        );
        self
    }

    pub fn with_inspector(mut self, inspector: InspectorAddress) -> Self {
        self.inspector = Some(inspector);
        self
    }

    /// Whether this instance hosts the stateful-object class `class_name`
    /// itself, as opposed to merely declaring a binding to someone else's.
    pub fn exports_object(&self, class_name: &str) -> bool {
        self.stateful_object_bindings.iter().any(|binding| {
            binding.exported_name == class_name
                && binding
                    .defining_instance
                    .as_deref()
                    .map_or(true, |owner| owner == self.name)
        })
    }

    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        if self.address.host.trim().is_empty() {
            return Err(CoreError::InvalidRecord(format!(
                "instance {} has an empty host",
                self.name
            )));
        }
        if self.address.port == 0 {
            return Err(CoreError::InvalidRecord(format!(
                "instance {} has port 0",
                self.name
            )));
        }
        Ok(())
    }
}

/// Names end up in URL paths and file names, so they must be a single
/// non-empty path segment.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CoreError::InvalidRecord(
            "instance name cannot be empty".to_string(),
        ));
    }
    if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        return Err(CoreError::InvalidRecord(format!(
            "instance name {name:?} is not a single path segment"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(CoreError::InvalidRecord(format!(
            "instance name {name:?} contains control characters"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error_code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, String>>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorResponse {
    pub fn new(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            message: message.into(),
            details: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: HashMap<String, String>) -> Self {
        self.details = Some(details);
        self
    }
}
