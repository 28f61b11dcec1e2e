// Registry and object-proxy wire formats.

use devlink_core::InstanceRecord;
use serde::{Deserialize, Serialize};

/// Well-known loopback port of the shared Registry Service.
pub const REGISTRY_DEFAULT_PORT: u16 = 6284;

/// Identity reported by `GET /health`; anything else on the port is a squatter.
pub const REGISTRY_SERVICE_ID: &str = "devlink-registry";

pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

// Stateful-object proxying
pub const OBJECT_PROXY_PATH: &str = "/__devlink_external_objects";
pub const OBJECT_URL_HEADER: &str = "x-devlink-object-url";
pub const OBJECT_CLASS_HEADER: &str = "x-devlink-object-class";
pub const OBJECT_ID_HEADER: &str = "x-devlink-object-id";
pub const OBJECT_NAME_HEADER: &str = "x-devlink-object-name";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    pub service: String,
    pub status: String,
}

impl HealthResponse {
    pub fn ok() -> Self {
        Self {
            service: REGISTRY_SERVICE_ID.to_string(),
            status: "ok".to_string(),
        }
    }

    pub fn is_compatible(&self) -> bool {
        self.service == REGISTRY_SERVICE_ID && self.status == "ok"
    }
}

/// On-disk shape of one registration in a registry directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationFile {
    pub tool_version: String,
    #[serde(flatten)]
    pub record: InstanceRecord,
}

impl RegistrationFile {
    pub fn new(record: InstanceRecord) -> Self {
        Self {
            tool_version: TOOL_VERSION.to_string(),
            record,
        }
    }
}
