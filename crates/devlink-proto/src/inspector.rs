// Inspector (debugger) protocol message shapes and discovery documents.

use devlink_core::{CoreError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: &str = "1.3";

/// Close code sent to a second debugger trying to attach to a busy instance.
pub const CLOSE_TOO_MANY_CLIENTS: u16 = 1013;
pub const TOO_MANY_CLIENTS_REASON: &str = "Too many clients; only one can be connected at a time";

pub const EXECUTION_CONTEXTS_CLEARED: &str = "Runtime.executionContextsCleared";
pub const KEEPALIVE_METHOD: &str = "Runtime.getIsolateId";

/// Client to instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectorCommand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl InspectorCommand {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            id: None,
            method: method.into(),
            params: Value::Null,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    /// `Debugger.enable` and friends; the domain is replayed after a
    /// reconnect.
    pub fn enabled_domain(&self) -> Option<&str> {
        self.method.strip_suffix(".enable")
    }

    pub fn disabled_domain(&self) -> Option<&str> {
        self.method.strip_suffix(".disable")
    }

    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|error| CoreError::SerializationError(error.to_string()))
    }
}

/// Instance to client, answering one command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectorResponse {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl InspectorResponse {
    pub fn with_id(&self, id: u64) -> Self {
        Self {
            id,
            result: self.result.clone(),
            error: self.error.clone(),
        }
    }

    pub fn failed(id: u64, code: i64, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(serde_json::json!({ "code": code, "message": message.into() })),
        }
    }
}

/// Instance to client, unsolicited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectorEvent {
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl InspectorEvent {
    pub fn execution_contexts_cleared() -> Self {
        Self {
            method: EXECUTION_CONTEXTS_CLEARED.to_string(),
            params: Value::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamMessage {
    Response(InspectorResponse),
    Event(InspectorEvent),
}

impl UpstreamMessage {
    /// Messages carrying an `id` are responses; the rest are events.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(text).map_err(|error| CoreError::SerializationError(error.to_string()))?;
        let message = if value.get("id").is_some() {
            UpstreamMessage::Response(
                serde_json::from_value(value)
                    .map_err(|error| CoreError::SerializationError(error.to_string()))?,
            )
        } else {
            UpstreamMessage::Event(
                serde_json::from_value(value)
                    .map_err(|error| CoreError::SerializationError(error.to_string()))?,
            )
        };
        Ok(message)
    }

    pub fn to_json(&self) -> String {
        let encoded = match self {
            UpstreamMessage::Response(response) => serde_json::to_string(response),
            UpstreamMessage::Event(event) => serde_json::to_string(event),
        };
        encoded.unwrap_or_default()
    }
}

/// `GET /json/version`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    #[serde(rename = "Browser")]
    pub browser: String,
    #[serde(rename = "Protocol-Version")]
    pub protocol_version: String,
}

impl VersionInfo {
    pub fn current() -> Self {
        Self {
            browser: format!("devlink/v{}", crate::protocol::TOOL_VERSION),
            protocol_version: PROTOCOL_VERSION.to_string(),
        }
    }
}

/// One entry of `GET /json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetDescriptor {
    pub id: String,
    #[serde(rename = "type")]
    pub target_type: String,
    pub title: String,
    pub description: String,
    pub web_socket_debugger_url: String,
    pub devtools_frontend_url: String,
    pub devtools_frontend_url_compat: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon_url: Option<String>,
}

impl TargetDescriptor {
    /// Describes `name` as reachable through the tunnel at `tunnel_authority`
    /// (`host:port`).
    pub fn for_instance(name: &str, tunnel_authority: &str, instance_origin: &str) -> Self {
        let socket = format!("{tunnel_authority}/{name}");
        Self {
            id: name.to_string(),
            target_type: "node".to_string(),
            title: format!("devlink: {name}"),
            description: "devlink instance".to_string(),
            web_socket_debugger_url: format!("ws://{socket}"),
            devtools_frontend_url: format!(
                "devtools://devtools/bundled/js_app.html?experiments=true&v8only=true&ws={socket}"
            ),
            devtools_frontend_url_compat: format!(
                "devtools://devtools/bundled/inspector.html?experiments=true&v8only=true&ws={socket}"
            ),
            url: instance_origin.to_string(),
            favicon_url: None,
        }
    }
}
