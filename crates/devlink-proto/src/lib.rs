pub mod connect;
pub mod inspector;
pub mod protocol;

#[cfg(test)]
mod protocol_tests;

pub use connect::{parse_handshake, ExtractedTarget, HandshakeKind, HandshakeOutcome};
pub use inspector::{
    InspectorCommand, InspectorEvent, InspectorResponse, TargetDescriptor, UpstreamMessage,
    VersionInfo,
};
pub use protocol::*;
