#[cfg(test)]
mod tests {
    use crate::inspector::*;
    use crate::protocol::*;
    use devlink_core::{InstanceAddress, InstanceRecord};
    use serde_json::json;

    #[test]
    fn test_health_response_identity() {
        let health = HealthResponse::ok();
        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json, json!({"service": "devlink-registry", "status": "ok"}));
        assert!(health.is_compatible());

        let squatter = HealthResponse {
            service: "something-else".to_string(),
            status: "ok".to_string(),
        };
        assert!(!squatter.is_compatible());
    }

    #[test]
    fn test_registration_file_flattens_record() {
        let file = RegistrationFile::new(InstanceRecord::local(
            "billing",
            InstanceAddress::http("127.0.0.1", 6789),
        ));

        let json = serde_json::to_value(&file).unwrap();
        assert_eq!(json["toolVersion"], TOOL_VERSION);
        assert_eq!(json["name"], "billing");
        assert_eq!(json["address"]["port"], 6789);

        let back: RegistrationFile = serde_json::from_value(json).unwrap();
        assert_eq!(back, file);
    }

    #[test]
    fn test_command_parse_and_domains() {
        let command = InspectorCommand::parse(r#"{"id":7,"method":"Debugger.enable"}"#).unwrap();
        assert_eq!(command.id, Some(7));
        assert_eq!(command.enabled_domain(), Some("Debugger"));
        assert_eq!(command.disabled_domain(), None);
        assert!(command.params.is_null());

        let command = InspectorCommand::parse(r#"{"method":"Runtime.disable","params":{}}"#).unwrap();
        assert_eq!(command.id, None);
        assert_eq!(command.disabled_domain(), Some("Runtime"));

        assert!(InspectorCommand::parse("not json").is_err());
    }

    #[test]
    fn test_upstream_message_classification() {
        let response = UpstreamMessage::parse(r#"{"id":3,"result":{"isolateId":"abc"}}"#).unwrap();
        match response {
            UpstreamMessage::Response(response) => {
                assert_eq!(response.id, 3);
                assert_eq!(response.result, Some(json!({"isolateId": "abc"})));
            }
            other => panic!("expected response, got {other:?}"),
        }

        let event = UpstreamMessage::parse(
            r#"{"method":"Runtime.consoleAPICalled","params":{"type":"log"}}"#,
        )
        .unwrap();
        assert!(matches!(event, UpstreamMessage::Event(ref e) if e.method == "Runtime.consoleAPICalled"));
    }

    #[test]
    fn test_response_id_rewrite_keeps_payload() {
        let response = InspectorResponse {
            id: 1001,
            result: Some(json!({"ok": true})),
            error: None,
        };
        let rewritten = response.with_id(4);
        assert_eq!(rewritten.id, 4);
        assert_eq!(rewritten.result, response.result);

        let text = UpstreamMessage::Response(rewritten).to_json();
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&text).unwrap(),
            json!({"id": 4, "result": {"ok": true}})
        );
    }

    #[test]
    fn test_discovery_documents() {
        let version = serde_json::to_value(VersionInfo::current()).unwrap();
        assert_eq!(version["Protocol-Version"], "1.3");
        assert!(version["Browser"].as_str().unwrap().starts_with("devlink/v"));

        let target = TargetDescriptor::for_instance("billing", "127.0.0.1:9229", "http://localhost:6789");
        let json = serde_json::to_value(&target).unwrap();
        assert_eq!(json["id"], "billing");
        assert_eq!(json["type"], "node");
        assert_eq!(json["webSocketDebuggerUrl"], "ws://127.0.0.1:9229/billing");
        assert!(json["devtoolsFrontendUrl"]
            .as_str()
            .unwrap()
            .ends_with("ws=127.0.0.1:9229/billing"));
        assert!(json.get("faviconUrl").is_none());
    }
}
