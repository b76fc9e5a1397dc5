use api_contract::{CommandEnvelope, DownlinkPushEnvelope, RealtimeEvent};
use serde_json::Value;

#[test]
fn command_envelope_is_camel_case() {
    let envelope = CommandEnvelope {
        command_id: "cmd-1".to_string(),
        target_index: 2,
        action: "ON".to_string(),
        duration_secs: None,
        issued_at: 1_000,
        expires_at: 31_000,
    };
    let value = serde_json::to_value(&envelope).expect("serialize");
    assert_eq!(value["commandId"], "cmd-1");
    assert_eq!(value["targetIndex"], 2);
    assert_eq!(value["expiresAt"], 31_000);
    assert!(value.get("durationSecs").is_none());
    assert!(value.get("command_id").is_none());
}

#[test]
fn downlink_push_envelope_is_camel_case() {
    let envelope = DownlinkPushEnvelope {
        correlation_ids: vec!["corr-1".to_string()],
        f_port: 10,
        payload: "AQI=".to_string(),
        confirmed: true,
    };
    let value = serde_json::to_value(&envelope).expect("serialize");
    assert_eq!(value["correlationIds"][0], "corr-1");
    assert_eq!(value["fPort"], 10);
}

#[test]
fn realtime_event_is_tagged_by_type() {
    let event = RealtimeEvent::CommandAcknowledged {
        command_id: "cmd-1".to_string(),
        target_id: "mf-01".to_string(),
        target_index: 1,
        action: "ON".to_string(),
        acknowledged_at: 5_000,
    };
    let value: Value = serde_json::to_value(&event).expect("serialize");
    assert_eq!(value["type"], event.event_type());
    assert_eq!(value["type"], "commandAcknowledged");
    assert_eq!(value["acknowledgedAt"], 5_000);
    assert!(value.get("acknowledged_at").is_none());
}

#[test]
fn optional_fields_are_omitted() {
    let event = RealtimeEvent::DownlinkStatus {
        correlation_id: "corr-1".to_string(),
        device_id: "0004a30b001c0530".to_string(),
        status: "SENT".to_string(),
        failure_reason: None,
        at: 1,
    };
    let value: Value = serde_json::to_value(&event).expect("serialize");
    assert_eq!(value["type"], "downlinkStatus");
    assert!(value.get("failureReason").is_none());
}
