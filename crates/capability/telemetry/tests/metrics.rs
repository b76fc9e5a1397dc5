use fleet_telemetry::{
    metrics, new_trace_id, record_commands_expired, record_downlink_transition,
    record_presence_transition,
};

#[test]
fn trace_ids_are_unique() {
    let first = new_trace_id();
    let second = new_trace_id();
    assert!(!first.is_empty());
    assert_ne!(first, second);
}

#[test]
fn counters_accumulate() {
    let before = metrics().snapshot();
    record_commands_expired(3);
    record_presence_transition(false);
    record_downlink_transition(true);
    record_downlink_transition(false);
    let after = metrics().snapshot();
    assert!(after.commands_expired >= before.commands_expired + 3);
    assert!(after.presence_offline > before.presence_offline);
    assert!(after.downlink_transitions_applied > before.downlink_transitions_applied);
    assert!(after.downlink_transitions_ignored > before.downlink_transitions_ignored);
}
