use domain::{
    AlarmInstance, AlarmSeverity, ControlTarget, TargetKind, TargetMode, TargetRef, TargetStatus,
};
use fleet_storage::{AlarmStore, InMemoryAlarmStore, InMemoryTargetStore, TargetStore};

fn alarm(id: &str, message: &str) -> AlarmInstance {
    AlarmInstance {
        alarm_id: id.to_string(),
        severity: AlarmSeverity::Critical,
        message: message.to_string(),
        timestamp_ms: 1_000,
        acknowledged: false,
    }
}

#[tokio::test]
async fn commanded_status_counts_cycles_only_when_asked() {
    let valve = TargetRef::valve("mf-01", 1);
    let store = InMemoryTargetStore::with_targets(vec![ControlTarget::placeholder(valve.clone())]);

    let on = store
        .apply_commanded_status(&valve, TargetStatus::On, true, 1_000)
        .await
        .expect("apply")
        .expect("target");
    assert_eq!(on.current_status, TargetStatus::On);
    assert_eq!(on.cycle_count, 1);

    let off = store
        .apply_commanded_status(&valve, TargetStatus::Off, false, 2_000)
        .await
        .expect("apply")
        .expect("target");
    assert_eq!(off.cycle_count, 1);
    assert_eq!(off.last_changed_at_ms, Some(2_000));
}

#[tokio::test]
async fn commanded_status_on_unknown_target_is_none() {
    let store = InMemoryTargetStore::new();
    let result = store
        .apply_commanded_status(&TargetRef::device("dev-9"), TargetStatus::On, true, 1)
        .await
        .expect("apply");
    assert!(result.is_none());
}

#[tokio::test]
async fn observed_status_creates_manual_placeholder() {
    let store = InMemoryTargetStore::new();
    let valve = TargetRef::valve("mf-02", 3);
    let target = store
        .record_observed_status(&valve, TargetStatus::Fault, 5_000)
        .await
        .expect("observe");
    assert_eq!(target.mode, TargetMode::Manual);
    assert_eq!(target.current_status, TargetStatus::Fault);
    assert_eq!(target.last_changed_at_ms, Some(5_000));

    let listed = store
        .list_targets(TargetKind::Manifold, "mf-02")
        .await
        .expect("list");
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn open_alarms_are_deduplicated_by_message() {
    let store = InMemoryAlarmStore::new();
    let valve = TargetRef::valve("mf-01", 1);

    assert!(store
        .insert_alarm_if_absent(&valve, alarm("a1", "Valve 1 FAULT"))
        .await
        .expect("insert"));
    assert!(!store
        .insert_alarm_if_absent(&valve, alarm("a2", "Valve 1 FAULT"))
        .await
        .expect("insert"));

    assert!(store.acknowledge_alarm(&valve, "a1").await.expect("ack"));
    assert!(!store.acknowledge_alarm(&valve, "a1").await.expect("ack"));

    assert!(store
        .insert_alarm_if_absent(&valve, alarm("a3", "Valve 1 FAULT"))
        .await
        .expect("insert"));
    let alarms = store.list_alarms(&valve).await.expect("list");
    assert_eq!(alarms.len(), 2);
}
