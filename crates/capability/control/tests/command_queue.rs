use api_contract::{CommandEnvelope, RealtimeEvent};
use domain::{
    CommandAction, CommandStatus, ControlTarget, EXPIRED_REASON, TargetMode, TargetRef,
    TargetStatus,
};
use fleet_control::{CommandQueueConfig, CommandQueueManager, ControlError};
use fleet_realtime::{RealtimeChannel, RealtimeHub};
use fleet_scheduler::ManualScheduler;
use fleet_storage::{
    CommandFilter, InMemoryCommandStore, InMemoryTargetStore, TargetStore,
};
use fleet_transport::EmbeddedBroker;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    manager: CommandQueueManager,
    targets: Arc<InMemoryTargetStore>,
    broker: Arc<EmbeddedBroker>,
    scheduler: Arc<ManualScheduler>,
    hub: RealtimeHub,
}

fn harness(targets: Vec<ControlTarget>) -> Harness {
    let targets = Arc::new(InMemoryTargetStore::with_targets(targets));
    let (broker, _inbound) = EmbeddedBroker::new(16);
    let scheduler = Arc::new(ManualScheduler::new(0));
    let hub = RealtimeHub::new();
    let manager = CommandQueueManager::new(
        Arc::new(InMemoryCommandStore::new()),
        targets.clone(),
        broker.clone(),
        scheduler.clone(),
        hub.clone(),
        CommandQueueConfig::default(),
    );
    Harness {
        manager,
        targets,
        broker,
        scheduler,
        hub,
    }
}

fn manual_valve(manifold_id: &str, valve: u32) -> ControlTarget {
    let mut target = ControlTarget::placeholder(TargetRef::valve(manifold_id, valve));
    target.mode = TargetMode::Manual;
    target.current_status = TargetStatus::Off;
    target
}

#[tokio::test]
async fn enqueue_rejects_auto_mode_without_creating_command() {
    let mut auto = manual_valve("mf-01", 1);
    auto.mode = TargetMode::Auto;
    let h = harness(vec![auto]);

    let err = h
        .manager
        .enqueue(&TargetRef::valve("mf-01", 1), CommandAction::On, None)
        .await
        .expect_err("auto mode");
    assert!(matches!(err, ControlError::InvalidMode(_)));

    let commands = h
        .manager
        .list_commands(&CommandFilter::default())
        .await
        .expect("list");
    assert!(commands.is_empty());
}

#[tokio::test]
async fn enqueue_unknown_target_creates_nothing() {
    let h = harness(Vec::new());
    let err = h
        .manager
        .enqueue(&TargetRef::valve("mf-404", 1), CommandAction::On, None)
        .await
        .expect_err("unknown target");
    assert!(matches!(err, ControlError::UnknownTarget(_)));
    assert!(
        h.manager
            .list_commands(&CommandFilter::default())
            .await
            .expect("list")
            .is_empty()
    );
}

#[tokio::test]
async fn enqueue_publishes_envelope_and_marks_sent() {
    let h = harness(vec![manual_valve("mf-01", 2)]);
    let mut device = h.broker.device_subscribe("manifolds/mf-01/command");
    let target = TargetRef::valve("mf-01", 2);

    let command = h
        .manager
        .enqueue(&target, CommandAction::On, None)
        .await
        .expect("enqueue");
    assert_eq!(command.status, CommandStatus::Sent);
    assert_eq!(command.expires_at_ms, 30_000);

    let message = device.try_recv().expect("command published");
    let envelope: CommandEnvelope = serde_json::from_slice(&message.payload).expect("envelope");
    assert_eq!(envelope.command_id, command.command_id);
    assert_eq!(envelope.target_index, 2);
    assert_eq!(envelope.action, "ON");

    let stored = h.targets.find_target(&target).await.expect("find").expect("target");
    assert_eq!(stored.current_status, TargetStatus::On);
    assert_eq!(stored.cycle_count, 1);
}

#[tokio::test]
async fn publish_failure_marks_failed_with_reason() {
    let h = harness(vec![manual_valve("mf-01", 1)]);
    let target = TargetRef::valve("mf-01", 1);
    let mut events = h.hub.subscribe(&RealtimeChannel::for_target(&target));
    h.broker.set_connected(false);

    let command = h
        .manager
        .enqueue(&target, CommandAction::On, None)
        .await
        .expect("enqueue returns failed command");
    assert_eq!(command.status, CommandStatus::Failed);
    assert!(command.error_message.as_deref().is_some_and(|msg| !msg.is_empty()));

    let stored = h.targets.find_target(&target).await.expect("find").expect("target");
    assert_eq!(stored.current_status, TargetStatus::Off);
    assert_eq!(stored.cycle_count, 0);

    let event = events.try_recv().expect("status event");
    match event.as_ref() {
        RealtimeEvent::CommandStatus { status, .. } => assert_eq!(status, "FAILED"),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn acknowledge_is_terminal_and_survives_expiry_sweep() {
    let h = harness(vec![manual_valve("mf-01", 1)]);
    let target = TargetRef::valve("mf-01", 1);
    let command = h
        .manager
        .enqueue(&target, CommandAction::Off, None)
        .await
        .expect("enqueue");

    let acked = h
        .manager
        .acknowledge(&command.command_id, 2_000)
        .await
        .expect("ack")
        .expect("transition");
    assert_eq!(acked.status, CommandStatus::Acknowledged);
    assert_eq!(acked.acknowledged_at_ms, Some(2_000));

    let again = h.manager.acknowledge(&command.command_id, 3_000).await.expect("ack");
    assert!(again.is_none());

    let expired = h.manager.expire_overdue(120_000).await.expect("sweep");
    assert!(expired.is_empty());
    let stored = h
        .manager
        .get_command(&command.command_id)
        .await
        .expect("get")
        .expect("command");
    assert_eq!(stored.status, CommandStatus::Acknowledged);
}

#[tokio::test]
async fn unacknowledged_command_expires_exactly_once() {
    let h = harness(vec![manual_valve("mf-01", 1)]);
    let command = h
        .manager
        .enqueue(&TargetRef::valve("mf-01", 1), CommandAction::On, None)
        .await
        .expect("enqueue");

    assert!(h.manager.expire_overdue(30_000).await.expect("sweep").is_empty());

    let expired = h.manager.expire_overdue(30_001).await.expect("sweep");
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].command_id, command.command_id);
    assert_eq!(expired[0].status, CommandStatus::Expired);
    assert_eq!(expired[0].error_message.as_deref(), Some(EXPIRED_REASON));

    assert!(h.manager.expire_overdue(60_000).await.expect("sweep").is_empty());
    let late_ack = h.manager.acknowledge(&command.command_id, 61_000).await.expect("ack");
    assert!(late_ack.is_none());
}

#[tokio::test]
async fn expiry_sweep_runs_on_scheduler_interval() {
    let h = harness(vec![manual_valve("mf-01", 1)]);
    let command = h
        .manager
        .enqueue(&TargetRef::valve("mf-01", 1), CommandAction::On, None)
        .await
        .expect("enqueue");
    h.manager.start_expiry_sweep(Duration::from_secs(60));

    h.scheduler.advance(Duration::from_secs(59)).await;
    let pending = h.manager.get_command(&command.command_id).await.expect("get").expect("cmd");
    assert_eq!(pending.status, CommandStatus::Sent);

    h.scheduler.advance(Duration::from_secs(1)).await;
    let expired = h.manager.get_command(&command.command_id).await.expect("get").expect("cmd");
    assert_eq!(expired.status, CommandStatus::Expired);
}

#[tokio::test]
async fn on_with_duration_schedules_auto_off() {
    let h = harness(vec![manual_valve("mf-01", 3)]);
    let target = TargetRef::valve("mf-01", 3);
    let mut device = h.broker.device_subscribe("manifolds/mf-01/command");

    h.manager
        .enqueue(&target, CommandAction::On, Some(10))
        .await
        .expect("enqueue");
    assert_eq!(h.scheduler.pending_one_shots(), 1);
    device.try_recv().expect("on command");

    h.scheduler.advance(Duration::from_secs(10)).await;
    let message = device.try_recv().expect("auto-off command");
    let envelope: CommandEnvelope = serde_json::from_slice(&message.payload).expect("envelope");
    assert_eq!(envelope.action, "OFF");
    assert_eq!(envelope.issued_at, 10_000);

    let stored = h.targets.find_target(&target).await.expect("find").expect("target");
    assert_eq!(stored.current_status, TargetStatus::Off);
    assert_eq!(stored.cycle_count, 1);

    let offs = h
        .manager
        .list_commands(&CommandFilter {
            target_id: Some("mf-01".to_string()),
            ..CommandFilter::default()
        })
        .await
        .expect("list");
    assert_eq!(offs.len(), 2);
}

#[tokio::test]
async fn auto_off_skipped_when_target_switched_to_auto() {
    let h = harness(vec![manual_valve("mf-01", 4)]);
    let target = TargetRef::valve("mf-01", 4);
    h.manager
        .enqueue(&target, CommandAction::On, Some(5))
        .await
        .expect("enqueue");

    let mut current = h.targets.find_target(&target).await.expect("find").expect("target");
    current.mode = TargetMode::Auto;
    h.targets.upsert_target(current).await.expect("upsert");

    let mut device = h.broker.device_subscribe("manifolds/mf-01/command");
    h.scheduler.advance(Duration::from_secs(5)).await;
    assert!(device.try_recv().is_err());
    let stored = h.targets.find_target(&target).await.expect("find").expect("target");
    assert_eq!(stored.current_status, TargetStatus::On);
}

#[tokio::test]
async fn later_on_command_supersedes_earlier_auto_off() {
    let h = harness(vec![manual_valve("mf-01", 5)]);
    let target = TargetRef::valve("mf-01", 5);
    let mut device = h.broker.device_subscribe("manifolds/mf-01/command");

    h.manager
        .enqueue(&target, CommandAction::On, Some(600))
        .await
        .expect("first on");
    h.scheduler.advance(Duration::from_secs(300)).await;
    h.manager
        .enqueue(&target, CommandAction::On, Some(600))
        .await
        .expect("second on");
    device.try_recv().expect("first on published");
    device.try_recv().expect("second on published");

    h.scheduler.advance(Duration::from_secs(300)).await;
    assert!(device.try_recv().is_err());
    let stored = h.targets.find_target(&target).await.expect("find").expect("target");
    assert_eq!(stored.current_status, TargetStatus::On);

    h.scheduler.advance(Duration::from_secs(300)).await;
    let message = device.try_recv().expect("auto-off command");
    let envelope: CommandEnvelope = serde_json::from_slice(&message.payload).expect("envelope");
    assert_eq!(envelope.action, "OFF");
    assert_eq!(envelope.issued_at, 900_000);
    assert!(device.try_recv().is_err());
}
