use api_contract::RealtimeEvent;
use domain::{AlarmRule, AlarmSeverity, CompareOperator, ControlTarget, TargetRef, TargetStatus};
use fleet_alarm::{AlarmEvaluator, Observation};
use fleet_realtime::{RealtimeChannel, RealtimeHub};
use fleet_storage::InMemoryAlarmStore;
use std::sync::Arc;

fn valve_with_rules(rules: Vec<AlarmRule>) -> ControlTarget {
    let mut target = ControlTarget::placeholder(TargetRef::valve("mf-01", 1));
    target.alarm_rules = rules;
    target
}

fn evaluator() -> (AlarmEvaluator, RealtimeHub) {
    let hub = RealtimeHub::new();
    let evaluator = AlarmEvaluator::new(Arc::new(InMemoryAlarmStore::new()), hub.clone());
    (evaluator, hub)
}

#[tokio::test]
async fn fault_status_raises_critical_alarm_once() {
    let (evaluator, hub) = evaluator();
    let target = valve_with_rules(vec![AlarmRule::on_status(TargetStatus::Fault)]);
    let mut events = hub.subscribe(&RealtimeChannel::Manifold("mf-01".to_string()));

    let first = evaluator
        .evaluate(&target, &Observation::status(TargetStatus::Fault, 1_000))
        .await
        .expect("evaluate");
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].severity, AlarmSeverity::Critical);

    let second = evaluator
        .evaluate(&target, &Observation::status(TargetStatus::Fault, 2_000))
        .await
        .expect("evaluate");
    assert!(second.is_empty());

    let alarms = evaluator.list(&target.target).await.expect("list");
    assert_eq!(alarms.len(), 1);

    let event = events.try_recv().expect("alarm event");
    match event.as_ref() {
        RealtimeEvent::AlarmRaised { severity, target_index, .. } => {
            assert_eq!(severity, "CRITICAL");
            assert_eq!(*target_index, 1);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn acknowledged_alarm_can_be_raised_again() {
    let (evaluator, _hub) = evaluator();
    let target = valve_with_rules(vec![AlarmRule::on_status(TargetStatus::Fault)]);
    let fault = Observation::status(TargetStatus::Fault, 1_000);

    let raised = evaluator.evaluate(&target, &fault).await.expect("evaluate");
    assert!(
        evaluator
            .acknowledge(&target.target, &raised[0].alarm_id)
            .await
            .expect("ack")
    );

    let again = evaluator.evaluate(&target, &fault).await.expect("evaluate");
    assert_eq!(again.len(), 1);
    assert_ne!(again[0].alarm_id, raised[0].alarm_id);
    assert_eq!(evaluator.list(&target.target).await.expect("list").len(), 2);
}

#[tokio::test]
async fn threshold_rule_uses_warning_severity_and_respects_notify() {
    let (evaluator, hub) = evaluator();
    let mut rule = AlarmRule::on_threshold("pressure", CompareOperator::Gte, 6.0);
    rule.notify = false;
    let target = valve_with_rules(vec![rule]);
    let mut events = hub.subscribe(&RealtimeChannel::Manifold("mf-01".to_string()));

    let mut observation = Observation::status(TargetStatus::On, 5_000);
    observation.metrics.insert("pressure".to_string(), 6.5);
    let raised = evaluator.evaluate(&target, &observation).await.expect("evaluate");
    assert_eq!(raised.len(), 1);
    assert_eq!(raised[0].severity, AlarmSeverity::Warning);
    assert_eq!(raised[0].message, "manifold mf-01 #1 pressure >= 6");
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn non_matching_status_raises_nothing() {
    let (evaluator, _hub) = evaluator();
    let target = valve_with_rules(vec![AlarmRule::on_status(TargetStatus::Fault)]);
    let raised = evaluator
        .evaluate(&target, &Observation::status(TargetStatus::On, 0))
        .await
        .expect("evaluate");
    assert!(raised.is_empty());
}
