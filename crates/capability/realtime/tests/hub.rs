use fleet_realtime::{RealtimeChannel, RealtimeEvent, RealtimeHub};

fn online(manifold_id: &str) -> RealtimeEvent {
    RealtimeEvent::ManifoldOnline {
        manifold_id: manifold_id.to_string(),
        online: true,
        last_seen: 1_000,
    }
}

#[tokio::test]
async fn events_only_reach_their_channel() {
    let hub = RealtimeHub::new();
    let mut first = hub.subscribe(&RealtimeChannel::Manifold("mf-01".to_string()));
    let mut second = hub.subscribe(&RealtimeChannel::Manifold("mf-02".to_string()));

    let delivered = hub.publish(&RealtimeChannel::Manifold("mf-01".to_string()), online("mf-01"));
    assert_eq!(delivered, 1);

    let event = first.recv().await.expect("event");
    assert_eq!(event.event_type(), "manifoldOnline");
    assert!(second.try_recv().is_err());
}

#[tokio::test]
async fn publish_without_subscribers_is_dropped() {
    let hub = RealtimeHub::new();
    let delivered = hub.publish(&RealtimeChannel::Gateways, online("mf-01"));
    assert_eq!(delivered, 0);
    assert_eq!(hub.active_channels(), 0);
}

#[tokio::test]
async fn channel_is_pruned_after_last_subscriber_drops() {
    let hub = RealtimeHub::new();
    let channel = RealtimeChannel::Device("d-1".to_string());
    let first = hub.subscribe(&channel);
    let mut second = hub.subscribe(&channel);
    assert_eq!(hub.channel_count(), 1);

    drop(first);
    assert_eq!(hub.publish(&channel, online("mf-01")), 1);
    assert!(second.try_recv().is_ok());
    assert_eq!(hub.channel_count(), 1);

    drop(second);
    assert_eq!(hub.publish(&channel, online("mf-01")), 0);
    assert_eq!(hub.channel_count(), 0);

    let mut again = hub.subscribe(&channel);
    assert_eq!(hub.publish(&channel, online("mf-01")), 1);
    assert!(again.try_recv().is_ok());
}

#[test]
fn channel_keys_parse_back() {
    for key in ["manifold:mf-01", "device:d-1", "lorawan:app-1", "gateways"] {
        let channel = RealtimeChannel::parse(key).expect("channel");
        assert_eq!(channel.key(), key);
    }
    assert!(RealtimeChannel::parse("valve:1").is_none());
    assert!(RealtimeChannel::parse("device:").is_none());
}

#[test]
fn targets_map_to_owner_channel() {
    let valve = RealtimeChannel::for_target(&domain::TargetRef::valve("mf-01", 3));
    assert_eq!(valve.key(), "manifold:mf-01");
    let pump = RealtimeChannel::for_target(&domain::TargetRef::device("pump-7"));
    assert_eq!(pump.key(), "device:pump-7");
}
