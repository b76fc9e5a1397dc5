use domain::DeviceKey;
use fleet_presence::PresenceTracker;
use fleet_storage::InMemoryPresenceStore;
use std::sync::Arc;

fn tracker() -> PresenceTracker {
    PresenceTracker::new(Arc::new(InMemoryPresenceStore::new()), 15_000)
}

#[tokio::test]
async fn first_touch_emits_online_once() {
    let tracker = tracker();
    let key = DeviceKey::manifold("mf-01");
    let first = tracker.touch(&key, 0).await.expect("touch");
    assert!(first.expect("online edge").online);
    let second = tracker.touch(&key, 1_000).await.expect("touch");
    assert!(second.is_none());
}

#[tokio::test]
async fn sweep_flips_after_timeout_not_before() {
    let tracker = tracker();
    let key = DeviceKey::manifold("mf-01");
    tracker.touch(&key, 0).await.expect("touch");

    let early = tracker.sweep(14_000).await.expect("sweep");
    assert!(early.is_empty());
    assert!(tracker.get(&key).await.expect("get").expect("entry").is_online);

    let late = tracker.sweep(16_000).await.expect("sweep");
    assert_eq!(late.len(), 1);
    assert!(!late[0].online);
    assert_eq!(late[0].last_seen_ms, 0);

    let repeat = tracker.sweep(30_000).await.expect("sweep");
    assert!(repeat.is_empty());
}

#[tokio::test]
async fn touch_after_offline_emits_online_again() {
    let tracker = tracker();
    let key = DeviceKey::device("dev-1");
    tracker.touch(&key, 0).await.expect("touch");
    tracker.sweep(20_000).await.expect("sweep");

    let back = tracker.touch(&key, 21_000).await.expect("touch");
    assert!(back.expect("online edge").online);
    let entry = tracker.get(&key).await.expect("get").expect("entry");
    assert_eq!(entry.connected_since_ms, Some(0));
}

#[tokio::test]
async fn explicit_offline_is_edge_triggered() {
    let tracker = tracker();
    let key = DeviceKey::device("dev-2");
    assert!(tracker.set_offline(&key, 1).await.expect("offline").is_none());

    tracker.touch(&key, 1_000).await.expect("touch");
    let offline = tracker.set_offline(&key, 2_000).await.expect("offline");
    assert!(!offline.expect("offline edge").online);
    assert!(tracker.set_offline(&key, 3_000).await.expect("offline").is_none());
    assert!(tracker.sweep(60_000).await.expect("sweep").is_empty());
}

#[tokio::test]
async fn only_stale_keys_flip() {
    let tracker = tracker();
    let old = DeviceKey::gateway("gw-old");
    let fresh = DeviceKey::gateway("gw-fresh");
    tracker.touch(&old, 0).await.expect("touch");
    tracker.touch(&fresh, 10_000).await.expect("touch");

    let transitions = tracker.sweep(20_000).await.expect("sweep");
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].device_key, old);
    assert_eq!(tracker.list().await.expect("list").len(), 2);
}
