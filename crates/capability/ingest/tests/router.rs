use api_contract::RealtimeEvent;
use domain::{
    AlarmRule, CommandAction, CommandStatus, ControlTarget, DeviceKey, DownlinkStatus, TargetMode,
    TargetRef, TargetStatus,
};
use fleet_alarm::AlarmEvaluator;
use fleet_control::{CommandQueueConfig, CommandQueueManager};
use fleet_ingest::{IngestDeps, RouteError, RouteOutcome, Router};
use fleet_lorawan::{
    DownlinkCorrelationTracker, DownlinkRequest, DownlinkService, GatewayMetricsAggregator,
};
use fleet_presence::PresenceTracker;
use fleet_realtime::{RealtimeChannel, RealtimeHub};
use fleet_scheduler::ManualScheduler;
use fleet_storage::{
    AlarmStore, GatewayMetricsStore, InMemoryAlarmStore, InMemoryCommandStore,
    InMemoryDownlinkStore, InMemoryGatewayMetricsStore, InMemoryPresenceStore, InMemoryTargetStore,
    InMemoryUplinkStore, TargetStore, UplinkStore,
};
use fleet_transport::{EmbeddedBroker, QoS};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    router: Router,
    commands: CommandQueueManager,
    downlink_service: DownlinkService,
    downlinks: DownlinkCorrelationTracker,
    presence: PresenceTracker,
    targets: Arc<InMemoryTargetStore>,
    alarms: Arc<InMemoryAlarmStore>,
    uplinks: Arc<InMemoryUplinkStore>,
    gateway_store: Arc<InMemoryGatewayMetricsStore>,
    scheduler: Arc<ManualScheduler>,
    hub: RealtimeHub,
}

fn harness(targets: Vec<ControlTarget>) -> Harness {
    let hub = RealtimeHub::new();
    let scheduler = Arc::new(ManualScheduler::new(0));
    let (broker, _inbound) = EmbeddedBroker::new(16);
    let targets = Arc::new(InMemoryTargetStore::with_targets(targets));
    let alarms = Arc::new(InMemoryAlarmStore::new());
    let uplinks = Arc::new(InMemoryUplinkStore::new());
    let gateway_store = Arc::new(InMemoryGatewayMetricsStore::new());
    let downlink_store = Arc::new(InMemoryDownlinkStore::new());

    let presence = PresenceTracker::new(Arc::new(InMemoryPresenceStore::new()), 15_000);
    let commands = CommandQueueManager::new(
        Arc::new(InMemoryCommandStore::new()),
        targets.clone(),
        broker.clone(),
        scheduler.clone(),
        hub.clone(),
        CommandQueueConfig::default(),
    );
    let downlinks = DownlinkCorrelationTracker::new(downlink_store.clone(), hub.clone());
    let downlink_service = DownlinkService::new(
        downlink_store,
        broker,
        scheduler.clone(),
        downlinks.clone(),
        QoS::AtLeastOnce,
    );
    let router = Router::new(IngestDeps {
        presence: presence.clone(),
        commands: commands.clone(),
        targets: targets.clone(),
        alarms: AlarmEvaluator::new(alarms.clone(), hub.clone()),
        uplinks: uplinks.clone(),
        gateways: GatewayMetricsAggregator::new(gateway_store.clone(), hub.clone()),
        downlinks: downlinks.clone(),
        hub: hub.clone(),
        scheduler: scheduler.clone(),
    });
    Harness {
        router,
        commands,
        downlink_service,
        downlinks,
        presence,
        targets,
        alarms,
        uplinks,
        gateway_store,
        scheduler,
        hub,
    }
}

fn drain(receiver: &mut tokio::sync::broadcast::Receiver<Arc<RealtimeEvent>>) -> Vec<&'static str> {
    std::iter::from_fn(|| receiver.try_recv().ok())
        .map(|event| event.event_type())
        .collect()
}

#[tokio::test]
async fn unroutable_and_malformed_messages_are_errors() {
    let h = harness(Vec::new());
    let unroutable = h.router.route("pumps/p-1/status", b"{}").await;
    assert!(matches!(unroutable, Err(RouteError::Unroutable(_))));

    let malformed = h.router.route("manifolds/mf-01/status", b"{not json").await;
    assert!(matches!(malformed, Err(RouteError::Parse { .. })));
    assert!(
        h.presence
            .get(&DeviceKey::manifold("mf-01"))
            .await
            .expect("get")
            .is_none()
    );
}

#[tokio::test]
async fn unknown_event_type_is_ignored() {
    let h = harness(Vec::new());
    let outcome = h
        .router
        .route("manifolds/mf-01/firmware", b"{\"version\": 3}")
        .await
        .expect("route");
    assert_eq!(outcome, RouteOutcome::Ignored);
}

#[tokio::test]
async fn status_for_unknown_manifold_creates_placeholder_and_raises_alarm() {
    let mut known = ControlTarget::placeholder(TargetRef::valve("mf-01", 1));
    known.alarm_rules = vec![AlarmRule::on_status(TargetStatus::Fault)];
    let h = harness(vec![known]);
    let mut events = h.hub.subscribe(&RealtimeChannel::Manifold("mf-01".to_string()));

    let payload = br#"{"valves": [{"valve": 1, "status": "FAULT"}, {"valve": 2, "status": "ON", "pressure": 4.2}]}"#;
    let outcome = h
        .router
        .route("manifolds/mf-01/status", payload)
        .await
        .expect("route");
    assert_eq!(outcome, RouteOutcome::Handled);

    let placeholder = h
        .targets
        .find_target(&TargetRef::valve("mf-01", 2))
        .await
        .expect("find")
        .expect("placeholder");
    assert_eq!(placeholder.mode, TargetMode::Manual);
    assert_eq!(placeholder.current_status, TargetStatus::On);

    let alarms = h
        .alarms
        .list_alarms(&TargetRef::valve("mf-01", 1))
        .await
        .expect("alarms");
    assert_eq!(alarms.len(), 1);

    assert_eq!(
        drain(&mut events),
        vec!["manifoldOnline", "alarmRaised", "manifoldStatus"]
    );
    assert!(
        h.presence
            .get(&DeviceKey::manifold("mf-01"))
            .await
            .expect("get")
            .expect("presence")
            .is_online
    );
}

#[tokio::test]
async fn ack_acknowledges_known_command_and_ignores_unknown() {
    let mut valve = ControlTarget::placeholder(TargetRef::valve("mf-01", 1));
    valve.current_status = TargetStatus::Off;
    let h = harness(vec![valve]);
    let command = h
        .commands
        .enqueue(&TargetRef::valve("mf-01", 1), CommandAction::On, None)
        .await
        .expect("enqueue");

    h.scheduler.advance(Duration::from_secs(2)).await;
    let body = format!("{{\"commandId\": \"{}\"}}", command.command_id);
    let outcome = h
        .router
        .route("manifolds/mf-01/ack", body.as_bytes())
        .await
        .expect("route");
    assert_eq!(outcome, RouteOutcome::Handled);
    let stored = h
        .commands
        .get_command(&command.command_id)
        .await
        .expect("get")
        .expect("command");
    assert_eq!(stored.status, CommandStatus::Acknowledged);
    assert_eq!(stored.acknowledged_at_ms, Some(2_000));

    let unknown = h
        .router
        .route("manifolds/mf-01/ack", br#"{"command_id": "nope"}"#)
        .await
        .expect("route");
    assert_eq!(unknown, RouteOutcome::Ignored);
}

#[tokio::test]
async fn ttn_uplink_records_gateways_and_broadcasts() {
    let h = harness(Vec::new());
    let mut lorawan = h.hub.subscribe(&RealtimeChannel::Lorawan("orchard".to_string()));
    let mut gateways = h.hub.subscribe(&RealtimeChannel::Gateways);
    let payload = br#"{
        "end_device_ids": {"device_id": "node-7"},
        "uplink_message": {
            "f_port": 2,
            "f_cnt": 9,
            "frm_payload": "AQI=",
            "decoded_payload": {"moisture": 31},
            "rx_metadata": [
                {"gateway_ids": {"gateway_id": "gw-1"}, "rssi": -80, "snr": 7.5},
                {"gateway_ids": {"gateway_id": "gw-2"}, "rssi": -95, "snr": 2.0}
            ],
            "settings": {"frequency": "868100000", "data_rate": {"lora": {"spreading_factor": 9, "bandwidth": 125000}}}
        }
    }"#;
    let outcome = h
        .router
        .route("v3/orchard@ttn/devices/node-7/up", payload)
        .await
        .expect("route");
    assert_eq!(outcome, RouteOutcome::Handled);

    let stored = h.uplinks.list_uplinks("node-7", 10).await.expect("uplinks");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].rssi, Some(-80.0));
    assert_eq!(stored[0].spreading_factor, Some(9));

    let gw = h
        .gateway_store
        .find_gateway_metrics("gw-2")
        .await
        .expect("find")
        .expect("metrics");
    assert_eq!(gw.total_seen, 1);
    assert_eq!(gw.avg_rssi, -95.0);
    assert!(
        h.presence
            .get(&DeviceKey::gateway("gw-1"))
            .await
            .expect("get")
            .expect("presence")
            .is_online
    );

    assert_eq!(drain(&mut lorawan), vec!["uplink"]);
    assert_eq!(drain(&mut gateways), vec!["gatewayUpdate", "gatewayUpdate"]);
}

#[tokio::test]
async fn chirpstack_v3_uplink_records_every_gateway() {
    let h = harness(Vec::new());
    let mut lorawan = h.hub.subscribe(&RealtimeChannel::Lorawan("7".to_string()));
    let payload = br#"{
        "applicationID": "7",
        "applicationName": "orchard",
        "deviceName": "soil-probe-3",
        "devEUI": "70b3d57ed0041234",
        "rxInfo": [
            {
                "gatewayID": "gw-1",
                "uplinkID": "0f5e1c2a-7c1e-4b7d-9a55-3f0f6f1d2e11",
                "name": "barn",
                "rssi": -97,
                "loRaSNR": 4.5,
                "location": {"latitude": 52.1, "longitude": 5.2, "altitude": 3}
            },
            {
                "gatewayID": "gw-2",
                "uplinkID": "4c8b9d1e-2f3a-4b5c-8d7e-6f5a4b3c2d1e",
                "name": "pump-house",
                "rssi": -80,
                "loRaSNR": 9.0
            }
        ],
        "txInfo": {
            "frequency": 868100000,
            "modulation": "LORA",
            "loRaModulationInfo": {
                "bandwidth": 125,
                "spreadingFactor": 7,
                "codeRate": "4/5",
                "polarizationInversion": false
            }
        },
        "adr": true,
        "dr": 5,
        "fCnt": 41,
        "fPort": 2,
        "data": "AQI=",
        "object": {"moisture": 31},
        "tags": {}
    }"#;
    h.scheduler.advance(Duration::from_secs(1)).await;
    let outcome = h
        .router
        .route("lorawan/70b3d57ed0041234/up", payload)
        .await
        .expect("route");
    assert_eq!(outcome, RouteOutcome::Handled);

    let stored = h
        .uplinks
        .list_uplinks("70b3d57ed0041234", 10)
        .await
        .expect("uplinks");
    assert_eq!(stored.len(), 1);
    let record = &stored[0];
    assert_eq!(record.application_id, "7");
    assert_eq!(record.f_cnt, Some(41));
    assert_eq!(record.f_port, Some(2));
    assert_eq!(record.rssi, Some(-80.0));
    assert_eq!(record.snr, Some(9.0));
    assert_eq!(record.spreading_factor, Some(7));
    assert_eq!(record.bandwidth, Some(125));
    assert_eq!(record.frequency, Some(868_100_000));
    assert_eq!(record.gateways.len(), 2);

    for (gateway, rssi, snr) in [("gw-1", -97.0, 4.5), ("gw-2", -80.0, 9.0)] {
        let metrics = h
            .gateway_store
            .find_gateway_metrics(gateway)
            .await
            .expect("find")
            .expect("metrics");
        assert_eq!(metrics.total_seen, 1);
        assert_eq!(metrics.avg_rssi, rssi);
        assert_eq!(metrics.last_snr, snr);
        assert!(metrics.is_online);
        assert_eq!(metrics.last_seen_ms, 1_000);

        let presence = h
            .presence
            .get(&DeviceKey::gateway(gateway))
            .await
            .expect("get")
            .expect("presence");
        assert!(presence.is_online);
    }
    assert!(
        h.presence
            .get(&DeviceKey::lorawan("70b3d57ed0041234"))
            .await
            .expect("get")
            .expect("presence")
            .is_online
    );
    assert_eq!(drain(&mut lorawan), vec!["uplink"]);
}

#[tokio::test]
async fn downlink_events_only_move_forward() {
    let h = harness(Vec::new());
    let record = h
        .downlink_service
        .send(DownlinkRequest {
            dev_eui: "70b3".to_string(),
            application_id: "orchard".to_string(),
            f_port: 5,
            payload: "AA==".to_string(),
            confirmed: false,
        })
        .await
        .expect("send");
    let body = format!("{{\"correlationIds\": [\"{}\"]}}", record.correlation_id);

    for (topic, expected) in [
        ("lorawan/70b3/down/sent", RouteOutcome::Handled),
        ("lorawan/70b3/down/ack", RouteOutcome::Handled),
        ("lorawan/70b3/down/sent", RouteOutcome::Ignored),
    ] {
        let outcome = h.router.route(topic, body.as_bytes()).await.expect("route");
        assert_eq!(outcome, expected, "{topic}");
    }

    let unknown = h
        .router
        .route("lorawan/70b3/down/ack", br#"{"correlationIds": ["other"]}"#)
        .await
        .expect("route");
    assert_eq!(unknown, RouteOutcome::Ignored);

    let stored = h
        .downlinks
        .get(&record.correlation_id)
        .await
        .expect("get")
        .expect("record");
    assert_eq!(stored.status, DownlinkStatus::Acknowledged);
}

#[tokio::test]
async fn presence_sweep_flips_silent_devices_and_gateways() {
    let h = harness(Vec::new());
    let mut manifold = h.hub.subscribe(&RealtimeChannel::Manifold("mf-01".to_string()));
    h.router
        .route("manifolds/mf-01/heartbeat", b"")
        .await
        .expect("route");
    h.gateway_store
        .record_sample("gw-1", -80.0, 5.0, 0)
        .await
        .expect("sample");
    h.presence
        .touch(&DeviceKey::gateway("gw-1"), 0)
        .await
        .expect("touch");

    h.scheduler.advance(Duration::from_secs(14)).await;
    assert_eq!(h.router.sweep_presence().await, 0);

    h.scheduler.advance(Duration::from_secs(2)).await;
    assert_eq!(h.router.sweep_presence().await, 2);

    assert_eq!(drain(&mut manifold), vec!["manifoldOnline", "manifoldOnline"]);
    let gw = h
        .gateway_store
        .find_gateway_metrics("gw-1")
        .await
        .expect("find")
        .expect("metrics");
    assert!(!gw.is_online);
}

#[tokio::test]
async fn reported_offline_emits_device_status() {
    let h = harness(Vec::new());
    let mut device = h.hub.subscribe(&RealtimeChannel::Device("pump-7".to_string()));
    h.router
        .route("devices/pump-7/online", br#"{"online": true}"#)
        .await
        .expect("route");
    h.router
        .route("devices/pump-7/online", br#"{"isOnline": false}"#)
        .await
        .expect("route");

    let events: Vec<bool> = std::iter::from_fn(|| device.try_recv().ok())
        .filter_map(|event| match event.as_ref() {
            RealtimeEvent::DeviceStatus { online, .. } => Some(*online),
            _ => None,
        })
        .collect();
    assert_eq!(events, vec![true, false]);
}
