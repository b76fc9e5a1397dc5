use domain::{DeviceKey, DeviceKind, GatewayMetrics, GatewayReception, UplinkRecord};

#[test]
fn gateway_running_average() {
    let first = GatewayMetrics::first_sample("gw-1", -80.0, 5.0, 1_000);
    assert_eq!(first.total_seen, 1);
    assert_eq!(first.avg_rssi, -80.0);

    let second = first.with_sample(-90.0, 7.0, 2_000);
    assert_eq!(second.total_seen, 2);
    assert_eq!(second.avg_rssi, -85.0);
    assert_eq!(second.avg_snr, 6.0);

    let third = second.with_sample(-70.0, 9.0, 3_000);
    assert_eq!(third.total_seen, 3);
    assert_eq!(third.avg_rssi, -80.0);
    assert_eq!(third.last_rssi, -70.0);
    assert_eq!(third.last_seen_ms, 3_000);
}

#[test]
fn strongest_gateway_by_rssi() {
    let uplink = UplinkRecord {
        device_key: "dev-1".to_string(),
        application_id: "app-1".to_string(),
        f_port: Some(1),
        f_cnt: Some(7),
        raw_payload: "AQI=".to_string(),
        decoded_payload: None,
        rssi: None,
        snr: None,
        spreading_factor: Some(7),
        bandwidth: Some(125_000),
        frequency: Some(868_100_000),
        gateways: vec![
            GatewayReception {
                gateway_id: "gw-a".to_string(),
                rssi: -101.0,
                snr: -3.5,
            },
            GatewayReception {
                gateway_id: "gw-b".to_string(),
                rssi: -87.0,
                snr: 6.0,
            },
        ],
        received_at_ms: 10,
    };
    let best = uplink.strongest_gateway().expect("gateway");
    assert_eq!(best.gateway_id, "gw-b");
}

#[test]
fn device_key_round_trips_display() {
    let key = DeviceKey::parse("gateway:gw-1").expect("parse");
    assert_eq!(key.kind, DeviceKind::Gateway);
    assert_eq!(key.to_string(), "gateway:gw-1");
    assert!(DeviceKey::parse("unknown:x").is_none());
    assert!(DeviceKey::parse("device:").is_none());
}
