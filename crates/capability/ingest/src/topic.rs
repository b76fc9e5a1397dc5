//! topic 解析：`{domain}/{key}/{eventType...}`。

use crate::RouteError;
use domain::DownlinkStatus;

/// topic 的业务域。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicDomain {
    Manifolds,
    Devices,
    Lorawan,
}

impl TopicDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopicDomain::Manifolds => "manifolds",
            TopicDomain::Devices => "devices",
            TopicDomain::Lorawan => "lorawan",
        }
    }
}

/// 已识别的事件类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicEvent {
    Status,
    Ack,
    Heartbeat,
    Online,
    Data,
    Uplink,
    Join,
    Downlink(DownlinkStatus),
}

/// 解析后的 topic。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedTopic {
    pub topic: String,
    pub domain: TopicDomain,
    pub key: String,
    /// 原始事件段（多段以 `/` 连接）。
    pub event_type: String,
    /// 未知事件类型为 None，调用方忽略即可。
    pub event: Option<TopicEvent>,
    /// TTN v3 topic 中携带的应用 ID。
    pub application_id: Option<String>,
}

fn classify(domain: TopicDomain, event_type: &str) -> Option<TopicEvent> {
    match (domain, event_type) {
        (TopicDomain::Manifolds, "status") => Some(TopicEvent::Status),
        (TopicDomain::Manifolds, "ack") => Some(TopicEvent::Ack),
        (TopicDomain::Manifolds, "heartbeat") => Some(TopicEvent::Heartbeat),
        (TopicDomain::Manifolds, "online") => Some(TopicEvent::Online),
        (TopicDomain::Devices, "data") => Some(TopicEvent::Data),
        (TopicDomain::Devices, "online") => Some(TopicEvent::Online),
        (TopicDomain::Devices, "ack") => Some(TopicEvent::Ack),
        (TopicDomain::Lorawan, "up") => Some(TopicEvent::Uplink),
        (TopicDomain::Lorawan, "join") => Some(TopicEvent::Join),
        (TopicDomain::Lorawan, "down/queued") => {
            Some(TopicEvent::Downlink(DownlinkStatus::Scheduled))
        }
        (TopicDomain::Lorawan, "down/sent") => Some(TopicEvent::Downlink(DownlinkStatus::Sent)),
        (TopicDomain::Lorawan, "down/ack") => {
            Some(TopicEvent::Downlink(DownlinkStatus::Acknowledged))
        }
        (TopicDomain::Lorawan, "down/failed") | (TopicDomain::Lorawan, "down/nack") => {
            Some(TopicEvent::Downlink(DownlinkStatus::Failed))
        }
        _ => None,
    }
}

/// 解析 topic。无法识别的域或缺少 key / 事件段时返回 `Unroutable`。
pub fn parse_topic(topic: &str) -> Result<RoutedTopic, RouteError> {
    let unroutable = || RouteError::Unroutable(topic.to_string());
    let parts: Vec<&str> = topic.trim_matches('/').split('/').collect();
    if parts.iter().any(|part| part.is_empty()) {
        return Err(unroutable());
    }

    // v3/{appId}@{tenant}/devices/{deviceId}/{event...}
    if parts.first() == Some(&"v3") {
        if parts.len() < 5 || parts[2] != "devices" {
            return Err(unroutable());
        }
        let application_id = parts[1]
            .split_once('@')
            .map(|(app, _)| app)
            .unwrap_or(parts[1]);
        let event_type = parts[4..].join("/");
        return Ok(RoutedTopic {
            topic: topic.to_string(),
            domain: TopicDomain::Lorawan,
            key: parts[3].to_string(),
            event: classify(TopicDomain::Lorawan, &event_type),
            event_type,
            application_id: Some(application_id.to_string()),
        });
    }

    if parts.len() < 3 {
        return Err(unroutable());
    }
    let domain = match parts[0] {
        "manifolds" => TopicDomain::Manifolds,
        "devices" => TopicDomain::Devices,
        "lorawan" => TopicDomain::Lorawan,
        _ => return Err(unroutable()),
    };
    let event_type = parts[2..].join("/");
    Ok(RoutedTopic {
        topic: topic.to_string(),
        domain,
        key: parts[1].to_string(),
        event: classify(domain, &event_type),
        event_type,
        application_id: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_native_topics() {
        let routed = parse_topic("manifolds/mf-01/status").expect("topic");
        assert_eq!(routed.domain, TopicDomain::Manifolds);
        assert_eq!(routed.key, "mf-01");
        assert_eq!(routed.event, Some(TopicEvent::Status));

        let down = parse_topic("lorawan/70b3/down/ack").expect("topic");
        assert_eq!(
            down.event,
            Some(TopicEvent::Downlink(DownlinkStatus::Acknowledged))
        );
    }

    #[test]
    fn parses_ttn_v3_topics() {
        let routed = parse_topic("v3/orchard@ttn/devices/node-7/up").expect("topic");
        assert_eq!(routed.domain, TopicDomain::Lorawan);
        assert_eq!(routed.key, "node-7");
        assert_eq!(routed.application_id.as_deref(), Some("orchard"));
        assert_eq!(routed.event, Some(TopicEvent::Uplink));

        let queued = parse_topic("v3/orchard@ttn/devices/node-7/down/queued").expect("topic");
        assert_eq!(
            queued.event,
            Some(TopicEvent::Downlink(DownlinkStatus::Scheduled))
        );
    }

    #[test]
    fn unknown_event_type_is_routable_but_unclassified() {
        let routed = parse_topic("manifolds/mf-01/firmware").expect("topic");
        assert_eq!(routed.event, None);
        let push = parse_topic("lorawan/70b3/down/push").expect("topic");
        assert_eq!(push.event, None);
    }

    #[test]
    fn rejects_unroutable_topics() {
        for topic in ["pumps/p1/status", "manifolds/mf-01", "manifolds//status", "v3/app/x/y/up"] {
            assert!(matches!(parse_topic(topic), Err(RouteError::Unroutable(_))), "{topic}");
        }
    }
}
