//! MQTT topic 通配符匹配与命名空间处理。

/// 判断 `topic` 是否匹配订阅 `pattern`（支持 `+` 单层与 `#` 多层通配）。
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let mut pattern_levels = pattern.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (pattern_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(expected), Some(actual)) if expected == actual => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// 为 topic 加上命名空间前缀。
pub fn apply_namespace(namespace: Option<&str>, topic: &str) -> String {
    match namespace.map(|value| value.trim_matches('/')) {
        Some(prefix) if !prefix.is_empty() => format!("{}/{}", prefix, topic),
        _ => topic.to_string(),
    }
}

/// 去掉入站 topic 的命名空间前缀；不带前缀的 topic 原样返回。
pub fn strip_namespace(namespace: Option<&str>, topic: &str) -> String {
    match namespace.map(|value| value.trim_matches('/')) {
        Some(prefix) if !prefix.is_empty() => topic
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(topic)
            .to_string(),
        _ => topic.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcards_match_levels() {
        assert!(topic_matches("manifolds/#", "manifolds/mf-01/status"));
        assert!(topic_matches("manifolds/+/status", "manifolds/mf-01/status"));
        assert!(!topic_matches("manifolds/+/status", "manifolds/mf-01/ack"));
        assert!(!topic_matches("manifolds/+", "manifolds/mf-01/status"));
        assert!(topic_matches("lorawan/+/down/#", "lorawan/dev/down/ack"));
        assert!(topic_matches("#", "anything/at/all"));
        assert!(!topic_matches("devices/#", "manifolds/mf-01/status"));
    }

    #[test]
    fn namespace_round_trip() {
        let topic = apply_namespace(Some("thing-7/"), "manifolds/mf-01/command");
        assert_eq!(topic, "thing-7/manifolds/mf-01/command");
        assert_eq!(
            strip_namespace(Some("thing-7"), &topic),
            "manifolds/mf-01/command"
        );
        assert_eq!(strip_namespace(Some("thing-7"), "devices/d1/data"), "devices/d1/data");
        assert_eq!(apply_namespace(None, "devices/d1/data"), "devices/d1/data");
    }
}
