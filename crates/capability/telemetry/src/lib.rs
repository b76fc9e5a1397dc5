//! 追踪初始化与进程级计数指标。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 基础指标快照。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub messages_received: u64,
    pub parse_failures: u64,
    pub unroutable_topics: u64,
    pub ignored_events: u64,
    pub handler_failures: u64,
    pub commands_enqueued: u64,
    pub commands_rejected: u64,
    pub command_publish_success: u64,
    pub command_publish_failure: u64,
    pub commands_acknowledged: u64,
    pub commands_expired: u64,
    pub presence_online: u64,
    pub presence_offline: u64,
    pub uplinks_recorded: u64,
    pub downlink_transitions_applied: u64,
    pub downlink_transitions_ignored: u64,
    pub alarms_raised: u64,
}

/// 基础指标。
pub struct TelemetryMetrics {
    messages_received: AtomicU64,
    parse_failures: AtomicU64,
    unroutable_topics: AtomicU64,
    ignored_events: AtomicU64,
    handler_failures: AtomicU64,
    commands_enqueued: AtomicU64,
    commands_rejected: AtomicU64,
    command_publish_success: AtomicU64,
    command_publish_failure: AtomicU64,
    commands_acknowledged: AtomicU64,
    commands_expired: AtomicU64,
    presence_online: AtomicU64,
    presence_offline: AtomicU64,
    uplinks_recorded: AtomicU64,
    downlink_transitions_applied: AtomicU64,
    downlink_transitions_ignored: AtomicU64,
    alarms_raised: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            parse_failures: AtomicU64::new(0),
            unroutable_topics: AtomicU64::new(0),
            ignored_events: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
            commands_enqueued: AtomicU64::new(0),
            commands_rejected: AtomicU64::new(0),
            command_publish_success: AtomicU64::new(0),
            command_publish_failure: AtomicU64::new(0),
            commands_acknowledged: AtomicU64::new(0),
            commands_expired: AtomicU64::new(0),
            presence_online: AtomicU64::new(0),
            presence_offline: AtomicU64::new(0),
            uplinks_recorded: AtomicU64::new(0),
            downlink_transitions_applied: AtomicU64::new(0),
            downlink_transitions_ignored: AtomicU64::new(0),
            alarms_raised: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            unroutable_topics: self.unroutable_topics.load(Ordering::Relaxed),
            ignored_events: self.ignored_events.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            commands_enqueued: self.commands_enqueued.load(Ordering::Relaxed),
            commands_rejected: self.commands_rejected.load(Ordering::Relaxed),
            command_publish_success: self.command_publish_success.load(Ordering::Relaxed),
            command_publish_failure: self.command_publish_failure.load(Ordering::Relaxed),
            commands_acknowledged: self.commands_acknowledged.load(Ordering::Relaxed),
            commands_expired: self.commands_expired.load(Ordering::Relaxed),
            presence_online: self.presence_online.load(Ordering::Relaxed),
            presence_offline: self.presence_offline.load(Ordering::Relaxed),
            uplinks_recorded: self.uplinks_recorded.load(Ordering::Relaxed),
            downlink_transitions_applied: self
                .downlink_transitions_applied
                .load(Ordering::Relaxed),
            downlink_transitions_ignored: self
                .downlink_transitions_ignored
                .load(Ordering::Relaxed),
            alarms_raised: self.alarms_raised.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 为每条入站消息生成 trace_id。
pub fn new_trace_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 记录入站消息次数。
pub fn record_message_received() {
    metrics().messages_received.fetch_add(1, Ordering::Relaxed);
}

/// 记录报文解析失败（丢弃，不重试）。
pub fn record_parse_failure() {
    metrics().parse_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录无法路由的 topic。
pub fn record_unroutable_topic() {
    metrics().unroutable_topics.fetch_add(1, Ordering::Relaxed);
}

/// 记录被忽略的事件（未知 eventType、未知关联 ID 等）。
pub fn record_ignored_event() {
    metrics().ignored_events.fetch_add(1, Ordering::Relaxed);
}

/// 记录处理器内部失败（存储错误等，已记录日志）。
pub fn record_handler_failure() {
    metrics().handler_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录命令入队次数。
pub fn record_command_enqueued() {
    metrics().commands_enqueued.fetch_add(1, Ordering::Relaxed);
}

/// 记录因模式不符被拒绝的命令。
pub fn record_command_rejected() {
    metrics().commands_rejected.fetch_add(1, Ordering::Relaxed);
}

/// 记录命令发布成功次数。
pub fn record_command_publish_success() {
    metrics()
        .command_publish_success
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录命令发布失败次数。
pub fn record_command_publish_failure() {
    metrics()
        .command_publish_failure
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录命令回执次数。
pub fn record_command_acknowledged() {
    metrics()
        .commands_acknowledged
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录过期命令数量。
pub fn record_commands_expired(count: u64) {
    metrics().commands_expired.fetch_add(count, Ordering::Relaxed);
}

/// 记录在线 / 离线边沿。
pub fn record_presence_transition(online: bool) {
    if online {
        metrics().presence_online.fetch_add(1, Ordering::Relaxed);
    } else {
        metrics().presence_offline.fetch_add(1, Ordering::Relaxed);
    }
}

/// 记录上行写入次数。
pub fn record_uplink_recorded() {
    metrics().uplinks_recorded.fetch_add(1, Ordering::Relaxed);
}

/// 记录下行状态流转结果。
pub fn record_downlink_transition(applied: bool) {
    if applied {
        metrics()
            .downlink_transitions_applied
            .fetch_add(1, Ordering::Relaxed);
    } else {
        metrics()
            .downlink_transitions_ignored
            .fetch_add(1, Ordering::Relaxed);
    }
}

/// 记录新告警次数。
pub fn record_alarm_raised() {
    metrics().alarms_raised.fetch_add(1, Ordering::Relaxed);
}
