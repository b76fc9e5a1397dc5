//! 稳定的对外契约：实时推送事件与下行报文信封。
//!
//! 字段统一 camelCase；实时事件以 `type` 字段区分。

use serde::{Deserialize, Serialize};

/// 发布到 `{manifolds|devices}/{targetId}/command` 的命令报文。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope {
    pub command_id: String,
    pub target_index: u32,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub duration_secs: Option<u64>,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// 发布到 `lorawan/{devEui}/down/push` 的下行报文。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownlinkPushEnvelope {
    pub correlation_ids: Vec<String>,
    pub f_port: u32,
    /// base64 编码的原始负载。
    pub payload: String,
    pub confirmed: bool,
}

/// 单个阀门的状态。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValveStatusDto {
    pub valve: u32,
    pub status: String,
    pub cycle_count: u64,
}

/// 推送给 UI 的实时事件。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RealtimeEvent {
    CommandAcknowledged {
        command_id: String,
        target_id: String,
        target_index: u32,
        action: String,
        acknowledged_at: i64,
    },
    CommandStatus {
        command_id: String,
        target_id: String,
        target_index: u32,
        status: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        error_message: Option<String>,
    },
    /// 通用设备 / LoRaWAN 终端的在线状态。
    DeviceStatus {
        device_key: String,
        online: bool,
        last_seen: i64,
    },
    DeviceData {
        device_id: String,
        data: serde_json::Value,
        received_at: i64,
    },
    ManifoldStatus {
        manifold_id: String,
        valves: Vec<ValveStatusDto>,
        at: i64,
    },
    ManifoldOnline {
        manifold_id: String,
        online: bool,
        last_seen: i64,
    },
    AlarmRaised {
        target_kind: String,
        target_id: String,
        target_index: u32,
        alarm_id: String,
        severity: String,
        message: String,
        timestamp: i64,
    },
    Uplink {
        device_id: String,
        application_id: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        f_port: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        f_cnt: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        rssi: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        snr: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        decoded_payload: Option<serde_json::Value>,
        received_at: i64,
    },
    Join {
        device_id: String,
        application_id: String,
        at: i64,
    },
    DownlinkStatus {
        correlation_id: String,
        device_id: String,
        status: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        failure_reason: Option<String>,
        at: i64,
    },
    GatewayUpdate {
        gateway_id: String,
        total_seen: u64,
        avg_rssi: f64,
        avg_snr: f64,
        last_rssi: f64,
        last_snr: f64,
        is_online: bool,
        last_seen: i64,
    },
}

impl RealtimeEvent {
    /// `type` 字段的取值。
    pub fn event_type(&self) -> &'static str {
        match self {
            RealtimeEvent::CommandAcknowledged { .. } => "commandAcknowledged",
            RealtimeEvent::CommandStatus { .. } => "commandStatus",
            RealtimeEvent::DeviceStatus { .. } => "deviceStatus",
            RealtimeEvent::DeviceData { .. } => "deviceData",
            RealtimeEvent::ManifoldStatus { .. } => "manifoldStatus",
            RealtimeEvent::ManifoldOnline { .. } => "manifoldOnline",
            RealtimeEvent::AlarmRaised { .. } => "alarmRaised",
            RealtimeEvent::Uplink { .. } => "uplink",
            RealtimeEvent::Join { .. } => "join",
            RealtimeEvent::DownlinkStatus { .. } => "downlinkStatus",
            RealtimeEvent::GatewayUpdate { .. } => "gatewayUpdate",
        }
    }
}
