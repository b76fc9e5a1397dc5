//! LoRaWAN 上行、网关信号统计与下行关联记录。

/// 单个网关对一次上行的接收情况。
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayReception {
    pub gateway_id: String,
    pub rssi: f64,
    pub snr: f64,
}

/// 一次上行的不可变记录（只追加）。
#[derive(Debug, Clone, PartialEq)]
pub struct UplinkRecord {
    pub device_key: String,
    pub application_id: String,
    pub f_port: Option<u32>,
    pub f_cnt: Option<u32>,
    pub raw_payload: String,
    /// 解码后的 JSON 文本。
    pub decoded_payload: Option<String>,
    /// 最强接收网关的 rssi / snr。
    pub rssi: Option<f64>,
    pub snr: Option<f64>,
    pub spreading_factor: Option<u32>,
    pub bandwidth: Option<u32>,
    pub frequency: Option<u64>,
    /// 所有接收网关，各自携带 rssi / snr。
    pub gateways: Vec<GatewayReception>,
    pub received_at_ms: i64,
}

impl UplinkRecord {
    pub fn strongest_gateway(&self) -> Option<&GatewayReception> {
        self.gateways
            .iter()
            .max_by(|a, b| a.rssi.total_cmp(&b.rssi))
    }
}

/// 单个网关的信号统计。
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayMetrics {
    pub gateway_key: String,
    pub total_seen: u64,
    pub avg_rssi: f64,
    pub avg_snr: f64,
    pub last_rssi: f64,
    pub last_snr: f64,
    pub is_online: bool,
    pub last_seen_ms: i64,
}

impl GatewayMetrics {
    pub fn first_sample(gateway_key: impl Into<String>, rssi: f64, snr: f64, at_ms: i64) -> Self {
        Self {
            gateway_key: gateway_key.into(),
            total_seen: 1,
            avg_rssi: rssi,
            avg_snr: snr,
            last_rssi: rssi,
            last_snr: snr,
            is_online: true,
            last_seen_ms: at_ms,
        }
    }

    /// 累加一个样本：`newAvg = (oldAvg * totalSeen + sample) / (totalSeen + 1)`。
    pub fn with_sample(&self, rssi: f64, snr: f64, at_ms: i64) -> Self {
        let seen = self.total_seen as f64;
        Self {
            gateway_key: self.gateway_key.clone(),
            total_seen: self.total_seen + 1,
            avg_rssi: (self.avg_rssi * seen + rssi) / (seen + 1.0),
            avg_snr: (self.avg_snr * seen + snr) / (seen + 1.0),
            last_rssi: rssi,
            last_snr: snr,
            is_online: true,
            last_seen_ms: at_ms.max(self.last_seen_ms),
        }
    }
}

/// 下行状态，偏序 `PENDING → SCHEDULED → SENT → {ACKNOWLEDGED, FAILED}`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DownlinkStatus {
    Pending,
    Scheduled,
    Sent,
    Acknowledged,
    Failed,
}

impl DownlinkStatus {
    pub const ALL: [DownlinkStatus; 5] = [
        DownlinkStatus::Pending,
        DownlinkStatus::Scheduled,
        DownlinkStatus::Sent,
        DownlinkStatus::Acknowledged,
        DownlinkStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DownlinkStatus::Pending => "PENDING",
            DownlinkStatus::Scheduled => "SCHEDULED",
            DownlinkStatus::Sent => "SENT",
            DownlinkStatus::Acknowledged => "ACKNOWLEDGED",
            DownlinkStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(DownlinkStatus::Pending),
            "SCHEDULED" | "QUEUED" => Some(DownlinkStatus::Scheduled),
            "SENT" => Some(DownlinkStatus::Sent),
            "ACKNOWLEDGED" | "ACK" => Some(DownlinkStatus::Acknowledged),
            "FAILED" => Some(DownlinkStatus::Failed),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            DownlinkStatus::Pending => 0,
            DownlinkStatus::Scheduled => 1,
            DownlinkStatus::Sent => 2,
            DownlinkStatus::Acknowledged | DownlinkStatus::Failed => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DownlinkStatus::Acknowledged | DownlinkStatus::Failed)
    }

    pub fn can_advance_to(&self, next: DownlinkStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    /// 可以前进到 `next` 的状态集合（用于条件更新）。
    pub fn predecessors(next: DownlinkStatus) -> Vec<DownlinkStatus> {
        DownlinkStatus::ALL
            .into_iter()
            .filter(|status| status.can_advance_to(next))
            .collect()
    }
}

/// 下行关联记录，以 `correlation_id` 唯一标识。
#[derive(Debug, Clone, PartialEq)]
pub struct DownlinkRecord {
    pub correlation_id: String,
    pub device_key: String,
    pub application_id: String,
    pub f_port: u32,
    pub payload: String,
    pub status: DownlinkStatus,
    pub created_at_ms: i64,
    pub scheduled_at_ms: Option<i64>,
    pub sent_at_ms: Option<i64>,
    pub acknowledged_at_ms: Option<i64>,
    pub failed_at_ms: Option<i64>,
    pub failure_reason: Option<String>,
}

impl DownlinkRecord {
    /// 仅接受向前的流转；返回是否发生变化。
    pub fn advance(
        &mut self,
        next: DownlinkStatus,
        at_ms: i64,
        failure_reason: Option<String>,
    ) -> bool {
        if !self.status.can_advance_to(next) {
            return false;
        }
        self.status = next;
        match next {
            DownlinkStatus::Scheduled => self.scheduled_at_ms = Some(at_ms),
            DownlinkStatus::Sent => self.sent_at_ms = Some(at_ms),
            DownlinkStatus::Acknowledged => self.acknowledged_at_ms = Some(at_ms),
            DownlinkStatus::Failed => {
                self.failed_at_ms = Some(at_ms);
                self.failure_reason = failure_reason;
            }
            DownlinkStatus::Pending => {}
        }
        true
    }
}
