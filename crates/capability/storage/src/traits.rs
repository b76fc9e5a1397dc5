//! 存储接口 Trait 定义
//!
//! 定义消息核心依赖的所有持久化接口：
//! - CommandStore：命令生命周期
//! - TargetStore：受控目标（模式、当前状态、循环计数、告警规则）
//! - AlarmStore：告警实例
//! - PresenceStore：在线状态
//! - UplinkStore：上行记录（只追加）
//! - GatewayMetricsStore：网关信号统计
//! - DownlinkStore：下行关联记录
//!
//! 设计原则：
//! - 所有状态变更都是单 key 原子操作（条件流转 / 不存在才插入 / 带运算的 upsert），
//!   调用方不做“先读后写”
//! - 所有接口返回 StorageError
//! - 使用 async_trait 支持动态分发

use crate::error::StorageError;
use async_trait::async_trait;
use domain::{
    AlarmInstance, Command, CommandStatus, ControlTarget, DeviceKey, DevicePresence,
    DownlinkRecord, DownlinkStatus, GatewayMetrics, TargetKind, TargetRef, TargetStatus,
    UplinkRecord,
};

/// 命令查询条件。
#[derive(Debug, Clone, Default)]
pub struct CommandFilter {
    pub target_id: Option<String>,
    pub target_index: Option<u32>,
    pub status: Option<CommandStatus>,
    /// 0 表示不限制。
    pub limit: usize,
}

impl CommandFilter {
    pub fn matches(&self, command: &Command) -> bool {
        if let Some(target_id) = self.target_id.as_deref() {
            if command.target.target_id != target_id {
                return false;
            }
        }
        if let Some(index) = self.target_index {
            if command.target.target_index != index {
                return false;
            }
        }
        if let Some(status) = self.status {
            if command.status != status {
                return false;
            }
        }
        true
    }
}

/// 命令存储接口
#[async_trait]
pub trait CommandStore: Send + Sync {
    /// 创建命令（command_id 唯一）
    async fn create_command(&self, command: Command) -> Result<Command, StorageError>;

    /// 查找命令
    async fn find_command(&self, command_id: &str) -> Result<Option<Command>, StorageError>;

    /// 条件流转：仅当当前状态属于 `next` 的前驱集合时生效，否则返回 None
    async fn transition_command(
        &self,
        command_id: &str,
        next: CommandStatus,
        at_ms: i64,
        error_message: Option<String>,
    ) -> Result<Option<Command>, StorageError>;

    /// 一次性把所有 `now_ms > expires_at` 的 PENDING / SENT 命令置为 EXPIRED
    async fn expire_overdue(
        &self,
        now_ms: i64,
        reason: &str,
    ) -> Result<Vec<Command>, StorageError>;

    /// 按条件列出命令（issued_at 倒序）
    async fn list_commands(&self, filter: &CommandFilter) -> Result<Vec<Command>, StorageError>;
}

/// 受控目标存储接口
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// 新建或整体替换目标（CRUD 层使用）
    async fn upsert_target(&self, target: ControlTarget) -> Result<ControlTarget, StorageError>;

    /// 查找目标
    async fn find_target(&self, target: &TargetRef) -> Result<Option<ControlTarget>, StorageError>;

    /// 列出某个歧管 / 设备下的所有目标
    async fn list_targets(
        &self,
        kind: TargetKind,
        target_id: &str,
    ) -> Result<Vec<ControlTarget>, StorageError>;

    /// 乐观写入下发意图；`count_cycle` 为 true 时 cycle_count + 1。目标不存在返回 None
    async fn apply_commanded_status(
        &self,
        target: &TargetRef,
        status: TargetStatus,
        count_cycle: bool,
        at_ms: i64,
    ) -> Result<Option<ControlTarget>, StorageError>;

    /// 写入遥测观测状态；目标不存在时创建占位记录
    async fn record_observed_status(
        &self,
        target: &TargetRef,
        status: TargetStatus,
        at_ms: i64,
    ) -> Result<ControlTarget, StorageError>;
}

/// 告警实例存储接口
#[async_trait]
pub trait AlarmStore: Send + Sync {
    /// 列出目标下的告警（时间正序）
    async fn list_alarms(&self, target: &TargetRef) -> Result<Vec<AlarmInstance>, StorageError>;

    /// 同一目标下不存在相同 message 的未确认告警时追加，返回是否插入
    async fn insert_alarm_if_absent(
        &self,
        target: &TargetRef,
        alarm: AlarmInstance,
    ) -> Result<bool, StorageError>;

    /// 确认告警，返回是否发生变化
    async fn acknowledge_alarm(
        &self,
        target: &TargetRef,
        alarm_id: &str,
    ) -> Result<bool, StorageError>;
}

/// touch 的结果。
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceTouch {
    pub presence: DevicePresence,
    /// 之前离线或未知时为 true。
    pub came_online: bool,
}

/// 在线状态存储接口
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// 更新 last_seen 并置为在线；connected_since 仅首次写入
    async fn touch(&self, key: &DeviceKey, now_ms: i64) -> Result<PresenceTouch, StorageError>;

    /// 当前在线且 `now_ms - last_seen > timeout_ms` 时置为离线，返回离线后的记录
    async fn mark_offline_if_stale(
        &self,
        key: &DeviceKey,
        now_ms: i64,
        timeout_ms: i64,
    ) -> Result<Option<DevicePresence>, StorageError>;

    /// 无条件置为离线（设备主动上报离线），之前在线时返回记录
    async fn mark_offline(&self, key: &DeviceKey) -> Result<Option<DevicePresence>, StorageError>;

    /// 查找在线状态
    async fn find_presence(&self, key: &DeviceKey) -> Result<Option<DevicePresence>, StorageError>;

    /// 列出全部在线状态
    async fn list_presence(&self) -> Result<Vec<DevicePresence>, StorageError>;

    /// 清除记录（含 connected_since），返回是否存在
    async fn clear_presence(&self, key: &DeviceKey) -> Result<bool, StorageError>;
}

/// 上行记录存储接口（只追加）
#[async_trait]
pub trait UplinkStore: Send + Sync {
    /// 追加上行记录
    async fn append_uplink(&self, record: UplinkRecord) -> Result<(), StorageError>;

    /// 列出设备最近的上行（received_at 倒序）
    async fn list_uplinks(
        &self,
        device_key: &str,
        limit: usize,
    ) -> Result<Vec<UplinkRecord>, StorageError>;
}

/// 网关信号统计存储接口
#[async_trait]
pub trait GatewayMetricsStore: Send + Sync {
    /// 原子地累加一个样本（均值与 total_seen 同时更新）；未知网关新建
    async fn record_sample(
        &self,
        gateway_key: &str,
        rssi: f64,
        snr: f64,
        at_ms: i64,
    ) -> Result<GatewayMetrics, StorageError>;

    /// 查找网关统计
    async fn find_gateway_metrics(
        &self,
        gateway_key: &str,
    ) -> Result<Option<GatewayMetrics>, StorageError>;

    /// 列出全部网关统计
    async fn list_gateway_metrics(&self) -> Result<Vec<GatewayMetrics>, StorageError>;

    /// 更新在线标记，网关不存在返回 None
    async fn set_gateway_online(
        &self,
        gateway_key: &str,
        online: bool,
    ) -> Result<Option<GatewayMetrics>, StorageError>;
}

/// 下行流转结果。
#[derive(Debug, Clone, PartialEq)]
pub enum DownlinkAdvance {
    /// 合法的前进流转，返回更新后的记录。
    Applied(DownlinkRecord),
    /// 重复或回退事件，记录保持不变。
    Ignored(DownlinkRecord),
    /// 本进程未创建过该关联 ID。
    NotFound,
}

/// 下行关联记录存储接口
#[async_trait]
pub trait DownlinkStore: Send + Sync {
    /// 创建下行记录（correlation_id 唯一）
    async fn create_downlink(&self, record: DownlinkRecord) -> Result<DownlinkRecord, StorageError>;

    /// 查找下行记录
    async fn find_downlink(
        &self,
        correlation_id: &str,
    ) -> Result<Option<DownlinkRecord>, StorageError>;

    /// 仅在合法前进时更新状态；不存在的 ID 不会创建记录
    async fn advance_downlink(
        &self,
        correlation_id: &str,
        next: DownlinkStatus,
        at_ms: i64,
        failure_reason: Option<String>,
    ) -> Result<DownlinkAdvance, StorageError>;

    /// 列出设备的下行记录（created_at 倒序）
    async fn list_downlinks(
        &self,
        device_key: &str,
        limit: usize,
    ) -> Result<Vec<DownlinkRecord>, StorageError>;
}
