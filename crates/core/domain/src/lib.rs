//! 消息核心共享的领域模型。
//!
//! 本 crate 不依赖任何运行时或存储实现，只描述实体、状态机与不变量：
//! - 命令：`Command` 及其单调状态机
//! - 受控目标：`ControlTarget`（阀门 / 通用执行器）与告警规则
//! - 在线状态：`DevicePresence`
//! - LoRaWAN：上行记录、网关信号统计、下行关联记录

pub mod command;
pub mod lorawan;
pub mod presence;
pub mod target;
pub mod time;

pub use command::{
    Command, CommandAction, CommandStatus, DEFAULT_COMMAND_TIMEOUT_MS, EXPIRED_REASON,
};
pub use lorawan::{
    DownlinkRecord, DownlinkStatus, GatewayMetrics, GatewayReception, UplinkRecord,
};
pub use presence::{DeviceKey, DeviceKind, DevicePresence, PresenceTransition};
pub use target::{
    AlarmInstance, AlarmRule, AlarmRuleType, AlarmSeverity, CompareOperator, ControlTarget,
    TargetKind, TargetMode, TargetRef, TargetStatus,
};
pub use time::now_epoch_ms;
