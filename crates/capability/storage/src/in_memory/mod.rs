//! 内存存储实现模块
//!
//! 用于单进程部署和测试。每个实现在一次写锁内完成“比较 + 写入”，
//! 与 Postgres / Redis 实现的条件更新语义一致。
//!
//! - CommandStore: InMemoryCommandStore
//! - TargetStore: InMemoryTargetStore
//! - AlarmStore: InMemoryAlarmStore
//! - PresenceStore: InMemoryPresenceStore
//! - UplinkStore: InMemoryUplinkStore
//! - GatewayMetricsStore: InMemoryGatewayMetricsStore
//! - DownlinkStore: InMemoryDownlinkStore

pub mod alarm;
pub mod command;
pub mod downlink;
pub mod gateway;
pub mod presence;
pub mod target;
pub mod uplink;

pub use alarm::*;
pub use command::*;
pub use downlink::*;
pub use gateway::*;
pub use presence::*;
pub use target::*;
pub use uplink::*;
