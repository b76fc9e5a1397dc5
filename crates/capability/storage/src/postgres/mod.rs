//! # PostgreSQL 存储实现模块
//!
//! 建表脚本见仓库根目录 `migrations/0001_fleet_core.sql`，可通过
//! [`crate::connection::run_migrations`] 执行。
//!
//! ## 设计原则
//!
//! 1. **参数化查询**：所有 SQL 使用参数绑定
//! 2. **条件更新**：状态流转写成 `where status = any($n)`，由数据库保证单 key 原子性
//! 3. **毫秒时间戳**：时间字段统一为 bigint 毫秒，避免时区换算
//!
//! ## 包含的实现
//!
//! - **CommandStore** (`command.rs`)
//! - **TargetStore** (`target.rs`)：目标与告警规则（`alarm_rules` 子表）
//! - **AlarmStore** (`alarm.rs`)：部分唯一索引实现未确认告警去重
//! - **UplinkStore** (`uplink.rs`)
//! - **GatewayMetricsStore** (`gateway.rs`)：`on conflict` 内完成均值累加
//! - **DownlinkStore** (`downlink.rs`)
//!
//! 在线状态不落 Postgres，见 `crate::redis`。

pub mod alarm;
pub mod command;
pub mod downlink;
pub mod gateway;
pub mod target;
pub mod uplink;

pub use alarm::*;
pub use command::*;
pub use downlink::*;
pub use gateway::*;
pub use target::*;
pub use uplink::*;

use crate::error::StorageError;

/// 解析文本枚举列，无法识别时返回数据一致性错误。
pub(crate) fn parse_column<T>(
    column: &str,
    value: &str,
    parse: fn(&str) -> Option<T>,
) -> Result<T, StorageError> {
    parse(value).ok_or_else(|| StorageError::new(format!("invalid {}: {}", column, value)))
}

/// u32 / u64 与 Postgres 有符号列之间的转换。
pub(crate) fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

pub(crate) fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub(crate) fn from_i32(column: &str, value: i32) -> Result<u32, StorageError> {
    u32::try_from(value).map_err(|_| StorageError::new(format!("negative {}: {}", column, value)))
}

pub(crate) fn from_i64(column: &str, value: i64) -> Result<u64, StorageError> {
    u64::try_from(value).map_err(|_| StorageError::new(format!("negative {}: {}", column, value)))
}

/// `limit 0` 表示不限制，交给 Postgres 时用 null。
pub(crate) fn limit_param(limit: usize) -> Option<i64> {
    if limit == 0 {
        None
    } else {
        Some(i64::try_from(limit).unwrap_or(i64::MAX))
    }
}
