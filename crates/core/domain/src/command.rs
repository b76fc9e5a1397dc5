//! 执行器命令及其状态机。
//!
//! 状态流转：
//! - `PENDING --发布成功--> SENT --回执--> ACKNOWLEDGED`
//! - `PENDING --发布失败--> FAILED`
//! - `{PENDING, SENT} --过期扫描--> EXPIRED`
//!
//! `ACKNOWLEDGED` / `FAILED` / `EXPIRED` 为终态，进入后不再变化。

use crate::target::{TargetRef, TargetStatus};

/// 默认回执超时（毫秒）。
pub const DEFAULT_COMMAND_TIMEOUT_MS: i64 = 30_000;

/// 过期扫描写入的固定原因。
pub const EXPIRED_REASON: &str = "Command expired without acknowledgement";

/// 命令状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandStatus {
    Pending,
    Sent,
    Acknowledged,
    Failed,
    Expired,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Pending => "PENDING",
            CommandStatus::Sent => "SENT",
            CommandStatus::Acknowledged => "ACKNOWLEDGED",
            CommandStatus::Failed => "FAILED",
            CommandStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(CommandStatus::Pending),
            "SENT" => Some(CommandStatus::Sent),
            "ACKNOWLEDGED" => Some(CommandStatus::Acknowledged),
            "FAILED" => Some(CommandStatus::Failed),
            "EXPIRED" => Some(CommandStatus::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CommandStatus::Acknowledged | CommandStatus::Failed | CommandStatus::Expired
        )
    }

    /// 允许流转到 `next` 的前驱状态集合。
    ///
    /// 回执可能先于 SENT 写入到达，因此 ACKNOWLEDGED 同时接受 PENDING。
    pub fn predecessors(next: CommandStatus) -> &'static [CommandStatus] {
        match next {
            CommandStatus::Pending => &[],
            CommandStatus::Sent => &[CommandStatus::Pending],
            CommandStatus::Acknowledged => &[CommandStatus::Pending, CommandStatus::Sent],
            CommandStatus::Failed => &[CommandStatus::Pending],
            CommandStatus::Expired => &[CommandStatus::Pending, CommandStatus::Sent],
        }
    }

    pub fn can_transition_to(&self, next: CommandStatus) -> bool {
        CommandStatus::predecessors(next).contains(self)
    }
}

/// 命令动作。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandAction {
    On,
    Off,
}

impl CommandAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandAction::On => "ON",
            CommandAction::Off => "OFF",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ON" | "OPEN" => Some(CommandAction::On),
            "OFF" | "CLOSE" => Some(CommandAction::Off),
            _ => None,
        }
    }

    /// 命令生效后目标应处于的状态。
    pub fn resulting_status(&self) -> TargetStatus {
        match self {
            CommandAction::On => TargetStatus::On,
            CommandAction::Off => TargetStatus::Off,
        }
    }
}

/// 执行器命令记录。
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub command_id: String,
    pub target: TargetRef,
    pub action: CommandAction,
    pub duration_secs: Option<u64>,
    pub status: CommandStatus,
    pub issued_at_ms: i64,
    pub sent_at_ms: Option<i64>,
    pub acknowledged_at_ms: Option<i64>,
    pub expires_at_ms: i64,
    pub error_message: Option<String>,
}

impl Command {
    /// 构造 PENDING 命令，`expires_at_ms` 在创建时固定。
    pub fn pending(
        command_id: impl Into<String>,
        target: TargetRef,
        action: CommandAction,
        duration_secs: Option<u64>,
        issued_at_ms: i64,
        timeout_ms: i64,
    ) -> Self {
        Self {
            command_id: command_id.into(),
            target,
            action,
            duration_secs,
            status: CommandStatus::Pending,
            issued_at_ms,
            sent_at_ms: None,
            acknowledged_at_ms: None,
            expires_at_ms: issued_at_ms.saturating_add(timeout_ms),
            error_message: None,
        }
    }

    pub fn is_overdue(&self, now_ms: i64) -> bool {
        !self.status.is_terminal() && now_ms > self.expires_at_ms
    }

    /// 在内存中应用一次状态流转，非法流转返回 false 且不修改记录。
    pub fn apply_transition(
        &mut self,
        next: CommandStatus,
        at_ms: i64,
        error_message: Option<String>,
    ) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        match next {
            CommandStatus::Sent => self.sent_at_ms = Some(at_ms),
            CommandStatus::Acknowledged => self.acknowledged_at_ms = Some(at_ms),
            CommandStatus::Failed | CommandStatus::Expired => {
                self.error_message = error_message;
            }
            CommandStatus::Pending => {}
        }
        true
    }
}
