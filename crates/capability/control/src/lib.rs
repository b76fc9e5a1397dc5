//! 命令队列：下发、回执、自动关闭、过期扫描。
//!
//! 生命周期：
//! - `PENDING --发布成功--> SENT --回执--> ACKNOWLEDGED`
//! - `PENDING --发布失败--> FAILED`
//! - `{PENDING, SENT} --扫描且 now > expiresAt--> EXPIRED`
//!
//! 发布与本地状态不在同一事务内，过期扫描兜底。发布只等待本地入队结果，
//! 从不等待硬件确认。

use api_contract::{CommandEnvelope, RealtimeEvent};
use domain::{
    Command, CommandAction, CommandStatus, DEFAULT_COMMAND_TIMEOUT_MS, EXPIRED_REASON,
    TargetMode, TargetRef, TargetStatus,
};
use fleet_realtime::{RealtimeChannel, RealtimeHub};
use fleet_scheduler::{Scheduler, one_shot, repeating};
use fleet_storage::{CommandFilter, CommandStore, StorageError, TargetStore};
use fleet_telemetry::{
    record_command_acknowledged, record_command_enqueued, record_command_publish_failure,
    record_command_publish_success, record_command_rejected, record_commands_expired,
};
use fleet_transport::{QoS, TransportAdapter};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 控制链路错误。
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("target {0} is in AUTO mode")]
    InvalidMode(TargetRef),
    #[error("unknown target {0}")]
    UnknownTarget(TargetRef),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("payload error: {0}")]
    Payload(String),
}

impl From<StorageError> for ControlError {
    fn from(err: StorageError) -> Self {
        ControlError::Storage(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct CommandQueueConfig {
    /// 回执超时，`expiresAt = issuedAt + command_timeout_ms`。
    pub command_timeout_ms: i64,
    pub qos: QoS,
}

impl Default for CommandQueueConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            qos: QoS::AtLeastOnce,
        }
    }
}

/// 命令 topic：`{manifolds|devices}/{targetId}/command`。
pub fn command_topic(target: &TargetRef) -> String {
    format!("{}/{}/command", target.kind.topic_domain(), target.target_id)
}

fn command_payload(command: &Command) -> Result<Vec<u8>, ControlError> {
    let envelope = CommandEnvelope {
        command_id: command.command_id.clone(),
        target_index: command.target.target_index,
        action: command.action.as_str().to_string(),
        duration_secs: command.duration_secs,
        issued_at: command.issued_at_ms,
        expires_at: command.expires_at_ms,
    };
    serde_json::to_vec(&envelope).map_err(|err| ControlError::Payload(err.to_string()))
}

/// 命令队列管理器。
#[derive(Clone)]
pub struct CommandQueueManager {
    commands: Arc<dyn CommandStore>,
    targets: Arc<dyn TargetStore>,
    transport: Arc<dyn TransportAdapter>,
    scheduler: Arc<dyn Scheduler>,
    hub: RealtimeHub,
    config: CommandQueueConfig,
}

impl CommandQueueManager {
    pub fn new(
        commands: Arc<dyn CommandStore>,
        targets: Arc<dyn TargetStore>,
        transport: Arc<dyn TransportAdapter>,
        scheduler: Arc<dyn Scheduler>,
        hub: RealtimeHub,
        config: CommandQueueConfig,
    ) -> Self {
        Self {
            commands,
            targets,
            transport,
            scheduler,
            hub,
            config,
        }
    }

    /// 创建并下发命令。
    ///
    /// 目标处于 AUTO 模式时返回 `InvalidMode`，不会创建任何记录。
    /// 发布失败不会返回错误，而是返回 FAILED 状态的命令。
    pub async fn enqueue(
        &self,
        target: &TargetRef,
        action: CommandAction,
        duration_secs: Option<u64>,
    ) -> Result<Command, ControlError> {
        let Some(control_target) = self.targets.find_target(target).await? else {
            record_command_rejected();
            return Err(ControlError::UnknownTarget(target.clone()));
        };
        if control_target.mode == TargetMode::Auto {
            record_command_rejected();
            info!(
                target: "fleet.control",
                command_target = %target,
                action = action.as_str(),
                "command_rejected_auto_mode"
            );
            return Err(ControlError::InvalidMode(target.clone()));
        }

        let issued_at_ms = self.scheduler.now_ms();
        let command = Command::pending(
            uuid::Uuid::new_v4().to_string(),
            target.clone(),
            action,
            duration_secs,
            issued_at_ms,
            self.config.command_timeout_ms,
        );
        let payload = command_payload(&command)?;
        let command = self.commands.create_command(command).await?;
        record_command_enqueued();
        info!(
            target: "fleet.control",
            command_id = %command.command_id,
            command_target = %target,
            action = action.as_str(),
            duration_secs = ?duration_secs,
            expires_at_ms = command.expires_at_ms,
            "command_created"
        );

        let topic = command_topic(target);
        match self
            .transport
            .publish(&topic, payload, self.config.qos)
            .await
        {
            Ok(()) => {
                record_command_publish_success();
                let sent_at_ms = self.scheduler.now_ms();
                let updated = self
                    .commands
                    .transition_command(&command.command_id, CommandStatus::Sent, sent_at_ms, None)
                    .await?;
                self.targets
                    .apply_commanded_status(
                        target,
                        action.resulting_status(),
                        action == CommandAction::On,
                        sent_at_ms,
                    )
                    .await?;
                info!(
                    target: "fleet.control",
                    command_id = %command.command_id,
                    topic = %topic,
                    "command_published"
                );
                if action == CommandAction::On {
                    if let Some(duration_secs) = duration_secs.filter(|secs| *secs > 0) {
                        self.schedule_auto_off(
                            target.clone(),
                            command.command_id.clone(),
                            sent_at_ms,
                            duration_secs,
                        );
                    }
                }
                let current = match updated {
                    Some(command) => command,
                    // 回执先于 SENT 写入到达
                    None => self
                        .commands
                        .find_command(&command.command_id)
                        .await?
                        .unwrap_or(command),
                };
                self.broadcast_status(&current);
                Ok(current)
            }
            Err(err) => {
                record_command_publish_failure();
                warn!(
                    target: "fleet.control",
                    command_id = %command.command_id,
                    topic = %topic,
                    error = %err,
                    "command_publish_failed"
                );
                let failed_at_ms = self.scheduler.now_ms();
                let updated = self
                    .commands
                    .transition_command(
                        &command.command_id,
                        CommandStatus::Failed,
                        failed_at_ms,
                        Some(err.to_string()),
                    )
                    .await?;
                let current = updated.unwrap_or(command);
                self.broadcast_status(&current);
                Ok(current)
            }
        }
    }

    /// 处理设备回执。未知或已终结的命令返回 None。
    pub async fn acknowledge(
        &self,
        command_id: &str,
        at_ms: i64,
    ) -> Result<Option<Command>, ControlError> {
        let updated = self
            .commands
            .transition_command(command_id, CommandStatus::Acknowledged, at_ms, None)
            .await?;
        let Some(command) = updated else {
            debug!(target: "fleet.control", command_id = %command_id, "command_ack_ignored");
            return Ok(None);
        };
        record_command_acknowledged();
        info!(
            target: "fleet.control",
            command_id = %command.command_id,
            command_target = %command.target,
            latency_ms = at_ms.saturating_sub(command.issued_at_ms),
            "command_acknowledged"
        );
        self.hub.publish(
            &RealtimeChannel::for_target(&command.target),
            RealtimeEvent::CommandAcknowledged {
                command_id: command.command_id.clone(),
                target_id: command.target.target_id.clone(),
                target_index: command.target.target_index,
                action: command.action.as_str().to_string(),
                acknowledged_at: at_ms,
            },
        );
        Ok(Some(command))
    }

    /// 把所有超时未回执的命令置为 EXPIRED（一次存储调用）。
    pub async fn expire_overdue(&self, now_ms: i64) -> Result<Vec<Command>, ControlError> {
        let expired = self.commands.expire_overdue(now_ms, EXPIRED_REASON).await?;
        if expired.is_empty() {
            return Ok(expired);
        }
        record_commands_expired(expired.len() as u64);
        info!(
            target: "fleet.control",
            expired = expired.len(),
            now_ms,
            "commands_expired"
        );
        for command in expired.iter() {
            self.broadcast_status(command);
        }
        Ok(expired)
    }

    /// 注册周期性过期扫描。单次失败只记录日志。
    pub fn start_expiry_sweep(&self, interval: Duration) {
        let manager = self.clone();
        self.scheduler.schedule_every(
            interval,
            repeating(move || {
                let manager = manager.clone();
                async move {
                    let now_ms = manager.scheduler.now_ms();
                    if let Err(err) = manager.expire_overdue(now_ms).await {
                        warn!(target: "fleet.control", error = %err, "command_expiry_sweep_failed");
                    }
                }
            }),
        );
    }

    pub async fn get_command(&self, command_id: &str) -> Result<Option<Command>, ControlError> {
        Ok(self.commands.find_command(command_id).await?)
    }

    pub async fn list_commands(&self, filter: &CommandFilter) -> Result<Vec<Command>, ControlError> {
        Ok(self.commands.list_commands(filter).await?)
    }

    fn schedule_auto_off(
        &self,
        target: TargetRef,
        command_id: String,
        from_ms: i64,
        duration_secs: u64,
    ) {
        let at_ms = from_ms.saturating_add((duration_secs as i64).saturating_mul(1_000));
        let manager = self.clone();
        info!(
            target: "fleet.control",
            command_id = %command_id,
            command_target = %target,
            auto_off_at_ms = at_ms,
            "command_auto_off_scheduled"
        );
        self.scheduler.schedule_at(
            at_ms,
            one_shot(move || async move {
                manager.run_auto_off(&target, &command_id).await;
            }),
        );
    }

    /// 仅当触发定时器的命令仍是该目标最近一次 ON 命令时才下发 OFF。
    async fn run_auto_off(&self, target: &TargetRef, command_id: &str) {
        let current = match self.targets.find_target(target).await {
            Ok(Some(current)) => current,
            Ok(None) => return,
            Err(err) => {
                warn!(
                    target: "fleet.control",
                    command_target = %target,
                    error = %err,
                    "command_auto_off_lookup_failed"
                );
                return;
            }
        };
        if current.mode != TargetMode::Manual || current.current_status != TargetStatus::On {
            info!(
                target: "fleet.control",
                command_target = %target,
                mode = current.mode.as_str(),
                status = current.current_status.as_str(),
                "command_auto_off_skipped"
            );
            return;
        }
        match self.latest_on_command(target).await {
            Ok(Some(latest)) if latest == command_id => {}
            Ok(latest) => {
                info!(
                    target: "fleet.control",
                    command_id = %command_id,
                    command_target = %target,
                    superseded_by = ?latest,
                    "command_auto_off_superseded"
                );
                return;
            }
            Err(err) => {
                warn!(
                    target: "fleet.control",
                    command_target = %target,
                    error = %err,
                    "command_auto_off_lookup_failed"
                );
                return;
            }
        }
        match self.enqueue(target, CommandAction::Off, None).await {
            Ok(command) => info!(
                target: "fleet.control",
                command_id = %command.command_id,
                command_target = %target,
                status = command.status.as_str(),
                "command_auto_off_enqueued"
            ),
            Err(err) => warn!(
                target: "fleet.control",
                command_target = %target,
                error = %err,
                "command_auto_off_failed"
            ),
        }
    }

    async fn latest_on_command(&self, target: &TargetRef) -> Result<Option<String>, StorageError> {
        let filter = CommandFilter {
            target_id: Some(target.target_id.clone()),
            target_index: Some(target.target_index),
            ..CommandFilter::default()
        };
        let commands = self.commands.list_commands(&filter).await?;
        Ok(commands
            .into_iter()
            .filter(|command| command.target == *target && command.action == CommandAction::On)
            .max_by_key(|command| command.issued_at_ms)
            .map(|command| command.command_id))
    }

    fn broadcast_status(&self, command: &Command) {
        self.hub.publish(
            &RealtimeChannel::for_target(&command.target),
            RealtimeEvent::CommandStatus {
                command_id: command.command_id.clone(),
                target_id: command.target.target_id.clone(),
                target_index: command.target.target_index,
                status: command.status.as_str().to_string(),
                error_message: command.error_message.clone(),
            },
        );
    }
}
