//! Postgres 命令存储实现

use super::{from_i32, from_i64, limit_param, parse_column, to_i32, to_i64};
use crate::error::StorageError;
use crate::traits::{CommandFilter, CommandStore};
use domain::{Command, CommandAction, CommandStatus, TargetKind, TargetRef};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

const COMMAND_COLUMNS: &str = "command_id, target_kind, target_id, target_index, action, \
     duration_secs, status, issued_at_ms, sent_at_ms, acknowledged_at_ms, expires_at_ms, \
     error_message";

pub struct PgCommandStore {
    pub pool: PgPool,
}

impl PgCommandStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn command_from_row(row: &PgRow) -> Result<Command, StorageError> {
    let kind: String = row.try_get("target_kind")?;
    let action: String = row.try_get("action")?;
    let status: String = row.try_get("status")?;
    let duration_secs: Option<i64> = row.try_get("duration_secs")?;
    Ok(Command {
        command_id: row.try_get("command_id")?,
        target: TargetRef::new(
            parse_column("target_kind", &kind, TargetKind::parse)?,
            row.try_get::<String, _>("target_id")?,
            from_i32("target_index", row.try_get("target_index")?)?,
        ),
        action: parse_column("action", &action, CommandAction::parse)?,
        duration_secs: duration_secs
            .map(|value| from_i64("duration_secs", value))
            .transpose()?,
        status: parse_column("status", &status, CommandStatus::parse)?,
        issued_at_ms: row.try_get("issued_at_ms")?,
        sent_at_ms: row.try_get("sent_at_ms")?,
        acknowledged_at_ms: row.try_get("acknowledged_at_ms")?,
        expires_at_ms: row.try_get("expires_at_ms")?,
        error_message: row.try_get("error_message")?,
    })
}

#[async_trait::async_trait]
impl CommandStore for PgCommandStore {
    async fn create_command(&self, command: Command) -> Result<Command, StorageError> {
        sqlx::query(
            "insert into commands \
             (command_id, target_kind, target_id, target_index, action, duration_secs, status, \
             issued_at_ms, sent_at_ms, acknowledged_at_ms, expires_at_ms, error_message) \
             values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(&command.command_id)
        .bind(command.target.kind.as_str())
        .bind(&command.target.target_id)
        .bind(to_i32(command.target.target_index))
        .bind(command.action.as_str())
        .bind(command.duration_secs.map(to_i64))
        .bind(command.status.as_str())
        .bind(command.issued_at_ms)
        .bind(command.sent_at_ms)
        .bind(command.acknowledged_at_ms)
        .bind(command.expires_at_ms)
        .bind(&command.error_message)
        .execute(&self.pool)
        .await?;
        Ok(command)
    }

    async fn find_command(&self, command_id: &str) -> Result<Option<Command>, StorageError> {
        let row = sqlx::query(&format!(
            "select {} from commands where command_id = $1",
            COMMAND_COLUMNS
        ))
        .bind(command_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(command_from_row).transpose()
    }

    async fn transition_command(
        &self,
        command_id: &str,
        next: CommandStatus,
        at_ms: i64,
        error_message: Option<String>,
    ) -> Result<Option<Command>, StorageError> {
        let from: Vec<String> = CommandStatus::predecessors(next)
            .iter()
            .map(|status| status.as_str().to_string())
            .collect();
        if from.is_empty() {
            return Ok(None);
        }
        let row = sqlx::query(&format!(
            "update commands set status = $2::text, \
             sent_at_ms = case when $2::text = 'SENT' then $3 else sent_at_ms end, \
             acknowledged_at_ms = case when $2::text = 'ACKNOWLEDGED' then $3 else acknowledged_at_ms end, \
             error_message = case when $2::text in ('FAILED', 'EXPIRED') then $4 else error_message end \
             where command_id = $1 and status = any($5) \
             returning {}",
            COMMAND_COLUMNS
        ))
        .bind(command_id)
        .bind(next.as_str())
        .bind(at_ms)
        .bind(error_message)
        .bind(from)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(command_from_row).transpose()
    }

    async fn expire_overdue(
        &self,
        now_ms: i64,
        reason: &str,
    ) -> Result<Vec<Command>, StorageError> {
        let rows = sqlx::query(&format!(
            "update commands set status = 'EXPIRED', error_message = $2 \
             where status in ('PENDING', 'SENT') and expires_at_ms < $1 \
             returning {}",
            COMMAND_COLUMNS
        ))
        .bind(now_ms)
        .bind(reason)
        .fetch_all(&self.pool)
        .await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            items.push(command_from_row(row)?);
        }
        items.sort_by(|a, b| a.issued_at_ms.cmp(&b.issued_at_ms));
        Ok(items)
    }

    async fn list_commands(&self, filter: &CommandFilter) -> Result<Vec<Command>, StorageError> {
        let rows = sqlx::query(&format!(
            "select {} from commands \
             where ($1::text is null or target_id = $1) \
             and ($2::integer is null or target_index = $2) \
             and ($3::text is null or status = $3) \
             order by issued_at_ms desc \
             limit $4",
            COMMAND_COLUMNS
        ))
        .bind(&filter.target_id)
        .bind(filter.target_index.map(to_i32))
        .bind(filter.status.map(|status| status.as_str()))
        .bind(limit_param(filter.limit))
        .fetch_all(&self.pool)
        .await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            items.push(command_from_row(row)?);
        }
        Ok(items)
    }
}
