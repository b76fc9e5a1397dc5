//! Postgres 告警实例存储实现

use super::{parse_column, to_i32};
use crate::error::StorageError;
use crate::traits::AlarmStore;
use domain::{AlarmInstance, AlarmSeverity, TargetRef};
use sqlx::{PgPool, Row};

pub struct PgAlarmStore {
    pub pool: PgPool,
}

impl PgAlarmStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AlarmStore for PgAlarmStore {
    async fn list_alarms(&self, target: &TargetRef) -> Result<Vec<AlarmInstance>, StorageError> {
        let rows = sqlx::query(
            "select alarm_id, severity, message, timestamp_ms, acknowledged \
             from alarm_instances \
             where target_kind = $1 and target_id = $2 and target_index = $3 \
             order by timestamp_ms",
        )
        .bind(target.kind.as_str())
        .bind(&target.target_id)
        .bind(to_i32(target.target_index))
        .fetch_all(&self.pool)
        .await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let severity: String = row.try_get("severity")?;
            items.push(AlarmInstance {
                alarm_id: row.try_get("alarm_id")?,
                severity: parse_column("severity", &severity, AlarmSeverity::parse)?,
                message: row.try_get("message")?,
                timestamp_ms: row.try_get("timestamp_ms")?,
                acknowledged: row.try_get("acknowledged")?,
            });
        }
        Ok(items)
    }

    async fn insert_alarm_if_absent(
        &self,
        target: &TargetRef,
        alarm: AlarmInstance,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "insert into alarm_instances \
             (alarm_id, target_kind, target_id, target_index, severity, message, timestamp_ms, acknowledged) \
             values ($1, $2, $3, $4, $5, $6, $7, false) \
             on conflict (target_kind, target_id, target_index, message) where not acknowledged \
             do nothing",
        )
        .bind(&alarm.alarm_id)
        .bind(target.kind.as_str())
        .bind(&target.target_id)
        .bind(to_i32(target.target_index))
        .bind(alarm.severity.as_str())
        .bind(&alarm.message)
        .bind(alarm.timestamp_ms)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn acknowledge_alarm(
        &self,
        target: &TargetRef,
        alarm_id: &str,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "update alarm_instances set acknowledged = true \
             where alarm_id = $1 and target_kind = $2 and target_id = $3 and target_index = $4 \
             and not acknowledged",
        )
        .bind(alarm_id)
        .bind(target.kind.as_str())
        .bind(&target.target_id)
        .bind(to_i32(target.target_index))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
