//! Postgres 下行关联记录实现

use super::{from_i32, parse_column, to_i32};
use crate::error::StorageError;
use crate::traits::{DownlinkAdvance, DownlinkStore};
use domain::{DownlinkRecord, DownlinkStatus};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

const DOWNLINK_COLUMNS: &str = "correlation_id, device_key, application_id, f_port, payload, \
     status, created_at_ms, scheduled_at_ms, sent_at_ms, acknowledged_at_ms, failed_at_ms, \
     failure_reason";

pub struct PgDownlinkStore {
    pub pool: PgPool,
}

impl PgDownlinkStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn downlink_from_row(row: &PgRow) -> Result<DownlinkRecord, StorageError> {
    let status: String = row.try_get("status")?;
    Ok(DownlinkRecord {
        correlation_id: row.try_get("correlation_id")?,
        device_key: row.try_get("device_key")?,
        application_id: row.try_get("application_id")?,
        f_port: from_i32("f_port", row.try_get("f_port")?)?,
        payload: row.try_get("payload")?,
        status: parse_column("status", &status, DownlinkStatus::parse)?,
        created_at_ms: row.try_get("created_at_ms")?,
        scheduled_at_ms: row.try_get("scheduled_at_ms")?,
        sent_at_ms: row.try_get("sent_at_ms")?,
        acknowledged_at_ms: row.try_get("acknowledged_at_ms")?,
        failed_at_ms: row.try_get("failed_at_ms")?,
        failure_reason: row.try_get("failure_reason")?,
    })
}

#[async_trait::async_trait]
impl DownlinkStore for PgDownlinkStore {
    async fn create_downlink(&self, record: DownlinkRecord) -> Result<DownlinkRecord, StorageError> {
        sqlx::query(
            "insert into lorawan_downlinks \
             (correlation_id, device_key, application_id, f_port, payload, status, created_at_ms, \
             scheduled_at_ms, sent_at_ms, acknowledged_at_ms, failed_at_ms, failure_reason) \
             values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(&record.correlation_id)
        .bind(&record.device_key)
        .bind(&record.application_id)
        .bind(to_i32(record.f_port))
        .bind(&record.payload)
        .bind(record.status.as_str())
        .bind(record.created_at_ms)
        .bind(record.scheduled_at_ms)
        .bind(record.sent_at_ms)
        .bind(record.acknowledged_at_ms)
        .bind(record.failed_at_ms)
        .bind(&record.failure_reason)
        .execute(&self.pool)
        .await?;
        Ok(record)
    }

    async fn find_downlink(
        &self,
        correlation_id: &str,
    ) -> Result<Option<DownlinkRecord>, StorageError> {
        let row = sqlx::query(&format!(
            "select {} from lorawan_downlinks where correlation_id = $1",
            DOWNLINK_COLUMNS
        ))
        .bind(correlation_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(downlink_from_row).transpose()
    }

    async fn advance_downlink(
        &self,
        correlation_id: &str,
        next: DownlinkStatus,
        at_ms: i64,
        failure_reason: Option<String>,
    ) -> Result<DownlinkAdvance, StorageError> {
        let from: Vec<String> = DownlinkStatus::predecessors(next)
            .iter()
            .map(|status| status.as_str().to_string())
            .collect();
        let row = sqlx::query(&format!(
            "update lorawan_downlinks set status = $2::text, \
             scheduled_at_ms = case when $2::text = 'SCHEDULED' then $3 else scheduled_at_ms end, \
             sent_at_ms = case when $2::text = 'SENT' then $3 else sent_at_ms end, \
             acknowledged_at_ms = case when $2::text = 'ACKNOWLEDGED' then $3 else acknowledged_at_ms end, \
             failed_at_ms = case when $2::text = 'FAILED' then $3 else failed_at_ms end, \
             failure_reason = case when $2::text = 'FAILED' then $4 else failure_reason end \
             where correlation_id = $1 and status = any($5) \
             returning {}",
            DOWNLINK_COLUMNS
        ))
        .bind(correlation_id)
        .bind(next.as_str())
        .bind(at_ms)
        .bind(failure_reason)
        .bind(from)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(row) = row {
            return Ok(DownlinkAdvance::Applied(downlink_from_row(&row)?));
        }
        match self.find_downlink(correlation_id).await? {
            Some(record) => Ok(DownlinkAdvance::Ignored(record)),
            None => Ok(DownlinkAdvance::NotFound),
        }
    }

    async fn list_downlinks(
        &self,
        device_key: &str,
        limit: usize,
    ) -> Result<Vec<DownlinkRecord>, StorageError> {
        let rows = sqlx::query(&format!(
            "select {} from lorawan_downlinks where device_key = $1 \
             order by created_at_ms desc \
             limit $2",
            DOWNLINK_COLUMNS
        ))
        .bind(device_key)
        .bind(super::limit_param(limit))
        .fetch_all(&self.pool)
        .await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            items.push(downlink_from_row(row)?);
        }
        Ok(items)
    }
}
