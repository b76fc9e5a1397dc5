//! Postgres 网关信号统计实现
//!
//! 均值累加写在 `on conflict do update` 内，`set` 子句引用的都是更新前的行，
//! 同一网关的并发样本由行锁串行化，不会丢失计数。

use super::from_i64;
use crate::error::StorageError;
use crate::traits::GatewayMetricsStore;
use domain::GatewayMetrics;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

const GATEWAY_COLUMNS: &str =
    "gateway_key, total_seen, avg_rssi, avg_snr, last_rssi, last_snr, is_online, last_seen_ms";

pub struct PgGatewayMetricsStore {
    pub pool: PgPool,
}

impl PgGatewayMetricsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn metrics_from_row(row: &PgRow) -> Result<GatewayMetrics, StorageError> {
    Ok(GatewayMetrics {
        gateway_key: row.try_get("gateway_key")?,
        total_seen: from_i64("total_seen", row.try_get("total_seen")?)?,
        avg_rssi: row.try_get("avg_rssi")?,
        avg_snr: row.try_get("avg_snr")?,
        last_rssi: row.try_get("last_rssi")?,
        last_snr: row.try_get("last_snr")?,
        is_online: row.try_get("is_online")?,
        last_seen_ms: row.try_get("last_seen_ms")?,
    })
}

#[async_trait::async_trait]
impl GatewayMetricsStore for PgGatewayMetricsStore {
    async fn record_sample(
        &self,
        gateway_key: &str,
        rssi: f64,
        snr: f64,
        at_ms: i64,
    ) -> Result<GatewayMetrics, StorageError> {
        let row = sqlx::query(&format!(
            "insert into gateway_metrics \
             (gateway_key, total_seen, avg_rssi, avg_snr, last_rssi, last_snr, is_online, last_seen_ms) \
             values ($1, 1, $2, $3, $2, $3, true, $4) \
             on conflict (gateway_key) do update set \
             avg_rssi = (gateway_metrics.avg_rssi * gateway_metrics.total_seen + excluded.last_rssi) \
             / (gateway_metrics.total_seen + 1), \
             avg_snr = (gateway_metrics.avg_snr * gateway_metrics.total_seen + excluded.last_snr) \
             / (gateway_metrics.total_seen + 1), \
             total_seen = gateway_metrics.total_seen + 1, \
             last_rssi = excluded.last_rssi, \
             last_snr = excluded.last_snr, \
             is_online = true, \
             last_seen_ms = greatest(gateway_metrics.last_seen_ms, excluded.last_seen_ms) \
             returning {}",
            GATEWAY_COLUMNS
        ))
        .bind(gateway_key)
        .bind(rssi)
        .bind(snr)
        .bind(at_ms)
        .fetch_one(&self.pool)
        .await?;
        metrics_from_row(&row)
    }

    async fn find_gateway_metrics(
        &self,
        gateway_key: &str,
    ) -> Result<Option<GatewayMetrics>, StorageError> {
        let row = sqlx::query(&format!(
            "select {} from gateway_metrics where gateway_key = $1",
            GATEWAY_COLUMNS
        ))
        .bind(gateway_key)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(metrics_from_row).transpose()
    }

    async fn list_gateway_metrics(&self) -> Result<Vec<GatewayMetrics>, StorageError> {
        let rows = sqlx::query(&format!(
            "select {} from gateway_metrics order by gateway_key",
            GATEWAY_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            items.push(metrics_from_row(row)?);
        }
        Ok(items)
    }

    async fn set_gateway_online(
        &self,
        gateway_key: &str,
        online: bool,
    ) -> Result<Option<GatewayMetrics>, StorageError> {
        let row = sqlx::query(&format!(
            "update gateway_metrics set is_online = $2 where gateway_key = $1 returning {}",
            GATEWAY_COLUMNS
        ))
        .bind(gateway_key)
        .bind(online)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(metrics_from_row).transpose()
    }
}
