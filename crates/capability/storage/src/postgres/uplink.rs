//! Postgres 上行记录存储实现

use super::{from_i32, from_i64, limit_param, to_i32, to_i64};
use crate::error::StorageError;
use crate::traits::UplinkStore;
use domain::{GatewayReception, UplinkRecord};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};

/// `gateways` jsonb 列的元素。
#[derive(Serialize, Deserialize)]
struct GatewayJson {
    gateway_id: String,
    rssi: f64,
    snr: f64,
}

pub struct PgUplinkStore {
    pub pool: PgPool,
}

impl PgUplinkStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl UplinkStore for PgUplinkStore {
    async fn append_uplink(&self, record: UplinkRecord) -> Result<(), StorageError> {
        let gateways: Vec<GatewayJson> = record
            .gateways
            .iter()
            .map(|item| GatewayJson {
                gateway_id: item.gateway_id.clone(),
                rssi: item.rssi,
                snr: item.snr,
            })
            .collect();
        let gateways = serde_json::to_string(&gateways)
            .map_err(|err| StorageError::new(err.to_string()))?;
        sqlx::query(
            "insert into lorawan_uplinks \
             (device_key, application_id, f_port, f_cnt, raw_payload, decoded_payload, rssi, snr, \
             spreading_factor, bandwidth, frequency, gateways, received_at_ms) \
             values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12::jsonb, $13)",
        )
        .bind(&record.device_key)
        .bind(&record.application_id)
        .bind(record.f_port.map(to_i32))
        .bind(record.f_cnt.map(i64::from))
        .bind(&record.raw_payload)
        .bind(&record.decoded_payload)
        .bind(record.rssi)
        .bind(record.snr)
        .bind(record.spreading_factor.map(to_i32))
        .bind(record.bandwidth.map(i64::from))
        .bind(record.frequency.map(to_i64))
        .bind(gateways)
        .bind(record.received_at_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_uplinks(
        &self,
        device_key: &str,
        limit: usize,
    ) -> Result<Vec<UplinkRecord>, StorageError> {
        let rows = sqlx::query(
            "select device_key, application_id, f_port, f_cnt, raw_payload, decoded_payload, \
             rssi, snr, spreading_factor, bandwidth, frequency, gateways::text as gateways, \
             received_at_ms \
             from lorawan_uplinks where device_key = $1 \
             order by received_at_ms desc, id desc \
             limit $2",
        )
        .bind(device_key)
        .bind(limit_param(limit))
        .fetch_all(&self.pool)
        .await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let gateways: String = row.try_get("gateways")?;
            let gateways: Vec<GatewayJson> = serde_json::from_str(&gateways)
                .map_err(|err| StorageError::new(err.to_string()))?;
            let f_port: Option<i32> = row.try_get("f_port")?;
            let f_cnt: Option<i64> = row.try_get("f_cnt")?;
            let spreading_factor: Option<i32> = row.try_get("spreading_factor")?;
            let bandwidth: Option<i64> = row.try_get("bandwidth")?;
            let frequency: Option<i64> = row.try_get("frequency")?;
            items.push(UplinkRecord {
                device_key: row.try_get("device_key")?,
                application_id: row.try_get("application_id")?,
                f_port: f_port.map(|value| from_i32("f_port", value)).transpose()?,
                f_cnt: f_cnt
                    .map(|value| {
                        u32::try_from(value)
                            .map_err(|_| StorageError::new(format!("invalid f_cnt: {}", value)))
                    })
                    .transpose()?,
                raw_payload: row.try_get("raw_payload")?,
                decoded_payload: row.try_get("decoded_payload")?,
                rssi: row.try_get("rssi")?,
                snr: row.try_get("snr")?,
                spreading_factor: spreading_factor
                    .map(|value| from_i32("spreading_factor", value))
                    .transpose()?,
                bandwidth: bandwidth
                    .map(|value| {
                        u32::try_from(value)
                            .map_err(|_| StorageError::new(format!("invalid bandwidth: {}", value)))
                    })
                    .transpose()?,
                frequency: frequency
                    .map(|value| from_i64("frequency", value))
                    .transpose()?,
                gateways: gateways
                    .into_iter()
                    .map(|item| GatewayReception {
                        gateway_id: item.gateway_id,
                        rssi: item.rssi,
                        snr: item.snr,
                    })
                    .collect(),
                received_at_ms: row.try_get("received_at_ms")?,
            });
        }
        Ok(items)
    }
}
