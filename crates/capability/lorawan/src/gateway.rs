//! 网关信号统计。

use api_contract::RealtimeEvent;
use domain::GatewayMetrics;
use fleet_realtime::{RealtimeChannel, RealtimeHub};
use fleet_storage::{GatewayMetricsStore, StorageError};
use std::sync::Arc;
use tracing::{debug, info};

fn gateway_event(metrics: &GatewayMetrics) -> RealtimeEvent {
    RealtimeEvent::GatewayUpdate {
        gateway_id: metrics.gateway_key.clone(),
        total_seen: metrics.total_seen,
        avg_rssi: metrics.avg_rssi,
        avg_snr: metrics.avg_snr,
        last_rssi: metrics.last_rssi,
        last_snr: metrics.last_snr,
        is_online: metrics.is_online,
        last_seen: metrics.last_seen_ms,
    }
}

/// 按网关累计 RSSI / SNR 的滑动均值。
#[derive(Clone)]
pub struct GatewayMetricsAggregator {
    store: Arc<dyn GatewayMetricsStore>,
    hub: RealtimeHub,
}

impl GatewayMetricsAggregator {
    pub fn new(store: Arc<dyn GatewayMetricsStore>, hub: RealtimeHub) -> Self {
        Self { store, hub }
    }

    /// 一条上行中每个网关条目调用一次。
    pub async fn record_uplink(
        &self,
        gateway_key: &str,
        rssi: f64,
        snr: f64,
        at_ms: i64,
    ) -> Result<GatewayMetrics, StorageError> {
        let metrics = self.store.record_sample(gateway_key, rssi, snr, at_ms).await?;
        debug!(
            target: "fleet.lorawan",
            gateway = %gateway_key,
            total_seen = metrics.total_seen,
            avg_rssi = metrics.avg_rssi,
            avg_snr = metrics.avg_snr,
            "gateway_sample_recorded"
        );
        self.hub
            .publish(&RealtimeChannel::Gateways, gateway_event(&metrics));
        Ok(metrics)
    }

    /// 网关在线状态超时后调用。
    pub async fn mark_offline(
        &self,
        gateway_key: &str,
    ) -> Result<Option<GatewayMetrics>, StorageError> {
        let updated = self.store.set_gateway_online(gateway_key, false).await?;
        if let Some(metrics) = updated.as_ref() {
            info!(target: "fleet.lorawan", gateway = %gateway_key, "gateway_offline");
            self.hub
                .publish(&RealtimeChannel::Gateways, gateway_event(metrics));
        }
        Ok(updated)
    }

    pub async fn get(&self, gateway_key: &str) -> Result<Option<GatewayMetrics>, StorageError> {
        self.store.find_gateway_metrics(gateway_key).await
    }

    pub async fn list(&self) -> Result<Vec<GatewayMetrics>, StorageError> {
        self.store.list_gateway_metrics().await
    }
}
