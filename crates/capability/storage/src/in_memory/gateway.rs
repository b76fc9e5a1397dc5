//! 网关信号统计内存实现

use crate::error::StorageError;
use crate::traits::GatewayMetricsStore;
use domain::GatewayMetrics;
use std::collections::HashMap;
use std::sync::RwLock;

pub struct InMemoryGatewayMetricsStore {
    gateways: RwLock<HashMap<String, GatewayMetrics>>,
}

impl InMemoryGatewayMetricsStore {
    pub fn new() -> Self {
        Self {
            gateways: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryGatewayMetricsStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl GatewayMetricsStore for InMemoryGatewayMetricsStore {
    async fn record_sample(
        &self,
        gateway_key: &str,
        rssi: f64,
        snr: f64,
        at_ms: i64,
    ) -> Result<GatewayMetrics, StorageError> {
        let mut gateways = self
            .gateways
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let next = match gateways.get(gateway_key) {
            Some(current) => current.with_sample(rssi, snr, at_ms),
            None => GatewayMetrics::first_sample(gateway_key, rssi, snr, at_ms),
        };
        gateways.insert(gateway_key.to_string(), next.clone());
        Ok(next)
    }

    async fn find_gateway_metrics(
        &self,
        gateway_key: &str,
    ) -> Result<Option<GatewayMetrics>, StorageError> {
        let gateways = self
            .gateways
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(gateways.get(gateway_key).cloned())
    }

    async fn list_gateway_metrics(&self) -> Result<Vec<GatewayMetrics>, StorageError> {
        let gateways = self
            .gateways
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        let mut items: Vec<GatewayMetrics> = gateways.values().cloned().collect();
        items.sort_by(|a, b| a.gateway_key.cmp(&b.gateway_key));
        Ok(items)
    }

    async fn set_gateway_online(
        &self,
        gateway_key: &str,
        online: bool,
    ) -> Result<Option<GatewayMetrics>, StorageError> {
        let mut gateways = self
            .gateways
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let Some(item) = gateways.get_mut(gateway_key) else {
            return Ok(None);
        };
        item.is_online = online;
        Ok(Some(item.clone()))
    }
}
