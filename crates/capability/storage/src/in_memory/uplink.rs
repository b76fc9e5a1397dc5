//! 上行记录内存实现（只追加）

use crate::error::StorageError;
use crate::traits::UplinkStore;
use domain::UplinkRecord;
use std::sync::RwLock;

pub struct InMemoryUplinkStore {
    uplinks: RwLock<Vec<UplinkRecord>>,
}

impl InMemoryUplinkStore {
    pub fn new() -> Self {
        Self {
            uplinks: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryUplinkStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl UplinkStore for InMemoryUplinkStore {
    async fn append_uplink(&self, record: UplinkRecord) -> Result<(), StorageError> {
        let mut uplinks = self
            .uplinks
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        uplinks.push(record);
        Ok(())
    }

    async fn list_uplinks(
        &self,
        device_key: &str,
        limit: usize,
    ) -> Result<Vec<UplinkRecord>, StorageError> {
        let uplinks = self
            .uplinks
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        let mut items: Vec<UplinkRecord> = uplinks
            .iter()
            .filter(|item| item.device_key == device_key)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.received_at_ms.cmp(&a.received_at_ms));
        if limit > 0 && items.len() > limit {
            items.truncate(limit);
        }
        Ok(items)
    }
}
