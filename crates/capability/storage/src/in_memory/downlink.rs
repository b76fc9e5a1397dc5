//! 下行关联记录内存实现

use crate::error::StorageError;
use crate::traits::{DownlinkAdvance, DownlinkStore};
use domain::{DownlinkRecord, DownlinkStatus};
use std::collections::HashMap;
use std::sync::RwLock;

pub struct InMemoryDownlinkStore {
    downlinks: RwLock<HashMap<String, DownlinkRecord>>,
}

impl InMemoryDownlinkStore {
    pub fn new() -> Self {
        Self {
            downlinks: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryDownlinkStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DownlinkStore for InMemoryDownlinkStore {
    async fn create_downlink(&self, record: DownlinkRecord) -> Result<DownlinkRecord, StorageError> {
        let mut downlinks = self
            .downlinks
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        if downlinks.contains_key(&record.correlation_id) {
            return Err(StorageError::new("downlink already exists"));
        }
        downlinks.insert(record.correlation_id.clone(), record.clone());
        Ok(record)
    }

    async fn find_downlink(
        &self,
        correlation_id: &str,
    ) -> Result<Option<DownlinkRecord>, StorageError> {
        let downlinks = self
            .downlinks
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(downlinks.get(correlation_id).cloned())
    }

    async fn advance_downlink(
        &self,
        correlation_id: &str,
        next: DownlinkStatus,
        at_ms: i64,
        failure_reason: Option<String>,
    ) -> Result<DownlinkAdvance, StorageError> {
        let mut downlinks = self
            .downlinks
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let Some(record) = downlinks.get_mut(correlation_id) else {
            return Ok(DownlinkAdvance::NotFound);
        };
        if record.advance(next, at_ms, failure_reason) {
            Ok(DownlinkAdvance::Applied(record.clone()))
        } else {
            Ok(DownlinkAdvance::Ignored(record.clone()))
        }
    }

    async fn list_downlinks(
        &self,
        device_key: &str,
        limit: usize,
    ) -> Result<Vec<DownlinkRecord>, StorageError> {
        let downlinks = self
            .downlinks
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        let mut items: Vec<DownlinkRecord> = downlinks
            .values()
            .filter(|item| item.device_key == device_key)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms));
        if limit > 0 && items.len() > limit {
            items.truncate(limit);
        }
        Ok(items)
    }
}
