//! 在线状态内存实现

use crate::error::StorageError;
use crate::traits::{PresenceStore, PresenceTouch};
use domain::{DeviceKey, DevicePresence};
use std::collections::HashMap;
use std::sync::RwLock;

pub struct InMemoryPresenceStore {
    entries: RwLock<HashMap<DeviceKey, DevicePresence>>,
}

impl InMemoryPresenceStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryPresenceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PresenceStore for InMemoryPresenceStore {
    async fn touch(&self, key: &DeviceKey, now_ms: i64) -> Result<PresenceTouch, StorageError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let entry = entries.entry(key.clone()).or_insert_with(|| DevicePresence {
            device_key: key.clone(),
            is_online: false,
            last_seen_ms: now_ms,
            connected_since_ms: None,
        });
        let came_online = !entry.is_online;
        entry.is_online = true;
        entry.last_seen_ms = entry.last_seen_ms.max(now_ms);
        if entry.connected_since_ms.is_none() {
            entry.connected_since_ms = Some(now_ms);
        }
        Ok(PresenceTouch {
            presence: entry.clone(),
            came_online,
        })
    }

    async fn mark_offline_if_stale(
        &self,
        key: &DeviceKey,
        now_ms: i64,
        timeout_ms: i64,
    ) -> Result<Option<DevicePresence>, StorageError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let Some(entry) = entries.get_mut(key) else {
            return Ok(None);
        };
        if !entry.is_online || !entry.is_stale(now_ms, timeout_ms) {
            return Ok(None);
        }
        entry.is_online = false;
        Ok(Some(entry.clone()))
    }

    async fn mark_offline(&self, key: &DeviceKey) -> Result<Option<DevicePresence>, StorageError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let Some(entry) = entries.get_mut(key) else {
            return Ok(None);
        };
        if !entry.is_online {
            return Ok(None);
        }
        entry.is_online = false;
        Ok(Some(entry.clone()))
    }

    async fn find_presence(&self, key: &DeviceKey) -> Result<Option<DevicePresence>, StorageError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(entries.get(key).cloned())
    }

    async fn list_presence(&self) -> Result<Vec<DevicePresence>, StorageError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        let mut items: Vec<DevicePresence> = entries.values().cloned().collect();
        items.sort_by(|a, b| a.device_key.cmp(&b.device_key));
        Ok(items)
    }

    async fn clear_presence(&self, key: &DeviceKey) -> Result<bool, StorageError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(entries.remove(key).is_some())
    }
}
