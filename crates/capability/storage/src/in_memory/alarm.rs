//! 告警实例内存实现

use crate::error::StorageError;
use crate::traits::AlarmStore;
use domain::{AlarmInstance, TargetRef};
use std::collections::HashMap;
use std::sync::RwLock;

pub struct InMemoryAlarmStore {
    alarms: RwLock<HashMap<TargetRef, Vec<AlarmInstance>>>,
}

impl InMemoryAlarmStore {
    pub fn new() -> Self {
        Self {
            alarms: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryAlarmStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl AlarmStore for InMemoryAlarmStore {
    async fn list_alarms(&self, target: &TargetRef) -> Result<Vec<AlarmInstance>, StorageError> {
        let alarms = self
            .alarms
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(alarms.get(target).cloned().unwrap_or_default())
    }

    async fn insert_alarm_if_absent(
        &self,
        target: &TargetRef,
        alarm: AlarmInstance,
    ) -> Result<bool, StorageError> {
        let mut alarms = self
            .alarms
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let items = alarms.entry(target.clone()).or_default();
        if items
            .iter()
            .any(|item| !item.acknowledged && item.message == alarm.message)
        {
            return Ok(false);
        }
        items.push(alarm);
        Ok(true)
    }

    async fn acknowledge_alarm(
        &self,
        target: &TargetRef,
        alarm_id: &str,
    ) -> Result<bool, StorageError> {
        let mut alarms = self
            .alarms
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let Some(items) = alarms.get_mut(target) else {
            return Ok(false);
        };
        for item in items.iter_mut() {
            if item.alarm_id == alarm_id {
                if item.acknowledged {
                    return Ok(false);
                }
                item.acknowledged = true;
                return Ok(true);
            }
        }
        Ok(false)
    }
}
