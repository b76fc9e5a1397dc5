//! 受控目标内存实现

use crate::error::StorageError;
use crate::traits::TargetStore;
use domain::{ControlTarget, TargetKind, TargetRef, TargetStatus};
use std::collections::HashMap;
use std::sync::RwLock;

pub struct InMemoryTargetStore {
    targets: RwLock<HashMap<TargetRef, ControlTarget>>,
}

impl InMemoryTargetStore {
    pub fn new() -> Self {
        Self {
            targets: RwLock::new(HashMap::new()),
        }
    }

    /// 预置目标（启动时从配置或测试数据装载）。
    pub fn with_targets(items: Vec<ControlTarget>) -> Self {
        let targets = items
            .into_iter()
            .map(|item| (item.target.clone(), item))
            .collect();
        Self {
            targets: RwLock::new(targets),
        }
    }
}

impl Default for InMemoryTargetStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl TargetStore for InMemoryTargetStore {
    async fn upsert_target(&self, target: ControlTarget) -> Result<ControlTarget, StorageError> {
        let mut targets = self
            .targets
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        targets.insert(target.target.clone(), target.clone());
        Ok(target)
    }

    async fn find_target(&self, target: &TargetRef) -> Result<Option<ControlTarget>, StorageError> {
        let targets = self
            .targets
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(targets.get(target).cloned())
    }

    async fn list_targets(
        &self,
        kind: TargetKind,
        target_id: &str,
    ) -> Result<Vec<ControlTarget>, StorageError> {
        let targets = self
            .targets
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        let mut items: Vec<ControlTarget> = targets
            .values()
            .filter(|item| item.target.kind == kind && item.target.target_id == target_id)
            .cloned()
            .collect();
        items.sort_by_key(|item| item.target.target_index);
        Ok(items)
    }

    async fn apply_commanded_status(
        &self,
        target: &TargetRef,
        status: TargetStatus,
        count_cycle: bool,
        at_ms: i64,
    ) -> Result<Option<ControlTarget>, StorageError> {
        let mut targets = self
            .targets
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let Some(item) = targets.get_mut(target) else {
            return Ok(None);
        };
        item.current_status = status;
        item.last_changed_at_ms = Some(at_ms);
        if count_cycle {
            item.cycle_count += 1;
        }
        Ok(Some(item.clone()))
    }

    async fn record_observed_status(
        &self,
        target: &TargetRef,
        status: TargetStatus,
        at_ms: i64,
    ) -> Result<ControlTarget, StorageError> {
        let mut targets = self
            .targets
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let item = targets
            .entry(target.clone())
            .or_insert_with(|| ControlTarget::placeholder(target.clone()));
        if item.current_status != status {
            item.last_changed_at_ms = Some(at_ms);
        }
        item.current_status = status;
        Ok(item.clone())
    }
}
