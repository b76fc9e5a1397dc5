//! 设备在线状态跟踪。
//!
//! - `touch`：任意入站消息都会刷新 last_seen 并立即置为在线
//! - `sweep`：周期扫描，把超时的在线 key 置为离线
//!
//! 每个边沿只产生一次 `PresenceTransition`。扫描对每个 key 使用条件更新，
//! 与并发的 touch 竞争时 touch 获胜（last_seen 已刷新，条件不再成立）。

use domain::{DeviceKey, DevicePresence, PresenceTransition};
use fleet_storage::{PresenceStore, StorageError};
use fleet_telemetry::record_presence_transition;
use std::sync::Arc;
use tracing::{info, warn};

/// 默认离线超时（毫秒）。
pub const DEFAULT_PRESENCE_TIMEOUT_MS: i64 = 15_000;

#[derive(Clone)]
pub struct PresenceTracker {
    store: Arc<dyn PresenceStore>,
    timeout_ms: i64,
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn PresenceStore>, timeout_ms: i64) -> Self {
        Self {
            store,
            timeout_ms: timeout_ms.max(1),
        }
    }

    pub fn timeout_ms(&self) -> i64 {
        self.timeout_ms
    }

    /// 刷新 last_seen；之前离线或未知时返回上线边沿。
    pub async fn touch(
        &self,
        key: &DeviceKey,
        now_ms: i64,
    ) -> Result<Option<PresenceTransition>, StorageError> {
        let touched = self.store.touch(key, now_ms).await?;
        if !touched.came_online {
            return Ok(None);
        }
        record_presence_transition(true);
        info!(
            target: "fleet.presence",
            device_key = %key,
            last_seen_ms = touched.presence.last_seen_ms,
            "presence_online"
        );
        Ok(Some(PresenceTransition {
            device_key: key.clone(),
            online: true,
            at_ms: now_ms,
            last_seen_ms: touched.presence.last_seen_ms,
        }))
    }

    /// 扫描所有在线 key，把 `now - last_seen > timeout` 的置为离线。
    ///
    /// 单个 key 的存储错误只记录日志，不影响其它 key。
    pub async fn sweep(&self, now_ms: i64) -> Result<Vec<PresenceTransition>, StorageError> {
        let entries = self.store.list_presence().await?;
        let mut transitions = Vec::new();
        for entry in entries
            .iter()
            .filter(|entry| entry.is_online && entry.is_stale(now_ms, self.timeout_ms))
        {
            match self
                .store
                .mark_offline_if_stale(&entry.device_key, now_ms, self.timeout_ms)
                .await
            {
                Ok(Some(presence)) => {
                    transitions.push(self.offline_transition(presence, now_ms, "timeout"));
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(
                        target: "fleet.presence",
                        device_key = %entry.device_key,
                        error = %err,
                        "presence_sweep_entry_failed"
                    );
                }
            }
        }
        Ok(transitions)
    }

    /// 设备显式上报离线。之前在线时返回离线边沿。
    pub async fn set_offline(
        &self,
        key: &DeviceKey,
        now_ms: i64,
    ) -> Result<Option<PresenceTransition>, StorageError> {
        let presence = self.store.mark_offline(key).await?;
        Ok(presence.map(|presence| self.offline_transition(presence, now_ms, "reported")))
    }

    /// 清除记录（含 connected_since）。
    pub async fn clear(&self, key: &DeviceKey) -> Result<bool, StorageError> {
        self.store.clear_presence(key).await
    }

    pub async fn get(&self, key: &DeviceKey) -> Result<Option<DevicePresence>, StorageError> {
        self.store.find_presence(key).await
    }

    pub async fn list(&self) -> Result<Vec<DevicePresence>, StorageError> {
        self.store.list_presence().await
    }

    fn offline_transition(
        &self,
        presence: DevicePresence,
        now_ms: i64,
        reason: &'static str,
    ) -> PresenceTransition {
        record_presence_transition(false);
        info!(
            target: "fleet.presence",
            device_key = %presence.device_key,
            last_seen_ms = presence.last_seen_ms,
            reason,
            "presence_offline"
        );
        PresenceTransition {
            device_key: presence.device_key,
            online: false,
            at_ms: now_ms,
            last_seen_ms: presence.last_seen_ms,
        }
    }
}
