//! 下行发送与关联跟踪。
//!
//! 下行记录以本进程生成的 correlation ID 标识，网络服务器回传的
//! queued / sent / ack / failed 事件只推动已存在记录的前进流转；
//! 未知 ID、重复事件、回退事件都是无操作。

use api_contract::{DownlinkPushEnvelope, RealtimeEvent};
use domain::{DownlinkRecord, DownlinkStatus};
use fleet_realtime::{RealtimeChannel, RealtimeHub};
use fleet_scheduler::Scheduler;
use fleet_storage::{DownlinkAdvance, DownlinkStore, StorageError};
use fleet_telemetry::record_downlink_transition;
use fleet_transport::{QoS, TransportAdapter};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum DownlinkError {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("payload error: {0}")]
    Payload(String),
}

impl From<StorageError> for DownlinkError {
    fn from(err: StorageError) -> Self {
        DownlinkError::Storage(err.to_string())
    }
}

/// 下行 topic：`lorawan/{devEui}/down/push`。
pub fn downlink_topic(dev_eui: &str) -> String {
    format!("lorawan/{}/down/push", dev_eui)
}

fn status_event(record: &DownlinkRecord, at_ms: i64) -> RealtimeEvent {
    RealtimeEvent::DownlinkStatus {
        correlation_id: record.correlation_id.clone(),
        device_id: record.device_key.clone(),
        status: record.status.as_str().to_string(),
        failure_reason: record.failure_reason.clone(),
        at: at_ms,
    }
}

/// 下行关联跟踪器。
#[derive(Clone)]
pub struct DownlinkCorrelationTracker {
    store: Arc<dyn DownlinkStore>,
    hub: RealtimeHub,
}

impl DownlinkCorrelationTracker {
    pub fn new(store: Arc<dyn DownlinkStore>, hub: RealtimeHub) -> Self {
        Self { store, hub }
    }

    /// 逐个处理关联 ID，单个 ID 的存储错误不影响其他 ID。
    pub async fn on_event(
        &self,
        correlation_ids: &[String],
        status: DownlinkStatus,
        at_ms: i64,
        failure_reason: Option<&str>,
    ) -> Vec<(String, DownlinkAdvance)> {
        let mut outcomes = Vec::with_capacity(correlation_ids.len());
        for correlation_id in correlation_ids.iter() {
            let advance = self
                .store
                .advance_downlink(
                    correlation_id,
                    status,
                    at_ms,
                    failure_reason.map(str::to_string),
                )
                .await;
            let advance = match advance {
                Ok(advance) => advance,
                Err(err) => {
                    warn!(
                        target: "fleet.lorawan",
                        correlation_id = %correlation_id,
                        status = status.as_str(),
                        error = %err,
                        "downlink_advance_failed"
                    );
                    continue;
                }
            };
            match &advance {
                DownlinkAdvance::Applied(record) => {
                    record_downlink_transition(true);
                    info!(
                        target: "fleet.lorawan",
                        correlation_id = %correlation_id,
                        dev_eui = %record.device_key,
                        status = status.as_str(),
                        "downlink_status_changed"
                    );
                    self.hub.publish(
                        &RealtimeChannel::Lorawan(record.application_id.clone()),
                        status_event(record, at_ms),
                    );
                }
                DownlinkAdvance::Ignored(record) => {
                    record_downlink_transition(false);
                    debug!(
                        target: "fleet.lorawan",
                        correlation_id = %correlation_id,
                        current = record.status.as_str(),
                        requested = status.as_str(),
                        "downlink_transition_ignored"
                    );
                }
                DownlinkAdvance::NotFound => {
                    debug!(
                        target: "fleet.lorawan",
                        correlation_id = %correlation_id,
                        "downlink_unknown_correlation"
                    );
                }
            }
            outcomes.push((correlation_id.clone(), advance));
        }
        outcomes
    }

    pub async fn get(&self, correlation_id: &str) -> Result<Option<DownlinkRecord>, StorageError> {
        self.store.find_downlink(correlation_id).await
    }

    pub async fn list(
        &self,
        dev_eui: &str,
        limit: usize,
    ) -> Result<Vec<DownlinkRecord>, StorageError> {
        self.store.list_downlinks(dev_eui, limit).await
    }
}

/// 下行请求。
#[derive(Debug, Clone, PartialEq)]
pub struct DownlinkRequest {
    pub dev_eui: String,
    pub application_id: String,
    pub f_port: u32,
    /// base64 编码的原始负载。
    pub payload: String,
    pub confirmed: bool,
}

/// 下行发送服务。
#[derive(Clone)]
pub struct DownlinkService {
    store: Arc<dyn DownlinkStore>,
    transport: Arc<dyn TransportAdapter>,
    scheduler: Arc<dyn Scheduler>,
    tracker: DownlinkCorrelationTracker,
    qos: QoS,
}

impl DownlinkService {
    pub fn new(
        store: Arc<dyn DownlinkStore>,
        transport: Arc<dyn TransportAdapter>,
        scheduler: Arc<dyn Scheduler>,
        tracker: DownlinkCorrelationTracker,
        qos: QoS,
    ) -> Self {
        Self {
            store,
            transport,
            scheduler,
            tracker,
            qos,
        }
    }

    /// 创建 PENDING 记录并发布；发布失败时记录转为 FAILED。
    pub async fn send(&self, request: DownlinkRequest) -> Result<DownlinkRecord, DownlinkError> {
        let created_at_ms = self.scheduler.now_ms();
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let envelope = DownlinkPushEnvelope {
            correlation_ids: vec![correlation_id.clone()],
            f_port: request.f_port,
            payload: request.payload.clone(),
            confirmed: request.confirmed,
        };
        let payload =
            serde_json::to_vec(&envelope).map_err(|err| DownlinkError::Payload(err.to_string()))?;
        let record = self
            .store
            .create_downlink(DownlinkRecord {
                correlation_id: correlation_id.clone(),
                device_key: request.dev_eui.clone(),
                application_id: request.application_id.clone(),
                f_port: request.f_port,
                payload: request.payload,
                status: DownlinkStatus::Pending,
                created_at_ms,
                scheduled_at_ms: None,
                sent_at_ms: None,
                acknowledged_at_ms: None,
                failed_at_ms: None,
                failure_reason: None,
            })
            .await?;

        let topic = downlink_topic(&request.dev_eui);
        match self.transport.publish(&topic, payload, self.qos).await {
            Ok(()) => {
                info!(
                    target: "fleet.lorawan",
                    correlation_id = %correlation_id,
                    dev_eui = %request.dev_eui,
                    f_port = request.f_port,
                    confirmed = request.confirmed,
                    "downlink_published"
                );
                Ok(record)
            }
            Err(err) => {
                warn!(
                    target: "fleet.lorawan",
                    correlation_id = %correlation_id,
                    topic = %topic,
                    error = %err,
                    "downlink_publish_failed"
                );
                let reason = err.to_string();
                let failed_at_ms = self.scheduler.now_ms();
                self.tracker
                    .on_event(
                        std::slice::from_ref(&correlation_id),
                        DownlinkStatus::Failed,
                        failed_at_ms,
                        Some(&reason),
                    )
                    .await;
                Ok(self
                    .store
                    .find_downlink(&correlation_id)
                    .await?
                    .unwrap_or(record))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_topic_uses_dev_eui() {
        assert_eq!(
            downlink_topic("70b3d57ed0000001"),
            "lorawan/70b3d57ed0000001/down/push"
        );
    }
}
