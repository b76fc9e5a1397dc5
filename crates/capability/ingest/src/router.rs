//! 入站消息分发。
//!
//! 每条消息由运行时单独 spawn 一个任务处理，同一个 key 的消息可能并发到达；
//! 这里只调用各存储的单 key 原子操作，不做跨 await 的“先读后写”。

use crate::RouteError;
use crate::payload::{
    AckPayload, DownlinkEventPayload, ManifoldStatusPayload, OnlinePayload, TtnUplinkPayload,
    UplinkPayload, numeric_fields,
};
use crate::topic::{RoutedTopic, TopicDomain, TopicEvent, parse_topic};
use api_contract::{RealtimeEvent, ValveStatusDto};
use domain::{
    ControlTarget, DeviceKey, DeviceKind, DownlinkStatus, PresenceTransition, TargetRef,
    TargetStatus, UplinkRecord,
};
use fleet_alarm::{AlarmEvaluator, Observation};
use fleet_control::{CommandQueueManager, ControlError};
use fleet_lorawan::{DownlinkCorrelationTracker, GatewayMetricsAggregator};
use fleet_presence::PresenceTracker;
use fleet_realtime::{RealtimeChannel, RealtimeHub};
use fleet_scheduler::Scheduler;
use fleet_storage::{DownlinkAdvance, StorageError, TargetStore, UplinkStore};
use fleet_telemetry::{
    record_handler_failure, record_ignored_event, record_message_received, record_parse_failure,
    record_unroutable_topic, record_uplink_recorded,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 未携带应用 ID 的原生 LoRaWAN 上行使用的频道。
const DEFAULT_APPLICATION_ID: &str = "default";

/// 路由结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Handled,
    /// 未知事件类型、未知命令 / 关联 ID 等。
    Ignored,
    /// 处理器内部失败（已记录日志）。
    Failed,
}

#[derive(Debug, thiserror::Error)]
enum HandlerError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Control(#[from] ControlError),
}

/// 路由器依赖。
#[derive(Clone)]
pub struct IngestDeps {
    pub presence: PresenceTracker,
    pub commands: CommandQueueManager,
    pub targets: Arc<dyn TargetStore>,
    pub alarms: AlarmEvaluator,
    pub uplinks: Arc<dyn UplinkStore>,
    pub gateways: GatewayMetricsAggregator,
    pub downlinks: DownlinkCorrelationTracker,
    pub hub: RealtimeHub,
    pub scheduler: Arc<dyn Scheduler>,
}

/// 入站消息路由器。
#[derive(Clone)]
pub struct Router {
    deps: IngestDeps,
}

fn parse_json<T: DeserializeOwned>(topic: &str, payload: &[u8]) -> Result<T, RouteError> {
    serde_json::from_slice(payload).map_err(|err| RouteError::Parse {
        topic: topic.to_string(),
        message: err.to_string(),
    })
}

fn presence_key(routed: &RoutedTopic) -> DeviceKey {
    let kind = match routed.domain {
        TopicDomain::Manifolds => DeviceKind::Manifold,
        TopicDomain::Devices => DeviceKind::Device,
        TopicDomain::Lorawan => DeviceKind::Lorawan,
    };
    DeviceKey::new(kind, routed.key.clone())
}

/// 解码后的入站事件。
enum Inbound {
    ManifoldStatus(ManifoldStatusPayload),
    Ack(AckPayload),
    Heartbeat,
    Online(OnlinePayload),
    DeviceData(Value),
    Uplink(UplinkRecord),
    Join { application_id: String },
    Downlink {
        status: DownlinkStatus,
        event: DownlinkEventPayload,
    },
}

fn join_application_id(routed: &RoutedTopic, body: &Value) -> String {
    if let Some(application_id) = routed.application_id.as_ref() {
        return application_id.clone();
    }
    ["applicationId", "applicationID", "application_id", "applicationName"]
        .iter()
        .find_map(|field| body.get(*field).and_then(Value::as_str))
        .unwrap_or(DEFAULT_APPLICATION_ID)
        .to_string()
}

/// 按事件类型解码负载。只做解析，不触碰任何存储。
fn decode(
    routed: &RoutedTopic,
    event: TopicEvent,
    payload: &[u8],
    now_ms: i64,
) -> Result<Inbound, RouteError> {
    let topic = routed.topic.as_str();
    let inbound = match event {
        TopicEvent::Status => Inbound::ManifoldStatus(parse_json(topic, payload)?),
        TopicEvent::Ack => Inbound::Ack(parse_json(topic, payload)?),
        // 心跳负载不做要求
        TopicEvent::Heartbeat => Inbound::Heartbeat,
        TopicEvent::Online => Inbound::Online(parse_json(topic, payload)?),
        TopicEvent::Data => Inbound::DeviceData(parse_json(topic, payload)?),
        TopicEvent::Uplink => {
            let record = match routed.application_id.as_deref() {
                Some(application_id) => parse_json::<TtnUplinkPayload>(topic, payload)?
                    .into_record(&routed.key, application_id, now_ms),
                None => parse_json::<UplinkPayload>(topic, payload)?.into_record(
                    &routed.key,
                    DEFAULT_APPLICATION_ID,
                    now_ms,
                ),
            };
            Inbound::Uplink(record)
        }
        TopicEvent::Join => {
            let body: Value = parse_json(topic, payload)?;
            Inbound::Join {
                application_id: join_application_id(routed, &body),
            }
        }
        TopicEvent::Downlink(status) => Inbound::Downlink {
            status,
            event: parse_json(topic, payload)?,
        },
    };
    Ok(inbound)
}

impl Router {
    pub fn new(deps: IngestDeps) -> Self {
        Self { deps }
    }

    /// 路由一条入站消息。
    ///
    /// 解析错误与无法路由的 topic 以 `Err` 返回，调用方记录后丢弃；
    /// 处理器内部的存储错误已在这里记录，返回 `Ok(RouteOutcome::Failed)`。
    pub async fn route(&self, topic: &str, payload: &[u8]) -> Result<RouteOutcome, RouteError> {
        record_message_received();
        let routed = match parse_topic(topic) {
            Ok(routed) => routed,
            Err(err) => {
                record_unroutable_topic();
                warn!(target: "fleet.ingest", topic = %topic, "ingest_unroutable_topic");
                return Err(err);
            }
        };
        let Some(event) = routed.event else {
            record_ignored_event();
            debug!(
                target: "fleet.ingest",
                topic = %topic,
                event_type = %routed.event_type,
                "ingest_event_ignored"
            );
            return Ok(RouteOutcome::Ignored);
        };

        let now_ms = self.deps.scheduler.now_ms();
        let inbound = match decode(&routed, event, payload, now_ms) {
            Ok(inbound) => inbound,
            Err(err) => {
                record_parse_failure();
                warn!(target: "fleet.ingest", topic = %topic, error = %err, "ingest_parse_failed");
                return Err(err);
            }
        };

        match self.dispatch(&routed, inbound, now_ms).await {
            Ok(outcome) => {
                if outcome == RouteOutcome::Ignored {
                    record_ignored_event();
                }
                Ok(outcome)
            }
            Err(err) => {
                record_handler_failure();
                warn!(
                    target: "fleet.ingest",
                    topic = %topic,
                    error = %err,
                    "ingest_handler_failed"
                );
                Ok(RouteOutcome::Failed)
            }
        }
    }

    /// 扫描在线状态并广播离线边沿。单次失败只记录日志。
    pub async fn sweep_presence(&self) -> usize {
        let now_ms = self.deps.scheduler.now_ms();
        let transitions = match self.deps.presence.sweep(now_ms).await {
            Ok(transitions) => transitions,
            Err(err) => {
                warn!(target: "fleet.presence", error = %err, "presence_sweep_failed");
                return 0;
            }
        };
        for transition in transitions.iter() {
            self.publish_presence(transition).await;
        }
        transitions.len()
    }

    /// 把在线 / 离线边沿推送到对应频道；网关离线同时更新网关统计。
    pub async fn publish_presence(&self, transition: &PresenceTransition) {
        let key = &transition.device_key;
        match key.kind {
            DeviceKind::Manifold => {
                self.deps.hub.publish(
                    &RealtimeChannel::Manifold(key.id.clone()),
                    RealtimeEvent::ManifoldOnline {
                        manifold_id: key.id.clone(),
                        online: transition.online,
                        last_seen: transition.last_seen_ms,
                    },
                );
            }
            DeviceKind::Device | DeviceKind::Lorawan => {
                self.deps.hub.publish(
                    &RealtimeChannel::Device(key.id.clone()),
                    RealtimeEvent::DeviceStatus {
                        device_key: key.to_string(),
                        online: transition.online,
                        last_seen: transition.last_seen_ms,
                    },
                );
            }
            DeviceKind::Gateway => {
                if transition.online {
                    return;
                }
                if let Err(err) = self.deps.gateways.mark_offline(&key.id).await {
                    record_handler_failure();
                    warn!(
                        target: "fleet.lorawan",
                        gateway = %key.id,
                        error = %err,
                        "gateway_offline_update_failed"
                    );
                }
            }
        }
    }

    async fn dispatch(
        &self,
        routed: &RoutedTopic,
        inbound: Inbound,
        now_ms: i64,
    ) -> Result<RouteOutcome, HandlerError> {
        // 下行事件由网络服务器产生，不代表终端在线
        if !matches!(inbound, Inbound::Downlink { .. } | Inbound::Online(_)) {
            self.touch(&presence_key(routed), now_ms).await?;
        }
        match inbound {
            Inbound::ManifoldStatus(status) => self.on_manifold_status(routed, status, now_ms).await,
            Inbound::Ack(ack) => match self.deps.commands.acknowledge(&ack.command_id, now_ms).await? {
                Some(_) => Ok(RouteOutcome::Handled),
                None => Ok(RouteOutcome::Ignored),
            },
            Inbound::Heartbeat => Ok(RouteOutcome::Handled),
            Inbound::Online(online) => {
                let key = presence_key(routed);
                if online.online {
                    self.touch(&key, now_ms).await?;
                } else if let Some(transition) = self.deps.presence.set_offline(&key, now_ms).await? {
                    self.publish_presence(&transition).await;
                }
                Ok(RouteOutcome::Handled)
            }
            Inbound::DeviceData(data) => self.on_device_data(routed, data, now_ms).await,
            Inbound::Uplink(record) => self.on_uplink(record, now_ms).await,
            Inbound::Join { application_id } => {
                info!(
                    target: "fleet.ingest",
                    dev_eui = %routed.key,
                    application_id = %application_id,
                    "lorawan_join"
                );
                self.deps.hub.publish(
                    &RealtimeChannel::Lorawan(application_id.clone()),
                    RealtimeEvent::Join {
                        device_id: routed.key.clone(),
                        application_id,
                        at: now_ms,
                    },
                );
                Ok(RouteOutcome::Handled)
            }
            Inbound::Downlink { status, event } => {
                let reason = event.reason();
                let outcomes = self
                    .deps
                    .downlinks
                    .on_event(&event.correlation_ids, status, now_ms, reason.as_deref())
                    .await;
                let applied = outcomes
                    .iter()
                    .any(|(_, advance)| matches!(advance, DownlinkAdvance::Applied(_)));
                Ok(if applied {
                    RouteOutcome::Handled
                } else {
                    RouteOutcome::Ignored
                })
            }
        }
    }

    async fn touch(&self, key: &DeviceKey, now_ms: i64) -> Result<(), HandlerError> {
        if let Some(transition) = self.deps.presence.touch(key, now_ms).await? {
            self.publish_presence(&transition).await;
        }
        Ok(())
    }

    /// 观测状态写入目标并评估告警。
    async fn observe(
        &self,
        target: &TargetRef,
        observation: &Observation,
    ) -> Result<ControlTarget, HandlerError> {
        let updated = self
            .deps
            .targets
            .record_observed_status(target, observation.status, observation.at_ms)
            .await?;
        self.deps.alarms.evaluate(&updated, observation).await?;
        Ok(updated)
    }

    async fn on_manifold_status(
        &self,
        routed: &RoutedTopic,
        status: ManifoldStatusPayload,
        now_ms: i64,
    ) -> Result<RouteOutcome, HandlerError> {
        let mut valves = Vec::with_capacity(status.valves.len());
        for valve in status.valves.iter() {
            let target = TargetRef::valve(routed.key.clone(), valve.valve);
            let observation = Observation {
                status: valve.target_status(),
                metrics: valve.metrics(),
                at_ms: now_ms,
            };
            let updated = self.observe(&target, &observation).await?;
            valves.push(ValveStatusDto {
                valve: valve.valve,
                status: updated.current_status.as_str().to_string(),
                cycle_count: updated.cycle_count,
            });
        }
        debug!(
            target: "fleet.ingest",
            manifold_id = %routed.key,
            valves = valves.len(),
            "manifold_status_applied"
        );
        self.deps.hub.publish(
            &RealtimeChannel::Manifold(routed.key.clone()),
            RealtimeEvent::ManifoldStatus {
                manifold_id: routed.key.clone(),
                valves,
                at: now_ms,
            },
        );
        Ok(RouteOutcome::Handled)
    }

    async fn on_device_data(
        &self,
        routed: &RoutedTopic,
        data: Value,
        now_ms: i64,
    ) -> Result<RouteOutcome, HandlerError> {
        // 通用执行器在 data 中携带 status 时同样写入目标并评估告警
        if let Some(object) = data.as_object() {
            let status = object
                .get("status")
                .and_then(Value::as_str)
                .and_then(TargetStatus::parse);
            if let Some(status) = status {
                let observation = Observation {
                    status,
                    metrics: numeric_fields(object),
                    at_ms: now_ms,
                };
                self.observe(&TargetRef::device(routed.key.clone()), &observation)
                    .await?;
            }
        }
        self.deps.hub.publish(
            &RealtimeChannel::Device(routed.key.clone()),
            RealtimeEvent::DeviceData {
                device_id: routed.key.clone(),
                data,
                received_at: now_ms,
            },
        );
        Ok(RouteOutcome::Handled)
    }

    async fn on_uplink(&self, record: UplinkRecord, now_ms: i64) -> Result<RouteOutcome, HandlerError> {
        self.deps.uplinks.append_uplink(record.clone()).await?;
        record_uplink_recorded();
        for gateway in record.gateways.iter() {
            self.deps
                .gateways
                .record_uplink(&gateway.gateway_id, gateway.rssi, gateway.snr, now_ms)
                .await?;
            self.touch(&DeviceKey::gateway(gateway.gateway_id.clone()), now_ms)
                .await?;
        }
        info!(
            target: "fleet.ingest",
            dev_eui = %record.device_key,
            application_id = %record.application_id,
            f_cnt = ?record.f_cnt,
            gateways = record.gateways.len(),
            "uplink_recorded"
        );
        let decoded_payload = record
            .decoded_payload
            .as_deref()
            .and_then(|text| serde_json::from_str::<Value>(text).ok());
        self.deps.hub.publish(
            &RealtimeChannel::Lorawan(record.application_id.clone()),
            RealtimeEvent::Uplink {
                device_id: record.device_key.clone(),
                application_id: record.application_id.clone(),
                f_port: record.f_port,
                f_cnt: record.f_cnt,
                rssi: record.rssi,
                snr: record.snr,
                decoded_payload,
                received_at: now_ms,
            },
        );
        Ok(RouteOutcome::Handled)
    }
}
