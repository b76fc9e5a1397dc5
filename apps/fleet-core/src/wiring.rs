//! 运行时装配
//!
//! 按配置选择存储后端与传输后端，把各能力模块组装成一个 `FleetCore`：
//! 入站消息交给 `Router`，两个周期扫描与指标日志交给 `Scheduler`。

use fleet_alarm::AlarmEvaluator;
use fleet_config::{AppConfig, StorageBackend, TransportKind};
use fleet_control::{CommandQueueConfig, CommandQueueManager};
use fleet_ingest::{IngestDeps, Router};
use fleet_lorawan::{DownlinkCorrelationTracker, DownlinkService, GatewayMetricsAggregator};
use fleet_presence::PresenceTracker;
use fleet_realtime::RealtimeHub;
use fleet_scheduler::{Scheduler, repeating};
use fleet_storage::{
    AlarmStore, CommandStore, DownlinkStore, GatewayMetricsStore, InMemoryAlarmStore,
    InMemoryCommandStore, InMemoryDownlinkStore, InMemoryGatewayMetricsStore,
    InMemoryPresenceStore, InMemoryTargetStore, InMemoryUplinkStore, PgAlarmStore, PgCommandStore,
    PgDownlinkStore, PgGatewayMetricsStore, PgTargetStore, PgUplinkStore, PresenceStore,
    RedisPresenceStore, StorageError, TargetStore, UplinkStore, connect_pool, run_migrations,
};
use fleet_telemetry::metrics;
use fleet_transport::{
    CloudTlsSettings, InboundMessage, MqttSettings, TransportAdapter, TransportSettings,
    qos_from_u8,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, info, warn};

/// 各实体的存储实现。
pub struct Stores {
    pub commands: Arc<dyn CommandStore>,
    pub targets: Arc<dyn TargetStore>,
    pub alarms: Arc<dyn AlarmStore>,
    pub presence: Arc<dyn PresenceStore>,
    pub uplinks: Arc<dyn UplinkStore>,
    pub gateways: Arc<dyn GatewayMetricsStore>,
    pub downlinks: Arc<dyn DownlinkStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            commands: Arc::new(InMemoryCommandStore::new()),
            targets: Arc::new(InMemoryTargetStore::new()),
            alarms: Arc::new(InMemoryAlarmStore::new()),
            presence: Arc::new(InMemoryPresenceStore::new()),
            uplinks: Arc::new(InMemoryUplinkStore::new()),
            gateways: Arc::new(InMemoryGatewayMetricsStore::new()),
            downlinks: Arc::new(InMemoryDownlinkStore::new()),
        }
    }

    /// 按配置建立存储；在线状态在配置了 Redis 时使用 Redis。
    pub async fn from_config(config: &AppConfig) -> Result<Self, StorageError> {
        let mut stores = match (config.storage_backend, config.database_url.as_deref()) {
            (StorageBackend::Postgres, Some(database_url)) => {
                let pool = connect_pool(database_url).await?;
                run_migrations(&pool).await?;
                info!(target: "fleet.storage", backend = "postgres", "storage_ready");
                Self {
                    commands: Arc::new(PgCommandStore::new(pool.clone())),
                    targets: Arc::new(PgTargetStore::new(pool.clone())),
                    alarms: Arc::new(PgAlarmStore::new(pool.clone())),
                    presence: Arc::new(InMemoryPresenceStore::new()),
                    uplinks: Arc::new(PgUplinkStore::new(pool.clone())),
                    gateways: Arc::new(PgGatewayMetricsStore::new(pool.clone())),
                    downlinks: Arc::new(PgDownlinkStore::new(pool)),
                }
            }
            (StorageBackend::Postgres, None) => {
                return Err(StorageError::new("postgres storage requires a database url"));
            }
            (StorageBackend::Memory, _) => {
                info!(target: "fleet.storage", backend = "memory", "storage_ready");
                Self::in_memory()
            }
        };
        if let Some(redis_url) = config.redis_url.as_deref() {
            stores.presence = Arc::new(RedisPresenceStore::connect(redis_url)?);
            info!(target: "fleet.storage", backend = "redis", "presence_store_ready");
        }
        Ok(stores)
    }
}

/// 按配置生成传输参数。
pub fn transport_settings(config: &AppConfig) -> TransportSettings {
    let mqtt = MqttSettings {
        host: config.mqtt_host.clone(),
        port: config.mqtt_port,
        username: config.mqtt_username.clone(),
        password: config.mqtt_password.clone(),
        client_id: config.mqtt_client_id.clone(),
        keep_alive_secs: config.mqtt_keep_alive_secs,
        reconnect_backoff_ms: config.transport_reconnect_backoff_ms,
    };
    match (config.transport_kind, config.cloud_tls.as_ref()) {
        (TransportKind::Embedded, _) => TransportSettings::Embedded,
        (TransportKind::Remote, _) | (TransportKind::Cloud, None) => TransportSettings::Remote(mqtt),
        (TransportKind::Cloud, Some(tls)) => TransportSettings::Cloud(
            mqtt,
            CloudTlsSettings {
                ca_path: tls.ca_path.clone(),
                cert_path: tls.cert_path.clone(),
                key_path: tls.key_path.clone(),
                topic_namespace: tls.topic_namespace.clone(),
            },
        ),
    }
}

/// 组装完成的消息核心。
#[derive(Clone)]
pub struct FleetCore {
    pub router: Router,
    pub commands: CommandQueueManager,
    pub downlinks: DownlinkService,
    pub hub: RealtimeHub,
    scheduler: Arc<dyn Scheduler>,
}

impl FleetCore {
    pub fn new(
        config: &AppConfig,
        stores: Stores,
        transport: Arc<dyn TransportAdapter>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        let hub = RealtimeHub::new();
        let command_qos = qos_from_u8(config.command_qos);
        let presence = PresenceTracker::new(
            stores.presence,
            (config.presence_timeout_secs as i64).saturating_mul(1_000),
        );
        let commands = CommandQueueManager::new(
            stores.commands,
            stores.targets.clone(),
            transport.clone(),
            scheduler.clone(),
            hub.clone(),
            CommandQueueConfig {
                command_timeout_ms: (config.command_timeout_secs as i64).saturating_mul(1_000),
                qos: command_qos,
            },
        );
        let tracker = DownlinkCorrelationTracker::new(stores.downlinks.clone(), hub.clone());
        let downlinks = DownlinkService::new(
            stores.downlinks,
            transport,
            scheduler.clone(),
            tracker.clone(),
            command_qos,
        );
        let router = Router::new(IngestDeps {
            presence,
            commands: commands.clone(),
            targets: stores.targets,
            alarms: AlarmEvaluator::new(stores.alarms, hub.clone()),
            uplinks: stores.uplinks,
            gateways: GatewayMetricsAggregator::new(stores.gateways, hub.clone()),
            downlinks: tracker,
            hub: hub.clone(),
            scheduler: scheduler.clone(),
        });
        Self {
            router,
            commands,
            downlinks,
            hub,
            scheduler,
        }
    }

    /// 注册在线扫描、命令过期扫描与周期指标日志。
    pub fn start_background(&self, config: &AppConfig) {
        let router = self.router.clone();
        self.scheduler.schedule_every(
            Duration::from_secs(config.presence_sweep_interval_secs),
            repeating(move || {
                let router = router.clone();
                async move {
                    router.sweep_presence().await;
                }
            }),
        );
        self.commands
            .start_expiry_sweep(Duration::from_secs(config.command_sweep_interval_secs));
        if config.metrics_log_interval_secs > 0 {
            self.scheduler.schedule_every(
                Duration::from_secs(config.metrics_log_interval_secs),
                repeating(|| async {
                    let snapshot = metrics().snapshot();
                    info!(
                        target: "fleet.telemetry",
                        messages_received = snapshot.messages_received,
                        parse_failures = snapshot.parse_failures,
                        unroutable_topics = snapshot.unroutable_topics,
                        ignored_events = snapshot.ignored_events,
                        handler_failures = snapshot.handler_failures,
                        commands_enqueued = snapshot.commands_enqueued,
                        commands_rejected = snapshot.commands_rejected,
                        command_publish_success = snapshot.command_publish_success,
                        command_publish_failure = snapshot.command_publish_failure,
                        commands_acknowledged = snapshot.commands_acknowledged,
                        commands_expired = snapshot.commands_expired,
                        presence_online = snapshot.presence_online,
                        presence_offline = snapshot.presence_offline,
                        uplinks_recorded = snapshot.uplinks_recorded,
                        downlink_transitions_applied = snapshot.downlink_transitions_applied,
                        downlink_transitions_ignored = snapshot.downlink_transitions_ignored,
                        alarms_raised = snapshot.alarms_raised,
                        "metrics_snapshot"
                    );
                }),
            );
        }
    }

    /// 每条入站消息单独一个任务，在 `inbound` span 内路由。
    pub fn spawn_inbound(&self, message: InboundMessage) -> tokio::task::JoinHandle<()> {
        let router = self.router.clone();
        let span = tracing::info_span!(
            "inbound",
            trace_id = %fleet_telemetry::new_trace_id(),
            topic = %message.topic
        );
        tokio::spawn(
            async move {
                if let Err(err) = router.route(&message.topic, &message.payload).await {
                    warn!(target: "fleet.ingest", error = %err, "inbound_dropped");
                }
            }
            .instrument(span),
        )
    }
}
