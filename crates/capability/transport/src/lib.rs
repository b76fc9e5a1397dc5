//! 传输适配层。
//!
//! 进程内只有一个活动后端，启动时由配置选定：
//! - `embedded`：进程内 broker（模拟器与测试直接注入设备流量）
//! - `remote`：MQTT over TCP 连接远程 broker
//! - `cloud`：MQTT over mTLS 连接云 IoT 网关，可带 topic 命名空间
//!
//! 入站消息统一通过 `mpsc::Receiver<InboundMessage>` 交给路由层。
//! 下游必须容忍重复与乱序投递。

pub mod embedded;
pub mod mqtt;
pub mod topic;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

pub use embedded::EmbeddedBroker;
pub use mqtt::{CloudTlsSettings, MqttSettings, MqttTransport};
pub use rumqttc::QoS;
pub use topic::topic_matches;

/// 入站通道容量。
pub const INBOUND_CHANNEL_CAPACITY: usize = 1024;

/// 传输错误。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport not connected")]
    NotConnected,
    #[error("publish failed: {0}")]
    PublishFailed(String),
    #[error("subscribe failed: {0}")]
    Subscribe(String),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("tls setup failed: {0}")]
    Tls(String),
}

/// 一条入站消息。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// 统一的发布 / 订阅接口。
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// 后端名称（日志用）。
    fn backend(&self) -> &'static str;

    fn is_connected(&self) -> bool;

    /// 只等待本地入队结果，不等待设备确认。断线期间立即返回 `NotConnected`。
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS)
    -> Result<(), TransportError>;

    /// 订阅并记住该 pattern，重连后自动重新订阅。
    async fn subscribe(&self, pattern: &str, qos: QoS) -> Result<(), TransportError>;
}

/// 启动时选定的后端配置。
#[derive(Debug, Clone)]
pub enum TransportSettings {
    Embedded,
    Remote(MqttSettings),
    Cloud(MqttSettings, CloudTlsSettings),
}

/// 已建立的传输。
pub struct ConnectedTransport {
    pub adapter: Arc<dyn TransportAdapter>,
    pub inbound: mpsc::Receiver<InboundMessage>,
    /// 仅 embedded 后端存在，供模拟器注入设备流量。
    pub embedded: Option<Arc<EmbeddedBroker>>,
}

/// 按配置建立传输。必须在 tokio 运行时内调用。
pub fn connect_transport(settings: TransportSettings) -> Result<ConnectedTransport, TransportError> {
    match settings {
        TransportSettings::Embedded => {
            let (broker, inbound) = EmbeddedBroker::new(INBOUND_CHANNEL_CAPACITY);
            Ok(ConnectedTransport {
                adapter: broker.clone(),
                inbound,
                embedded: Some(broker),
            })
        }
        TransportSettings::Remote(settings) => {
            let (transport, inbound) = MqttTransport::connect(settings, None)?;
            Ok(ConnectedTransport {
                adapter: Arc::new(transport),
                inbound,
                embedded: None,
            })
        }
        TransportSettings::Cloud(settings, tls) => {
            let (transport, inbound) = MqttTransport::connect(settings, Some(tls))?;
            Ok(ConnectedTransport {
                adapter: Arc::new(transport),
                inbound,
                embedded: None,
            })
        }
    }
}

/// 配置中的 0/1/2 转为 QoS，非法值按 1 处理。
pub fn qos_from_u8(value: u8) -> QoS {
    match value {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}
