//! 进程内 broker。
//!
//! 核心通过 `TransportAdapter` 发布 / 订阅；模拟器和测试站在设备一侧：
//! `inject` 模拟设备上报，`device_subscribe` 观察核心下发的命令。
//! 核心自身发布的消息不会回送给核心（no-local）。

use crate::topic::topic_matches;
use crate::{InboundMessage, QoS, TransportAdapter, TransportError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info};

struct DeviceSubscription {
    pattern: String,
    sender: mpsc::UnboundedSender<InboundMessage>,
}

pub struct EmbeddedBroker {
    connected: AtomicBool,
    core_patterns: Mutex<Vec<String>>,
    core_sender: mpsc::Sender<InboundMessage>,
    devices: Mutex<Vec<DeviceSubscription>>,
}

impl EmbeddedBroker {
    pub fn new(capacity: usize) -> (Arc<Self>, mpsc::Receiver<InboundMessage>) {
        let (core_sender, inbound) = mpsc::channel(capacity.max(1));
        let broker = Arc::new(Self {
            connected: AtomicBool::new(true),
            core_patterns: Mutex::new(Vec::new()),
            core_sender,
            devices: Mutex::new(Vec::new()),
        });
        (broker, inbound)
    }

    /// 模拟断线 / 恢复。断线期间核心发布返回 `NotConnected`。
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        info!(target: "fleet.transport", backend = "embedded", connected, "transport_state_changed");
    }

    /// 设备侧订阅，返回收到核心下发消息的通道。
    pub fn device_subscribe(&self, pattern: &str) -> mpsc::UnboundedReceiver<InboundMessage> {
        let (sender, receiver) = mpsc::unbounded_channel();
        if let Ok(mut devices) = self.devices.lock() {
            devices.push(DeviceSubscription {
                pattern: pattern.to_string(),
                sender,
            });
        }
        receiver
    }

    /// 设备侧发布。返回是否投递给了核心。
    pub async fn inject(&self, topic: &str, payload: impl Into<Vec<u8>>) -> bool {
        let message = InboundMessage {
            topic: topic.to_string(),
            payload: payload.into(),
        };
        self.deliver_to_devices(&message);
        let to_core = self
            .core_patterns
            .lock()
            .map(|patterns| patterns.iter().any(|pattern| topic_matches(pattern, topic)))
            .unwrap_or(false);
        if !to_core {
            debug!(target: "fleet.transport", topic = %topic, "embedded_no_core_subscriber");
            return false;
        }
        self.core_sender.send(message).await.is_ok()
    }

    fn deliver_to_devices(&self, message: &InboundMessage) {
        let Ok(mut devices) = self.devices.lock() else {
            return;
        };
        devices.retain(|device| !device.sender.is_closed());
        for device in devices.iter() {
            if topic_matches(&device.pattern, &message.topic) {
                let _ = device.sender.send(message.clone());
            }
        }
    }
}

#[async_trait]
impl TransportAdapter for EmbeddedBroker {
    fn backend(&self) -> &'static str {
        "embedded"
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        _qos: QoS,
    ) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.deliver_to_devices(&InboundMessage {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }

    async fn subscribe(&self, pattern: &str, _qos: QoS) -> Result<(), TransportError> {
        let mut patterns = self
            .core_patterns
            .lock()
            .map_err(|_| TransportError::Subscribe("lock failed".to_string()))?;
        if !patterns.iter().any(|item| item == pattern) {
            patterns.push(pattern.to_string());
        }
        Ok(())
    }
}
