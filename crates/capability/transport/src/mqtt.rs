//! 基于 rumqttc 的远程 broker / 云 IoT 网关后端。

use crate::topic::{apply_namespace, strip_namespace};
use crate::{INBOUND_CHANNEL_CAPACITY, InboundMessage, QoS, TransportAdapter, TransportError};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, TlsConfiguration, Transport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// MQTT 连接参数。
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    pub keep_alive_secs: u64,
    pub reconnect_backoff_ms: u64,
}

/// 云网关 mTLS 参数。
#[derive(Debug, Clone)]
pub struct CloudTlsSettings {
    pub ca_path: String,
    pub cert_path: String,
    pub key_path: String,
    pub topic_namespace: Option<String>,
}

/// rumqttc 传输。`connected` 在 ConnAck 时置位，事件循环出错时清除。
pub struct MqttTransport {
    client: AsyncClient,
    backend: &'static str,
    connected: Arc<AtomicBool>,
    subscriptions: Arc<Mutex<Vec<(String, QoS)>>>,
    namespace: Option<String>,
}

fn read_pem(path: &str) -> Result<Vec<u8>, TransportError> {
    std::fs::read(path).map_err(|err| TransportError::Tls(format!("{}: {}", path, err)))
}

impl MqttTransport {
    /// 建立客户端并启动事件循环任务。实际连接在后台完成。
    pub fn connect(
        settings: MqttSettings,
        tls: Option<CloudTlsSettings>,
    ) -> Result<(Self, mpsc::Receiver<InboundMessage>), TransportError> {
        if settings.host.trim().is_empty() {
            return Err(TransportError::Connect("empty mqtt host".to_string()));
        }
        let mut options = MqttOptions::new(
            settings.client_id.clone(),
            settings.host.clone(),
            settings.port,
        );
        options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs.max(5)));
        if let (Some(username), Some(password)) = (settings.username, settings.password) {
            options.set_credentials(username, password);
        }
        let backend = if tls.is_some() { "cloud" } else { "remote" };
        let namespace = match tls {
            Some(tls) => {
                let ca = read_pem(&tls.ca_path)?;
                let cert = read_pem(&tls.cert_path)?;
                let key = read_pem(&tls.key_path)?;
                options.set_transport(Transport::Tls(TlsConfiguration::Simple {
                    ca,
                    alpn: None,
                    client_auth: Some((cert, key)),
                }));
                tls.topic_namespace
            }
            None => None,
        };

        let (client, mut eventloop) = AsyncClient::new(options, 10);
        let (sender, inbound) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));
        let subscriptions: Arc<Mutex<Vec<(String, QoS)>>> = Arc::new(Mutex::new(Vec::new()));
        let backoff = Duration::from_millis(settings.reconnect_backoff_ms.max(100));

        let loop_client = client.clone();
        let loop_connected = connected.clone();
        let loop_subscriptions = subscriptions.clone();
        let loop_namespace = namespace.clone();
        let host = settings.host;
        let port = settings.port;
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        loop_connected.store(true, Ordering::SeqCst);
                        let remembered = loop_subscriptions
                            .lock()
                            .map(|items| items.clone())
                            .unwrap_or_default();
                        info!(
                            target: "fleet.transport",
                            backend,
                            host = %host,
                            port,
                            subscriptions = remembered.len(),
                            "transport_connected"
                        );
                        // try_subscribe 不会阻塞事件循环
                        for (pattern, qos) in remembered {
                            let topic = apply_namespace(loop_namespace.as_deref(), &pattern);
                            if let Err(err) = loop_client.try_subscribe(topic, qos) {
                                warn!(
                                    target: "fleet.transport",
                                    backend,
                                    pattern = %pattern,
                                    error = %err,
                                    "transport_resubscribe_failed"
                                );
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let message = InboundMessage {
                            topic: strip_namespace(loop_namespace.as_deref(), &publish.topic),
                            payload: publish.payload.to_vec(),
                        };
                        if sender.send(message).await.is_err() {
                            info!(target: "fleet.transport", backend, "transport_inbound_closed");
                            break;
                        }
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        loop_connected.store(false, Ordering::SeqCst);
                        warn!(target: "fleet.transport", backend, "transport_disconnected");
                    }
                    Ok(_) => {}
                    Err(err) => {
                        loop_connected.store(false, Ordering::SeqCst);
                        warn!(
                            target: "fleet.transport",
                            backend,
                            error = %err,
                            backoff_ms = backoff.as_millis() as u64,
                            "transport_eventloop_error"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        });

        Ok((
            Self {
                client,
                backend,
                connected,
                subscriptions,
                namespace,
            },
            inbound,
        ))
    }
}

#[async_trait]
impl TransportAdapter for MqttTransport {
    fn backend(&self) -> &'static str {
        self.backend
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
    ) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let topic = apply_namespace(self.namespace.as_deref(), topic);
        self.client
            .publish(topic, qos, false, payload)
            .await
            .map_err(|err| TransportError::PublishFailed(err.to_string()))
    }

    async fn subscribe(&self, pattern: &str, qos: QoS) -> Result<(), TransportError> {
        {
            let mut subscriptions = self
                .subscriptions
                .lock()
                .map_err(|_| TransportError::Subscribe("lock failed".to_string()))?;
            if !subscriptions.iter().any(|(item, _)| item == pattern) {
                subscriptions.push((pattern.to_string(), qos));
            }
        }
        // 未连接时只记录，ConnAck 后统一订阅
        if !self.is_connected() {
            return Ok(());
        }
        let topic = apply_namespace(self.namespace.as_deref(), pattern);
        self.client
            .subscribe(topic, qos)
            .await
            .map_err(|err| TransportError::Subscribe(err.to_string()))
    }
}
