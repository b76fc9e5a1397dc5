//! 实时事件广播。
//!
//! 每个逻辑频道（`manifold:{id}`、`device:{id}`、`lorawan:{applicationId}`、`gateways`）
//! 对应一个 `broadcast::Sender`，订阅时按需创建。广播是尽力而为：
//! 没有订阅者时直接丢弃，落后的订阅者由 broadcast 自身跳过。

pub use api_contract::RealtimeEvent;

use domain::{TargetKind, TargetRef};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::debug;

/// 单个频道的缓冲区大小。
const CHANNEL_CAPACITY: usize = 256;

/// 实时推送频道。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RealtimeChannel {
    Manifold(String),
    Device(String),
    Lorawan(String),
    Gateways,
}

impl RealtimeChannel {
    pub fn key(&self) -> String {
        match self {
            RealtimeChannel::Manifold(id) => format!("manifold:{}", id),
            RealtimeChannel::Device(id) => format!("device:{}", id),
            RealtimeChannel::Lorawan(application_id) => format!("lorawan:{}", application_id),
            RealtimeChannel::Gateways => "gateways".to_string(),
        }
    }

    /// 受控目标所属频道：阀门归属歧管频道，通用执行器归属设备频道。
    pub fn for_target(target: &TargetRef) -> Self {
        match target.kind {
            TargetKind::Manifold => RealtimeChannel::Manifold(target.target_id.clone()),
            TargetKind::Device => RealtimeChannel::Device(target.target_id.clone()),
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        if value == "gateways" {
            return Some(RealtimeChannel::Gateways);
        }
        let (kind, id) = value.split_once(':')?;
        if id.is_empty() {
            return None;
        }
        match kind {
            "manifold" => Some(RealtimeChannel::Manifold(id.to_string())),
            "device" => Some(RealtimeChannel::Device(id.to_string())),
            "lorawan" => Some(RealtimeChannel::Lorawan(id.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for RealtimeChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// 按频道广播的实时事件中心。
#[derive(Clone, Default)]
pub struct RealtimeHub {
    channels: Arc<RwLock<HashMap<RealtimeChannel, broadcast::Sender<Arc<RealtimeEvent>>>>>,
}

impl RealtimeHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// 订阅频道，频道不存在时创建。
    pub fn subscribe(&self, channel: &RealtimeChannel) -> broadcast::Receiver<Arc<RealtimeEvent>> {
        if let Ok(channels) = self.channels.read() {
            if let Some(sender) = channels.get(channel) {
                return sender.subscribe();
            }
        }
        match self.channels.write() {
            Ok(mut channels) => channels
                .entry(channel.clone())
                .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
                .subscribe(),
            // 锁中毒时返回一个不会收到消息的接收端
            Err(_) => broadcast::channel(1).1,
        }
    }

    /// 广播事件，返回收到事件的订阅者数量。
    pub fn publish(&self, channel: &RealtimeChannel, event: RealtimeEvent) -> usize {
        let sender = match self.channels.read() {
            Ok(channels) => channels.get(channel).cloned(),
            Err(_) => None,
        };
        let Some(sender) = sender else {
            debug!(
                target: "fleet.realtime",
                channel = %channel,
                event_type = event.event_type(),
                "realtime_no_subscribers"
            );
            return 0;
        };
        if sender.receiver_count() == 0 {
            self.prune(channel);
            return 0;
        }
        sender.send(Arc::new(event)).unwrap_or(0)
    }

    /// 移除已无订阅者的频道。写锁内再次检查，与并发的 `subscribe` 互斥。
    fn prune(&self, channel: &RealtimeChannel) {
        let Ok(mut channels) = self.channels.write() else {
            return;
        };
        if channels
            .get(channel)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            channels.remove(channel);
            debug!(target: "fleet.realtime", channel = %channel, "realtime_channel_pruned");
        }
    }

    /// 当前登记的频道数量（含暂无订阅者、尚未清理的频道）。
    pub fn channel_count(&self) -> usize {
        self.channels.read().map(|channels| channels.len()).unwrap_or(0)
    }

    /// 当前有订阅者的频道数量。
    pub fn active_channels(&self) -> usize {
        self.channels
            .read()
            .map(|channels| {
                channels
                    .values()
                    .filter(|sender| sender.receiver_count() > 0)
                    .count()
            })
            .unwrap_or(0)
    }
}
