//! 设备在线状态。

use std::fmt;

/// 在线状态 key 的命名空间。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceKind {
    Manifold,
    Device,
    Lorawan,
    Gateway,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Manifold => "manifold",
            DeviceKind::Device => "device",
            DeviceKind::Lorawan => "lorawan",
            DeviceKind::Gateway => "gateway",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "manifold" => Some(DeviceKind::Manifold),
            "device" => Some(DeviceKind::Device),
            "lorawan" => Some(DeviceKind::Lorawan),
            "gateway" => Some(DeviceKind::Gateway),
            _ => None,
        }
    }
}

/// 形如 `manifold:mf-01` 的在线状态 key。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceKey {
    pub kind: DeviceKind,
    pub id: String,
}

impl DeviceKey {
    pub fn new(kind: DeviceKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn manifold(id: impl Into<String>) -> Self {
        Self::new(DeviceKind::Manifold, id)
    }

    pub fn device(id: impl Into<String>) -> Self {
        Self::new(DeviceKind::Device, id)
    }

    pub fn lorawan(dev_eui: impl Into<String>) -> Self {
        Self::new(DeviceKind::Lorawan, dev_eui)
    }

    pub fn gateway(id: impl Into<String>) -> Self {
        Self::new(DeviceKind::Gateway, id)
    }

    pub fn parse(value: &str) -> Option<Self> {
        let (kind, id) = value.split_once(':')?;
        if id.is_empty() {
            return None;
        }
        Some(Self::new(DeviceKind::parse(kind)?, id))
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

/// 单个 key 的在线状态。
#[derive(Debug, Clone, PartialEq)]
pub struct DevicePresence {
    pub device_key: DeviceKey,
    pub is_online: bool,
    pub last_seen_ms: i64,
    /// 首次观测时间，显式清除前不会被后续重连覆盖。
    pub connected_since_ms: Option<i64>,
}

impl DevicePresence {
    pub fn is_stale(&self, now_ms: i64, timeout_ms: i64) -> bool {
        now_ms.saturating_sub(self.last_seen_ms) > timeout_ms
    }
}

/// 在线 / 离线边沿事件，每个边沿只产生一次。
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceTransition {
    pub device_key: DeviceKey,
    pub online: bool,
    pub at_ms: i64,
    pub last_seen_ms: i64,
}
