//! 受控目标（歧管阀门 / 通用执行器）与告警规则。

use std::fmt;

/// 目标类别，决定命令 topic 前缀与实时推送频道。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Manifold,
    Device,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Manifold => "manifold",
            TargetKind::Device => "device",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "manifold" | "manifolds" => Some(TargetKind::Manifold),
            "device" | "devices" => Some(TargetKind::Device),
            _ => None,
        }
    }

    /// 命令与遥测 topic 的首段。
    pub fn topic_domain(&self) -> &'static str {
        match self {
            TargetKind::Manifold => "manifolds",
            TargetKind::Device => "devices",
        }
    }
}

/// 目标引用：`target_id` + `target_index`（如阀门编号，通用设备固定为 0）。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetRef {
    pub kind: TargetKind,
    pub target_id: String,
    pub target_index: u32,
}

impl TargetRef {
    pub fn new(kind: TargetKind, target_id: impl Into<String>, target_index: u32) -> Self {
        Self {
            kind,
            target_id: target_id.into(),
            target_index,
        }
    }

    pub fn valve(manifold_id: impl Into<String>, valve: u32) -> Self {
        Self::new(TargetKind::Manifold, manifold_id, valve)
    }

    pub fn device(device_id: impl Into<String>) -> Self {
        Self::new(TargetKind::Device, device_id, 0)
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}#{}",
            self.kind.as_str(),
            self.target_id,
            self.target_index
        )
    }
}

/// 控制模式。`Auto` 表示目标由外部自动化托管，禁止手动命令。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetMode {
    Manual,
    Auto,
}

impl TargetMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetMode::Manual => "MANUAL",
            TargetMode::Auto => "AUTO",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "MANUAL" => Some(TargetMode::Manual),
            "AUTO" | "AUTOMATIC" | "SCHEDULED" => Some(TargetMode::Auto),
            _ => None,
        }
    }
}

/// 目标状态（最近一次下发意图或遥测观测值）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetStatus {
    On,
    Off,
    Fault,
    Unknown,
}

impl TargetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetStatus::On => "ON",
            TargetStatus::Off => "OFF",
            TargetStatus::Fault => "FAULT",
            TargetStatus::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ON" | "OPEN" => Some(TargetStatus::On),
            "OFF" | "CLOSED" => Some(TargetStatus::Off),
            "FAULT" | "ERROR" => Some(TargetStatus::Fault),
            "UNKNOWN" => Some(TargetStatus::Unknown),
            _ => None,
        }
    }
}

/// 受控目标的当前视图。
#[derive(Debug, Clone, PartialEq)]
pub struct ControlTarget {
    pub target: TargetRef,
    pub mode: TargetMode,
    /// 最近一次下发意图；遥测上报会覆盖为观测值。
    pub current_status: TargetStatus,
    pub cycle_count: u64,
    pub last_changed_at_ms: Option<i64>,
    pub alarm_rules: Vec<AlarmRule>,
}

impl ControlTarget {
    /// 未在 CRUD 层登记的目标首次出现遥测时使用的占位记录。
    pub fn placeholder(target: TargetRef) -> Self {
        Self {
            target,
            mode: TargetMode::Manual,
            current_status: TargetStatus::Unknown,
            cycle_count: 0,
            last_changed_at_ms: None,
            alarm_rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlarmRuleType {
    Status,
    Threshold,
}

impl AlarmRuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmRuleType::Status => "STATUS",
            AlarmRuleType::Threshold => "THRESHOLD",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "STATUS" => Some(AlarmRuleType::Status),
            "THRESHOLD" => Some(AlarmRuleType::Threshold),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOperator {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    Ne,
}

impl CompareOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOperator::Gt => ">",
            CompareOperator::Gte => ">=",
            CompareOperator::Lt => "<",
            CompareOperator::Lte => "<=",
            CompareOperator::Eq => "==",
            CompareOperator::Ne => "!=",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            ">" | "gt" => Some(CompareOperator::Gt),
            ">=" | "gte" => Some(CompareOperator::Gte),
            "<" | "lt" => Some(CompareOperator::Lt),
            "<=" | "lte" => Some(CompareOperator::Lte),
            "==" | "=" | "eq" => Some(CompareOperator::Eq),
            "!=" | "ne" => Some(CompareOperator::Ne),
            _ => None,
        }
    }

    pub fn evaluate(&self, value: f64, threshold: f64) -> bool {
        match self {
            CompareOperator::Gt => value > threshold,
            CompareOperator::Gte => value >= threshold,
            CompareOperator::Lt => value < threshold,
            CompareOperator::Lte => value <= threshold,
            CompareOperator::Eq => (value - threshold).abs() < f64::EPSILON,
            CompareOperator::Ne => (value - threshold).abs() >= f64::EPSILON,
        }
    }
}

/// 挂在受控目标上的告警规则。
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmRule {
    pub enabled: bool,
    pub rule_type: AlarmRuleType,
    /// 状态规则固定为 `status`；阈值规则为遥测字段名（如 `pressure`）。
    pub metric: String,
    pub operator: CompareOperator,
    pub threshold: f64,
    pub trigger_status: Option<TargetStatus>,
    pub notify: bool,
}

impl AlarmRule {
    pub fn on_status(trigger_status: TargetStatus) -> Self {
        Self {
            enabled: true,
            rule_type: AlarmRuleType::Status,
            metric: "status".to_string(),
            operator: CompareOperator::Eq,
            threshold: 0.0,
            trigger_status: Some(trigger_status),
            notify: true,
        }
    }

    pub fn on_threshold(
        metric: impl Into<String>,
        operator: CompareOperator,
        threshold: f64,
    ) -> Self {
        Self {
            enabled: true,
            rule_type: AlarmRuleType::Threshold,
            metric: metric.into(),
            operator,
            threshold,
            trigger_status: None,
            notify: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlarmSeverity {
    Warning,
    Critical,
}

impl AlarmSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmSeverity::Warning => "WARNING",
            AlarmSeverity::Critical => "CRITICAL",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "WARNING" => Some(AlarmSeverity::Warning),
            "CRITICAL" => Some(AlarmSeverity::Critical),
            _ => None,
        }
    }

    /// FAULT 为 CRITICAL，其余为 WARNING。
    pub fn from_status(status: TargetStatus) -> Self {
        match status {
            TargetStatus::Fault => AlarmSeverity::Critical,
            _ => AlarmSeverity::Warning,
        }
    }
}

/// 告警实例。同一目标下未确认的实例按 `message` 去重。
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmInstance {
    pub alarm_id: String,
    pub severity: AlarmSeverity,
    pub message: String,
    pub timestamp_ms: i64,
    pub acknowledged: bool,
}
