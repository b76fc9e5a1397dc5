//! 告警规则评估。
//!
//! 每次观测到目标状态后逐条评估启用的规则：
//! - 状态规则：观测状态等于 `trigger_status`
//! - 阈值规则：观测中同名数值字段满足 `operator threshold`
//!
//! 告警消息只由目标标识与触发条件组成，同一目标下未确认的相同消息只保留一条。

use api_contract::RealtimeEvent;
use domain::{
    AlarmInstance, AlarmRule, AlarmRuleType, AlarmSeverity, ControlTarget, TargetRef,
    TargetStatus,
};
use fleet_realtime::{RealtimeChannel, RealtimeHub};
use fleet_storage::{AlarmStore, StorageError};
use fleet_telemetry::record_alarm_raised;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// 一次状态观测。
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub status: TargetStatus,
    /// 随状态一起上报的数值字段（如 `pressure`、`flow`）。
    pub metrics: BTreeMap<String, f64>,
    pub at_ms: i64,
}

impl Observation {
    pub fn status(status: TargetStatus, at_ms: i64) -> Self {
        Self {
            status,
            metrics: BTreeMap::new(),
            at_ms,
        }
    }
}

/// 规则是否被本次观测触发。
pub fn rule_matches(rule: &AlarmRule, observation: &Observation) -> bool {
    if !rule.enabled {
        return false;
    }
    match rule.rule_type {
        AlarmRuleType::Status => rule.trigger_status == Some(observation.status),
        AlarmRuleType::Threshold => observation
            .metrics
            .get(&rule.metric)
            .is_some_and(|value| rule.operator.evaluate(*value, rule.threshold)),
    }
}

/// 告警消息（去重键）。
pub fn alarm_message(target: &TargetRef, rule: &AlarmRule) -> String {
    let subject = format!(
        "{} {} #{}",
        target.kind.as_str(),
        target.target_id,
        target.target_index
    );
    match rule.rule_type {
        AlarmRuleType::Status => {
            let status = rule
                .trigger_status
                .map(|status| status.as_str())
                .unwrap_or("UNKNOWN");
            format!("{} status is {}", subject, status)
        }
        AlarmRuleType::Threshold => format!(
            "{} {} {} {}",
            subject,
            rule.metric,
            rule.operator.symbol(),
            rule.threshold
        ),
    }
}

/// 告警评估器。
#[derive(Clone)]
pub struct AlarmEvaluator {
    store: Arc<dyn AlarmStore>,
    hub: RealtimeHub,
}

impl AlarmEvaluator {
    pub fn new(store: Arc<dyn AlarmStore>, hub: RealtimeHub) -> Self {
        Self { store, hub }
    }

    /// 评估目标的全部规则，返回本次新增的告警。
    pub async fn evaluate(
        &self,
        target: &ControlTarget,
        observation: &Observation,
    ) -> Result<Vec<AlarmInstance>, StorageError> {
        let mut raised = Vec::new();
        for rule in target.alarm_rules.iter() {
            if !rule_matches(rule, observation) {
                continue;
            }
            let alarm = AlarmInstance {
                alarm_id: uuid::Uuid::new_v4().to_string(),
                severity: AlarmSeverity::from_status(observation.status),
                message: alarm_message(&target.target, rule),
                timestamp_ms: observation.at_ms,
                acknowledged: false,
            };
            if !self
                .store
                .insert_alarm_if_absent(&target.target, alarm.clone())
                .await?
            {
                debug!(
                    target: "fleet.alarm",
                    alarm_target = %target.target,
                    message = %alarm.message,
                    "alarm_already_open"
                );
                continue;
            }
            record_alarm_raised();
            info!(
                target: "fleet.alarm",
                alarm_id = %alarm.alarm_id,
                alarm_target = %target.target,
                severity = alarm.severity.as_str(),
                message = %alarm.message,
                "alarm_raised"
            );
            if rule.notify {
                self.hub.publish(
                    &RealtimeChannel::for_target(&target.target),
                    RealtimeEvent::AlarmRaised {
                        target_kind: target.target.kind.as_str().to_string(),
                        target_id: target.target.target_id.clone(),
                        target_index: target.target.target_index,
                        alarm_id: alarm.alarm_id.clone(),
                        severity: alarm.severity.as_str().to_string(),
                        message: alarm.message.clone(),
                        timestamp: alarm.timestamp_ms,
                    },
                );
            }
            raised.push(alarm);
        }
        Ok(raised)
    }

    /// 确认告警。确认后相同条件可以再次触发。
    pub async fn acknowledge(
        &self,
        target: &TargetRef,
        alarm_id: &str,
    ) -> Result<bool, StorageError> {
        let changed = self.store.acknowledge_alarm(target, alarm_id).await?;
        if changed {
            info!(
                target: "fleet.alarm",
                alarm_id = %alarm_id,
                alarm_target = %target,
                "alarm_acknowledged"
            );
        }
        Ok(changed)
    }

    pub async fn list(&self, target: &TargetRef) -> Result<Vec<AlarmInstance>, StorageError> {
        self.store.list_alarms(target).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::CompareOperator;

    #[test]
    fn disabled_rules_never_match() {
        let mut rule = AlarmRule::on_status(TargetStatus::Fault);
        rule.enabled = false;
        assert!(!rule_matches(&rule, &Observation::status(TargetStatus::Fault, 0)));
    }

    #[test]
    fn threshold_rule_needs_metric_present() {
        let rule = AlarmRule::on_threshold("pressure", CompareOperator::Gt, 80.0);
        let mut observation = Observation::status(TargetStatus::On, 0);
        assert!(!rule_matches(&rule, &observation));
        observation.metrics.insert("pressure".to_string(), 80.0);
        assert!(!rule_matches(&rule, &observation));
        observation.metrics.insert("pressure".to_string(), 80.5);
        assert!(rule_matches(&rule, &observation));
    }

    #[test]
    fn message_is_stable_for_same_condition() {
        let target = TargetRef::valve("mf-01", 3);
        let rule = AlarmRule::on_threshold("pressure", CompareOperator::Gt, 80.0);
        assert_eq!(alarm_message(&target, &rule), alarm_message(&target, &rule));
        assert_eq!(
            alarm_message(&target, &AlarmRule::on_status(TargetStatus::Fault)),
            "manifold mf-01 #3 status is FAULT"
        );
    }
}
