//! Postgres 受控目标存储实现
//!
//! 目标行存放在 `control_targets`，告警规则按 `position` 存放在 `alarm_rules`。

use super::{from_i32, from_i64, parse_column, to_i32};
use crate::error::StorageError;
use crate::traits::TargetStore;
use domain::{
    AlarmRule, AlarmRuleType, CompareOperator, ControlTarget, TargetKind, TargetMode, TargetRef,
    TargetStatus,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

const TARGET_COLUMNS: &str =
    "target_kind, target_id, target_index, mode, current_status, cycle_count, last_changed_at_ms";

pub struct PgTargetStore {
    pub pool: PgPool,
}

impl PgTargetStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_rules(&self, target: &TargetRef) -> Result<Vec<AlarmRule>, StorageError> {
        let rows = sqlx::query(
            "select enabled, rule_type, metric, operator, threshold, trigger_status, notify \
             from alarm_rules \
             where target_kind = $1 and target_id = $2 and target_index = $3 \
             order by position",
        )
        .bind(target.kind.as_str())
        .bind(&target.target_id)
        .bind(to_i32(target.target_index))
        .fetch_all(&self.pool)
        .await?;
        let mut rules = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            rules.push(rule_from_row(row)?);
        }
        Ok(rules)
    }

    async fn with_rules(&self, row: &PgRow) -> Result<ControlTarget, StorageError> {
        let mut target = target_from_row(row)?;
        target.alarm_rules = self.load_rules(&target.target).await?;
        Ok(target)
    }
}

fn target_from_row(row: &PgRow) -> Result<ControlTarget, StorageError> {
    let kind: String = row.try_get("target_kind")?;
    let mode: String = row.try_get("mode")?;
    let status: String = row.try_get("current_status")?;
    Ok(ControlTarget {
        target: TargetRef::new(
            parse_column("target_kind", &kind, TargetKind::parse)?,
            row.try_get::<String, _>("target_id")?,
            from_i32("target_index", row.try_get("target_index")?)?,
        ),
        mode: parse_column("mode", &mode, TargetMode::parse)?,
        current_status: parse_column("current_status", &status, TargetStatus::parse)?,
        cycle_count: from_i64("cycle_count", row.try_get("cycle_count")?)?,
        last_changed_at_ms: row.try_get("last_changed_at_ms")?,
        alarm_rules: Vec::new(),
    })
}

fn rule_from_row(row: &PgRow) -> Result<AlarmRule, StorageError> {
    let rule_type: String = row.try_get("rule_type")?;
    let operator: String = row.try_get("operator")?;
    let trigger_status: Option<String> = row.try_get("trigger_status")?;
    Ok(AlarmRule {
        enabled: row.try_get("enabled")?,
        rule_type: parse_column("rule_type", &rule_type, AlarmRuleType::parse)?,
        metric: row.try_get("metric")?,
        operator: parse_column("operator", &operator, CompareOperator::parse)?,
        threshold: row.try_get("threshold")?,
        trigger_status: trigger_status
            .map(|value| parse_column("trigger_status", &value, TargetStatus::parse))
            .transpose()?,
        notify: row.try_get("notify")?,
    })
}

#[async_trait::async_trait]
impl TargetStore for PgTargetStore {
    async fn upsert_target(&self, target: ControlTarget) -> Result<ControlTarget, StorageError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "insert into control_targets \
             (target_kind, target_id, target_index, mode, current_status, cycle_count, last_changed_at_ms) \
             values ($1, $2, $3, $4, $5, $6, $7) \
             on conflict (target_kind, target_id, target_index) do update set \
             mode = excluded.mode, current_status = excluded.current_status, \
             cycle_count = excluded.cycle_count, last_changed_at_ms = excluded.last_changed_at_ms",
        )
        .bind(target.target.kind.as_str())
        .bind(&target.target.target_id)
        .bind(to_i32(target.target.target_index))
        .bind(target.mode.as_str())
        .bind(target.current_status.as_str())
        .bind(super::to_i64(target.cycle_count))
        .bind(target.last_changed_at_ms)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "delete from alarm_rules \
             where target_kind = $1 and target_id = $2 and target_index = $3",
        )
        .bind(target.target.kind.as_str())
        .bind(&target.target.target_id)
        .bind(to_i32(target.target.target_index))
        .execute(&mut *tx)
        .await?;
        for (position, rule) in target.alarm_rules.iter().enumerate() {
            sqlx::query(
                "insert into alarm_rules \
                 (target_kind, target_id, target_index, position, enabled, rule_type, metric, \
                 operator, threshold, trigger_status, notify) \
                 values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            )
            .bind(target.target.kind.as_str())
            .bind(&target.target.target_id)
            .bind(to_i32(target.target.target_index))
            .bind(i32::try_from(position).unwrap_or(i32::MAX))
            .bind(rule.enabled)
            .bind(rule.rule_type.as_str())
            .bind(&rule.metric)
            .bind(rule.operator.symbol())
            .bind(rule.threshold)
            .bind(rule.trigger_status.map(|status| status.as_str()))
            .bind(rule.notify)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(target)
    }

    async fn find_target(&self, target: &TargetRef) -> Result<Option<ControlTarget>, StorageError> {
        let row = sqlx::query(&format!(
            "select {} from control_targets \
             where target_kind = $1 and target_id = $2 and target_index = $3",
            TARGET_COLUMNS
        ))
        .bind(target.kind.as_str())
        .bind(&target.target_id)
        .bind(to_i32(target.target_index))
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(self.with_rules(&row).await?)),
            None => Ok(None),
        }
    }

    async fn list_targets(
        &self,
        kind: TargetKind,
        target_id: &str,
    ) -> Result<Vec<ControlTarget>, StorageError> {
        let rows = sqlx::query(&format!(
            "select {} from control_targets \
             where target_kind = $1 and target_id = $2 \
             order by target_index",
            TARGET_COLUMNS
        ))
        .bind(kind.as_str())
        .bind(target_id)
        .fetch_all(&self.pool)
        .await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            items.push(self.with_rules(row).await?);
        }
        Ok(items)
    }

    async fn apply_commanded_status(
        &self,
        target: &TargetRef,
        status: TargetStatus,
        count_cycle: bool,
        at_ms: i64,
    ) -> Result<Option<ControlTarget>, StorageError> {
        let row = sqlx::query(&format!(
            "update control_targets set current_status = $4, last_changed_at_ms = $5, \
             cycle_count = cycle_count + case when $6 then 1 else 0 end \
             where target_kind = $1 and target_id = $2 and target_index = $3 \
             returning {}",
            TARGET_COLUMNS
        ))
        .bind(target.kind.as_str())
        .bind(&target.target_id)
        .bind(to_i32(target.target_index))
        .bind(status.as_str())
        .bind(at_ms)
        .bind(count_cycle)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(self.with_rules(&row).await?)),
            None => Ok(None),
        }
    }

    async fn record_observed_status(
        &self,
        target: &TargetRef,
        status: TargetStatus,
        at_ms: i64,
    ) -> Result<ControlTarget, StorageError> {
        let first_changed_at = (status != TargetStatus::Unknown).then_some(at_ms);
        let row = sqlx::query(&format!(
            "insert into control_targets \
             (target_kind, target_id, target_index, mode, current_status, cycle_count, last_changed_at_ms) \
             values ($1, $2, $3, 'MANUAL', $4, 0, $6) \
             on conflict (target_kind, target_id, target_index) do update set \
             last_changed_at_ms = case when control_targets.current_status <> excluded.current_status \
             then $5 else control_targets.last_changed_at_ms end, \
             current_status = excluded.current_status \
             returning {}",
            TARGET_COLUMNS
        ))
        .bind(target.kind.as_str())
        .bind(&target.target_id)
        .bind(to_i32(target.target_index))
        .bind(status.as_str())
        .bind(at_ms)
        .bind(first_changed_at)
        .fetch_one(&self.pool)
        .await?;
        self.with_rules(&row).await
    }
}
