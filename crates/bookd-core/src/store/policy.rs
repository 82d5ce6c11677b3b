//! Financial policy rule table persistence.

use rusqlite::{params, Row};
use rust_decimal::Decimal;

use super::{Store, StoreError};
use crate::financial::{PolicyEventType, PolicyRule};

fn parse_decimal(value: &str, column: &str) -> Result<Decimal, StoreError> {
    value
        .parse()
        .map_err(|_| StoreError::corrupt(format!("bad decimal '{value}' in {column}")))
}

fn row_to_rule(row: &Row<'_>) -> Result<PolicyRule, StoreError> {
    let event_type: String = row.get(2)?;
    let min_hours: i64 = row.get(3)?;
    let max_hours: Option<i64> = row.get(4)?;
    let priority: i64 = row.get(5)?;
    let penalty: String = row.get(6)?;
    let compensation: String = row.get(7)?;
    let retention: String = row.get(8)?;

    Ok(PolicyRule {
        id: row.get(0)?,
        name: row.get(1)?,
        event_type: PolicyEventType::parse(&event_type).ok_or_else(|| {
            StoreError::corrupt(format!("unknown policy event type '{event_type}'"))
        })?,
        min_hours_before: min_hours.max(0) as u32,
        max_hours_before: max_hours.map(|h| h.max(0) as u32),
        priority: priority.max(0) as u32,
        penalty_percent: parse_decimal(&penalty, "penalty_percent")?,
        compensation_percent: parse_decimal(&compensation, "compensation_percent")?,
        retention_percent: parse_decimal(&retention, "retention_percent")?,
        active: row.get(9)?,
    })
}

impl Store {
    /// Seed the rule table when empty; existing rules are left untouched so
    /// operator edits survive restarts.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on database failure.
    pub fn seed_policy_rules(&self, rules: &[PolicyRule]) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let existing: i64 =
            tx.query_row("SELECT COUNT(*) FROM financial_policy_rules", [], |row| row.get(0))?;
        if existing == 0 {
            for rule in rules {
                tx.execute(
                    "INSERT INTO financial_policy_rules \
                     (id, name, event_type, min_hours_before, max_hours_before, priority, \
                      penalty_percent, compensation_percent, retention_percent, active) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        rule.id,
                        rule.name,
                        rule.event_type.as_str(),
                        i64::from(rule.min_hours_before),
                        rule.max_hours_before.map(i64::from),
                        i64::from(rule.priority),
                        rule.penalty_percent.to_string(),
                        rule.compensation_percent.to_string(),
                        rule.retention_percent.to_string(),
                        rule.active,
                    ],
                )?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Active rules for one event type, priority-ordered.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on database failure or a corrupt row.
    pub fn active_policy_rules(
        &self,
        event_type: PolicyEventType,
    ) -> Result<Vec<PolicyRule>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, event_type, min_hours_before, max_hours_before, priority, \
             penalty_percent, compensation_percent, retention_percent, active \
             FROM financial_policy_rules \
             WHERE active = 1 AND event_type = ?1 ORDER BY priority",
        )?;
        let mut rows = stmt.query(params![event_type.as_str()])?;

        let mut rules = Vec::new();
        while let Some(row) = rows.next()? {
            rules.push(row_to_rule(row)?);
        }
        Ok(rules)
    }
}
