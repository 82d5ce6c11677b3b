//! Configuration for the booking service.
//!
//! Every operational tunable (scheduling limits, the confirmation SLA,
//! risk weights and thresholds, PIN settings, the financial policy rule
//! table) lives here and is loaded from TOML. The defaults reproduce
//! the platform's active operational policy so an empty file is a working
//! configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::availability::SlotLimits;
use crate::financial::{PolicyEventType, PolicyRule};
use crate::risk::RiskPolicy;

/// Errors from configuration loading.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML could not be parsed.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BookdConfig {
    /// Scheduling limits and SLAs.
    pub scheduling: SchedulingConfig,
    /// Risk scorer policy and sweep horizon.
    pub risk: RiskConfig,
    /// Completion PIN settings.
    pub completion: CompletionConfig,
    /// Financial policy engine settings and rule table.
    pub financial: FinancialConfig,
}

impl BookdConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

/// Scheduling limits and SLAs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Minimum slot / appointment window duration, minutes.
    pub min_slot_minutes: u32,
    /// Maximum slot duration for slot queries, minutes.
    pub max_slot_minutes: u32,
    /// Granularity used for open-exception slots without a rule default.
    pub default_slot_minutes: u32,
    /// Maximum slot query range, days.
    pub max_query_range_days: u32,
    /// Maximum appointment window duration, minutes.
    pub max_window_minutes: u32,
    /// How long a provider has to confirm a pending appointment, hours.
    pub confirmation_sla_hours: u32,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            min_slot_minutes: 15,
            max_slot_minutes: 240,
            default_slot_minutes: 30,
            max_query_range_days: 31,
            max_window_minutes: 8 * 60,
            confirmation_sla_hours: 12,
        }
    }
}

impl SchedulingConfig {
    /// Bounds consumed by the availability resolver.
    #[must_use]
    pub const fn slot_limits(&self) -> SlotLimits {
        SlotLimits {
            min_slot_minutes: self.min_slot_minutes,
            max_slot_minutes: self.max_slot_minutes,
            default_slot_minutes: self.default_slot_minutes,
            max_query_range_days: self.max_query_range_days,
        }
    }
}

/// Risk scorer policy plus batch-sweep horizon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// How far ahead the sweep looks for upcoming windows, hours.
    pub lookahead_hours: u32,
    /// How far behind `now` windows are still swept, minutes.
    pub include_past_minutes: u32,
    /// Scorer weights and thresholds.
    pub policy: RiskPolicy,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self { lookahead_hours: 24, include_past_minutes: 30, policy: RiskPolicy::default() }
    }
}

/// Completion PIN settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// PIN time-to-live, minutes.
    pub pin_ttl_minutes: u32,
    /// Consecutive mismatches that lock the term.
    pub max_pin_attempts: u32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self { pin_ttl_minutes: 10, max_pin_attempts: 5 }
    }
}

/// Financial engine settings and seed rule table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FinancialConfig {
    /// Cancellations this close to the window (hours) trigger the engine;
    /// earlier cancellations carry no financial consequence.
    pub cancellation_policy_window_hours: u32,
    /// Seed rule table, applied when the store has no rules yet.
    pub rules: Vec<PolicyRuleSeed>,
}

impl Default for FinancialConfig {
    fn default() -> Self {
        Self { cancellation_policy_window_hours: 24, rules: default_policy_rules() }
    }
}

/// One seed row for the financial policy rule table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRuleSeed {
    /// Operator-facing rule name.
    pub name: String,
    /// Event the rule applies to.
    pub event_type: PolicyEventType,
    /// Inclusive lower antecedence bound, hours.
    pub min_hours_before: u32,
    /// Inclusive upper antecedence bound, hours; `None` = unbounded.
    pub max_hours_before: Option<u32>,
    /// Selection priority (ascending).
    pub priority: u32,
    /// Penalty percent of service value.
    pub penalty_percent: Decimal,
    /// Counterparty compensation percent.
    pub compensation_percent: Decimal,
    /// Platform retention percent.
    pub retention_percent: Decimal,
}

impl PolicyRuleSeed {
    /// Materialize a storable rule from this seed.
    #[must_use]
    pub fn into_rule(self) -> PolicyRule {
        PolicyRule {
            id: uuid::Uuid::new_v4(),
            name: self.name,
            event_type: self.event_type,
            min_hours_before: self.min_hours_before,
            max_hours_before: self.max_hours_before,
            priority: self.priority,
            penalty_percent: self.penalty_percent,
            compensation_percent: self.compensation_percent,
            retention_percent: self.retention_percent,
            active: true,
        }
    }
}

fn pct(value: u32) -> Decimal {
    Decimal::from(value)
}

fn seed(
    name: &str,
    event_type: PolicyEventType,
    min_hours: u32,
    max_hours: Option<u32>,
    priority: u32,
    penalty: u32,
    compensation: u32,
    retention: u32,
) -> PolicyRuleSeed {
    PolicyRuleSeed {
        name: name.to_owned(),
        event_type,
        min_hours_before: min_hours,
        max_hours_before: max_hours,
        priority,
        penalty_percent: pct(penalty),
        compensation_percent: pct(compensation),
        retention_percent: pct(retention),
    }
}

/// The default operational rule table.
#[must_use]
pub fn default_policy_rules() -> Vec<PolicyRuleSeed> {
    use PolicyEventType::{
        ClientCancellation, ClientNoShow, ProviderCancellation, ProviderNoShow,
    };
    vec![
        seed("client cancel, free window", ClientCancellation, 24, None, 1, 0, 0, 0),
        seed("client cancel, 4-24h", ClientCancellation, 4, Some(24), 2, 20, 15, 5),
        seed("client cancel, last minute", ClientCancellation, 0, Some(4), 3, 40, 30, 10),
        seed("provider cancel, free window", ProviderCancellation, 24, None, 1, 0, 0, 0),
        seed("provider cancel, 4-24h", ProviderCancellation, 4, Some(24), 2, 25, 20, 5),
        seed("provider cancel, last minute", ProviderCancellation, 0, Some(4), 3, 50, 40, 10),
        seed("client no-show", ClientNoShow, 0, None, 1, 60, 45, 15),
        seed("provider no-show", ProviderNoShow, 0, None, 1, 40, 30, 10),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_working_defaults() {
        let config = BookdConfig::from_toml("").expect("empty config");
        assert_eq!(config.scheduling.confirmation_sla_hours, 12);
        assert_eq!(config.risk.policy.medium_threshold, 40);
        assert_eq!(config.completion.max_pin_attempts, 5);
        assert_eq!(config.financial.rules.len(), 8);
    }

    #[test]
    fn sections_override_independently() {
        let config = BookdConfig::from_toml(
            r#"
            [scheduling]
            confirmation_sla_hours = 24

            [risk.policy]
            high_threshold = 80
            "#,
        )
        .expect("partial config");

        assert_eq!(config.scheduling.confirmation_sla_hours, 24);
        // Untouched scheduling fields keep their defaults.
        assert_eq!(config.scheduling.min_slot_minutes, 15);
        assert_eq!(config.risk.policy.high_threshold, 80);
        assert_eq!(config.risk.policy.medium_threshold, 40);
    }

    #[test]
    fn rule_table_can_be_replaced() {
        let config = BookdConfig::from_toml(
            r#"
            [[financial.rules]]
            name = "flat client cancel"
            event_type = "client_cancellation"
            min_hours_before = 0
            priority = 1
            penalty_percent = 10
            compensation_percent = 8
            retention_percent = 2
            "#,
        )
        .expect("rule override");

        assert_eq!(config.financial.rules.len(), 1);
        let rule = config.financial.rules[0].clone().into_rule();
        assert_eq!(rule.event_type, PolicyEventType::ClientCancellation);
        assert!(rule.active);
        assert_eq!(rule.penalty_percent, Decimal::from(10));
    }

    #[test]
    fn invalid_toml_is_rejected() {
        assert!(BookdConfig::from_toml("scheduling = 3").is_err());
    }
}
