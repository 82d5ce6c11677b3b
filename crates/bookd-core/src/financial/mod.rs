//! Financial policy engine: penalty / compensation / retention splits for
//! cancellations and no-shows.
//!
//! Rule selection is table-driven: each [`PolicyRule`] binds an event type
//! to an inclusive antecedence interval (hours before the window start) and
//! a percentage split. The engine picks the first active rule, in priority
//! order, whose interval contains the clamped antecedence, then computes
//! money amounts on the request's agreed value with 2-dp away-from-zero
//! rounding.
//!
//! Reconciliation invariant: after rounding,
//! `compensation + retention <= penalty` always holds; any rounding
//! overflow is shaved from the platform's retention first, then from the
//! compensation, never silently dropped. `remaining + penalty` recovers the
//! service value (modulo the explicit rounding of each term).
//!
//! Engine failures never abort the booking transition that triggered them;
//! callers record them as history entries instead (fail open on money, fail
//! closed on booking).

#[cfg(test)]
mod tests;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Financially relevant lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyEventType {
    /// Client cancelled inside the policy window.
    ClientCancellation,
    /// Provider cancelled inside the policy window.
    ProviderCancellation,
    /// Client failed to show.
    ClientNoShow,
    /// Provider failed to show (including silent expiry of a pending
    /// confirmation).
    ProviderNoShow,
}

impl PolicyEventType {
    /// Which party is compensated for this event.
    #[must_use]
    pub const fn counterparty_label(self) -> &'static str {
        match self {
            Self::ClientCancellation | Self::ClientNoShow => "provider",
            Self::ProviderCancellation | Self::ProviderNoShow => "client",
        }
    }

    /// Whether the at-fault party is the provider.
    #[must_use]
    pub const fn provider_at_fault(self) -> bool {
        matches!(self, Self::ProviderCancellation | Self::ProviderNoShow)
    }

    /// Stable storage / wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClientCancellation => "client_cancellation",
            Self::ProviderCancellation => "provider_cancellation",
            Self::ClientNoShow => "client_no_show",
            Self::ProviderNoShow => "provider_no_show",
        }
    }

    /// Parse the storage representation back into an event type.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "client_cancellation" => Self::ClientCancellation,
            "provider_cancellation" => Self::ProviderCancellation,
            "client_no_show" => Self::ClientNoShow,
            "provider_no_show" => Self::ProviderNoShow,
            _ => return None,
        })
    }
}

impl std::fmt::Display for PolicyEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the financial policy rule table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Rule id.
    pub id: Uuid,
    /// Operator-facing rule name, echoed in breakdowns.
    pub name: String,
    /// Event this rule applies to.
    pub event_type: PolicyEventType,
    /// Inclusive lower antecedence bound, hours before window start.
    pub min_hours_before: u32,
    /// Inclusive upper antecedence bound; `None` means unbounded.
    pub max_hours_before: Option<u32>,
    /// Selection order among rules of the same event type (ascending).
    pub priority: u32,
    /// Penalty taken from the at-fault party, percent of service value.
    pub penalty_percent: Decimal,
    /// Share granted to the counterparty, percent of service value.
    pub compensation_percent: Decimal,
    /// Share retained by the platform, percent of service value.
    pub retention_percent: Decimal,
    /// Inactive rules are never selected.
    pub active: bool,
}

/// Computed penalty split, embedded in history metadata and echoed to
/// operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Breakdown {
    /// The selected rule.
    pub rule_id: Uuid,
    /// Name of the selected rule.
    pub rule_name: String,
    /// The triggering event.
    pub event_type: PolicyEventType,
    /// Normalized (rounded) service value the split was computed on.
    pub service_value: Decimal,
    /// Clamped antecedence in hours, rounded to 2 dp for display.
    pub hours_before_window: f64,
    /// Penalty percent from the rule.
    pub penalty_percent: Decimal,
    /// `service_value × penalty_percent`, rounded.
    pub penalty_amount: Decimal,
    /// Compensation percent from the rule.
    pub compensation_percent: Decimal,
    /// Counterparty compensation amount after the consistency clamp.
    pub compensation_amount: Decimal,
    /// Retention percent from the rule.
    pub retention_percent: Decimal,
    /// Platform retention amount after the consistency clamp.
    pub retention_amount: Decimal,
    /// `max(0, service_value − penalty_amount)`.
    pub remaining_amount: Decimal,
    /// Who is compensated (`client` / `provider`).
    pub counterparty: String,
    /// Human-readable computation memo.
    pub memo: String,
}

impl Breakdown {
    /// Rounding residual retained implicitly by the penalty:
    /// `penalty − compensation − retention`. Non-negative by construction.
    #[must_use]
    pub fn residual_amount(&self) -> Decimal {
        self.penalty_amount - self.compensation_amount - self.retention_amount
    }
}

/// Errors from the financial policy engine.
///
/// These are recorded in history metadata by callers; they never propagate
/// past a booking transition.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FinancialError {
    /// The agreed service value is missing, zero, or negative.
    #[error("service value must be greater than zero")]
    InvalidServiceValue,

    /// No active rule matches the event and antecedence.
    #[error("no active financial policy rule matches event {event} at {hours:.2}h antecedence")]
    RuleNotFound {
        /// The event being priced.
        event: PolicyEventType,
        /// The clamped antecedence that failed to match.
        hours: f64,
    },
}

impl FinancialError {
    /// Stable engine error code, recorded in history metadata.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidServiceValue => "invalid_service_value",
            Self::RuleNotFound { .. } => "policy_rule_not_found",
        }
    }
}

/// Round a monetary amount to 2 dp, midpoint away from zero.
fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Select the matching rule for an event at the given antecedence.
///
/// `rules` must already be filtered to the event type and active flag; the
/// engine sorts by priority and takes the first rule whose inclusive
/// `[min_hours, max_hours]` interval contains `hours_before`.
fn select_rule(rules: &[PolicyRule], hours_before: f64) -> Option<&PolicyRule> {
    let mut ordered: Vec<&PolicyRule> = rules.iter().filter(|r| r.active).collect();
    ordered.sort_by_key(|r| r.priority);
    ordered.into_iter().find(|rule| {
        hours_before >= f64::from(rule.min_hours_before)
            && rule
                .max_hours_before
                .map_or(true, |max| hours_before <= f64::from(max))
    })
}

/// Compute the penalty split for one event.
///
/// `rules` is the active rule set for `event` (order irrelevant; the engine
/// re-sorts by priority). Negative antecedence (event after the window
/// started) clamps to zero, so late no-shows price like zero-notice ones.
///
/// # Errors
///
/// - [`FinancialError::InvalidServiceValue`] when `service_value <= 0`.
/// - [`FinancialError::RuleNotFound`] when no active rule matches.
pub fn calculate(
    rules: &[PolicyRule],
    event: PolicyEventType,
    service_value: Decimal,
    window_start_utc: DateTime<Utc>,
    occurred_at_utc: DateTime<Utc>,
) -> Result<Breakdown, FinancialError> {
    if service_value <= Decimal::ZERO {
        return Err(FinancialError::InvalidServiceValue);
    }

    let service_value = round_money(service_value);
    let raw_hours =
        (window_start_utc - occurred_at_utc).num_seconds() as f64 / 3600.0;
    let hours_before = raw_hours.max(0.0);

    let rule = select_rule(rules, hours_before)
        .ok_or(FinancialError::RuleNotFound { event, hours: hours_before })?;

    let percent = |p: Decimal| round_money(service_value * p / Decimal::ONE_HUNDRED);
    let penalty_amount = percent(rule.penalty_percent);
    let mut compensation_amount = percent(rule.compensation_percent);
    let mut retention_amount = percent(rule.retention_percent);

    // Rounding can push the allocated shares past the penalty; shave the
    // overflow from retention first, then from compensation.
    let allocated = compensation_amount + retention_amount;
    if allocated > penalty_amount {
        let mut overflow = allocated - penalty_amount;
        if retention_amount >= overflow {
            retention_amount = round_money(retention_amount - overflow);
        } else {
            overflow -= retention_amount;
            retention_amount = Decimal::ZERO;
            compensation_amount =
                round_money((compensation_amount - overflow).max(Decimal::ZERO));
        }
    }

    let remaining_amount = round_money((service_value - penalty_amount).max(Decimal::ZERO));
    let hours_display = (hours_before * 100.0).round() / 100.0;

    let memo = format!(
        "event={}; rule='{}'; antecedence_hours={:.2}; base_value={}; \
         penalty={}%({}); compensation={}%({}); retention={}%({}); remaining={}",
        event,
        rule.name,
        hours_display,
        service_value,
        rule.penalty_percent,
        penalty_amount,
        rule.compensation_percent,
        compensation_amount,
        rule.retention_percent,
        retention_amount,
        remaining_amount,
    );

    Ok(Breakdown {
        rule_id: rule.id,
        rule_name: rule.name.clone(),
        event_type: event,
        service_value,
        hours_before_window: hours_display,
        penalty_percent: rule.penalty_percent,
        penalty_amount,
        compensation_percent: rule.compensation_percent,
        compensation_amount,
        retention_percent: rule.retention_percent,
        retention_amount,
        remaining_amount,
        counterparty: event.counterparty_label().to_owned(),
        memo,
    })
}
