//! Tests for the financial policy engine, mirroring the operational rule
//! tables.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::*;

fn dec(value: &str) -> Decimal {
    value.parse().expect("literal decimal")
}

fn rule(
    name: &str,
    event_type: PolicyEventType,
    min_hours: u32,
    max_hours: Option<u32>,
    priority: u32,
    penalty: &str,
    compensation: &str,
    retention: &str,
) -> PolicyRule {
    PolicyRule {
        id: Uuid::new_v4(),
        name: name.to_owned(),
        event_type,
        min_hours_before: min_hours,
        max_hours_before: max_hours,
        priority,
        penalty_percent: dec(penalty),
        compensation_percent: dec(compensation),
        retention_percent: dec(retention),
        active: true,
    }
}

#[test]
fn selects_rule_by_antecedence_window() {
    let rules = vec![
        rule("free cancel > 24h", PolicyEventType::ClientCancellation, 24, None, 1, "0", "0", "0"),
        rule("cancel 4h-24h", PolicyEventType::ClientCancellation, 4, Some(24), 2, "20", "15", "5"),
        rule("late cancel < 4h", PolicyEventType::ClientCancellation, 0, Some(3), 3, "40", "30", "10"),
    ];

    let now = Utc::now();
    let breakdown = calculate(
        &rules,
        PolicyEventType::ClientCancellation,
        dec("200"),
        now + Duration::hours(10),
        now,
    )
    .expect("calculation");

    assert_eq!(breakdown.rule_name, "cancel 4h-24h");
    assert_eq!(breakdown.penalty_amount, dec("40"));
    assert_eq!(breakdown.compensation_amount, dec("30"));
    assert_eq!(breakdown.retention_amount, dec("10"));
    assert_eq!(breakdown.remaining_amount, dec("160"));
    assert_eq!(breakdown.counterparty, "provider");
}

#[test]
fn clamps_negative_antecedence_to_zero_for_no_shows() {
    let rules = vec![rule(
        "client no-show",
        PolicyEventType::ClientNoShow,
        0,
        None,
        1,
        "60",
        "45",
        "15",
    )];

    let now = Utc::now();
    let breakdown = calculate(
        &rules,
        PolicyEventType::ClientNoShow,
        dec("150"),
        now - Duration::hours(2),
        now,
    )
    .expect("calculation");

    assert_eq!(breakdown.hours_before_window, 0.0);
    assert_eq!(breakdown.penalty_amount, dec("90"));
    assert_eq!(breakdown.compensation_amount, dec("67.50"));
    assert_eq!(breakdown.retention_amount, dec("22.50"));
    assert_eq!(breakdown.remaining_amount, dec("60"));
    assert_eq!(breakdown.counterparty, "provider");
}

#[test]
fn fails_when_no_rule_matches() {
    let now = Utc::now();
    let err = calculate(
        &[],
        PolicyEventType::ProviderNoShow,
        dec("300"),
        now + Duration::hours(1),
        now,
    )
    .expect_err("no rules");

    assert_eq!(err.error_code(), "policy_rule_not_found");
}

#[test]
fn fails_on_non_positive_service_value() {
    let now = Utc::now();
    let err = calculate(
        &[rule("any", PolicyEventType::ClientCancellation, 0, None, 1, "10", "5", "5")],
        PolicyEventType::ClientCancellation,
        Decimal::ZERO,
        now + Duration::hours(8),
        now,
    )
    .expect_err("zero value");

    assert_eq!(err.error_code(), "invalid_service_value");
}

#[test]
fn shaves_rounding_overflow_from_retention_first() {
    // 33.33% of 1.00 rounds to 0.33; 16.67% rounds to 0.17 twice, allocating
    // 0.34 > 0.33. The platform share absorbs the spill.
    let rules = vec![rule(
        "round consistency",
        PolicyEventType::ProviderCancellation,
        0,
        None,
        1,
        "33.33",
        "16.67",
        "16.67",
    )];

    let now = Utc::now();
    let breakdown = calculate(
        &rules,
        PolicyEventType::ProviderCancellation,
        dec("1"),
        now + Duration::hours(3),
        now,
    )
    .expect("calculation");

    assert_eq!(breakdown.penalty_amount, dec("0.33"));
    assert_eq!(breakdown.compensation_amount, dec("0.17"));
    assert_eq!(breakdown.retention_amount, dec("0.16"));
    assert_eq!(
        breakdown.penalty_amount,
        breakdown.compensation_amount + breakdown.retention_amount
    );
    assert_eq!(breakdown.residual_amount(), Decimal::ZERO);
}

#[test]
fn shaves_compensation_when_overflow_exceeds_retention() {
    let rules = vec![rule(
        "overflow regression",
        PolicyEventType::ProviderCancellation,
        0,
        None,
        1,
        "33.33",
        "40",
        "5",
    )];

    let now = Utc::now();
    let breakdown = calculate(
        &rules,
        PolicyEventType::ProviderCancellation,
        dec("1"),
        now + Duration::hours(2),
        now,
    )
    .expect("calculation");

    assert_eq!(breakdown.penalty_amount, dec("0.33"));
    assert_eq!(breakdown.compensation_amount, dec("0.33"));
    assert_eq!(breakdown.retention_amount, Decimal::ZERO);
    assert_eq!(breakdown.remaining_amount, dec("0.67"));
    assert_eq!(breakdown.counterparty, "client");
}

#[test]
fn rounds_monetary_values_away_from_zero() {
    let rules = vec![rule(
        "rounding regression",
        PolicyEventType::ClientCancellation,
        0,
        None,
        1,
        "50",
        "30",
        "20",
    )];

    let now = Utc::now();
    let breakdown = calculate(
        &rules,
        PolicyEventType::ClientCancellation,
        dec("10.005"),
        now + Duration::hours(8),
        now,
    )
    .expect("calculation");

    assert_eq!(breakdown.service_value, dec("10.01"));
    assert_eq!(breakdown.penalty_amount, dec("5.01"));
    assert_eq!(breakdown.compensation_amount, dec("3.00"));
    assert_eq!(breakdown.retention_amount, dec("2.00"));
    assert_eq!(breakdown.remaining_amount, dec("5.00"));
}

#[test]
fn antecedence_bounds_are_inclusive() {
    let rules = vec![rule(
        "boundary regression",
        PolicyEventType::ClientCancellation,
        4,
        Some(24),
        1,
        "20",
        "15",
        "5",
    )];

    let now = Utc::now();
    for hours in [4, 24] {
        let breakdown = calculate(
            &rules,
            PolicyEventType::ClientCancellation,
            dec("100"),
            now + Duration::hours(hours),
            now,
        )
        .expect("calculation");
        assert_eq!(breakdown.rule_name, "boundary regression");
        assert_eq!(breakdown.penalty_amount, dec("20"));
        assert_eq!(breakdown.remaining_amount, dec("80"));
    }
}

#[test]
fn inactive_and_lower_priority_rules_are_skipped() {
    let mut shadowed = rule(
        "inactive",
        PolicyEventType::ClientNoShow,
        0,
        None,
        1,
        "90",
        "90",
        "0",
    );
    shadowed.active = false;
    let rules = vec![
        shadowed,
        rule("second priority", PolicyEventType::ClientNoShow, 0, None, 5, "10", "5", "5"),
        rule("first priority", PolicyEventType::ClientNoShow, 0, None, 2, "30", "20", "10"),
    ];

    let now = Utc::now();
    let breakdown = calculate(
        &rules,
        PolicyEventType::ClientNoShow,
        dec("100"),
        now + Duration::hours(1),
        now,
    )
    .expect("calculation");

    assert_eq!(breakdown.rule_name, "first priority");
}

#[test]
fn breakdown_reconciles_to_service_value() {
    let rules = vec![rule(
        "reconciliation",
        PolicyEventType::ProviderNoShow,
        0,
        None,
        1,
        "40",
        "30",
        "10",
    )];

    let now = Utc::now();
    let breakdown = calculate(
        &rules,
        PolicyEventType::ProviderNoShow,
        dec("300"),
        now + Duration::hours(6),
        now,
    )
    .expect("calculation");

    assert_eq!(
        breakdown.penalty_amount,
        breakdown.compensation_amount + breakdown.retention_amount + breakdown.residual_amount()
    );
    assert_eq!(
        breakdown.remaining_amount + breakdown.penalty_amount,
        breakdown.service_value
    );
}
