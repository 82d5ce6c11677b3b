//! Availability resolution: recurring weekly rules, one-off exceptions, and
//! slot computation.
//!
//! A provider's bookable time is the union of their active weekly rules,
//! overridden by exceptions (a [`ExceptionKind::Block`] exception closes an
//! otherwise-open interval, an [`ExceptionKind::Open`] exception opens an
//! otherwise-closed one), minus the windows of every appointment that
//! still blocks the calendar.
//!
//! All interval logic is half-open: a window ending exactly when another
//! starts does not conflict.


use chrono::{DateTime, Datelike, Duration, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Recurring weekly availability window.
///
/// Times are minutes from UTC midnight; a rule covers `[start_minute,
/// end_minute)` on its weekday.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityRule {
    /// Rule id.
    pub id: Uuid,
    /// Owning provider.
    pub provider_id: Uuid,
    /// Weekday the rule recurs on.
    pub weekday: Weekday,
    /// Window start, minutes from UTC midnight.
    pub start_minute: u32,
    /// Window end, minutes from UTC midnight (exclusive).
    pub end_minute: u32,
    /// Default slot granularity when the caller does not request one.
    pub slot_minutes: u32,
    /// Inactive rules are ignored by the resolver.
    pub active: bool,
}

/// Whether an exception blocks or opens its interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionKind {
    /// Closes the interval regardless of rules.
    Block,
    /// Opens the interval regardless of rules.
    Open,
}

impl ExceptionKind {
    /// Stable storage / wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Open => "open",
        }
    }

    /// Parse the storage representation back into a kind.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "block" => Self::Block,
            "open" => Self::Open,
            _ => return None,
        })
    }
}

/// One-off availability override for a concrete UTC interval.
///
/// Exceptions fully override rules over their interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityException {
    /// Exception id.
    pub id: Uuid,
    /// Owning provider.
    pub provider_id: Uuid,
    /// Block or open.
    pub kind: ExceptionKind,
    /// Interval start (inclusive).
    pub starts_at_utc: DateTime<Utc>,
    /// Interval end (exclusive).
    pub ends_at_utc: DateTime<Utc>,
    /// Optional annotation (vacation, emergency slot, ...).
    pub reason: Option<String>,
}

/// A bookable candidate window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    /// Window start (inclusive).
    pub window_start_utc: DateTime<Utc>,
    /// Window end (exclusive).
    pub window_end_utc: DateTime<Utc>,
}

/// Bounds applied to slot queries and appointment windows.
///
/// Sourced from configuration; see `SchedulingConfig`.
#[derive(Debug, Clone, Copy)]
pub struct SlotLimits {
    /// Minimum slot / window duration in minutes.
    pub min_slot_minutes: u32,
    /// Maximum slot duration in minutes.
    pub max_slot_minutes: u32,
    /// Fallback granularity for intervals without a rule default.
    pub default_slot_minutes: u32,
    /// Maximum slot query range in days.
    pub max_query_range_days: u32,
}

/// Half-open interval overlap test.
#[must_use]
pub fn overlaps(
    left_start: DateTime<Utc>,
    left_end: DateTime<Utc>,
    right_start: DateTime<Utc>,
    right_end: DateTime<Utc>,
) -> bool {
    left_start < right_end && right_start < left_end
}

/// Materialize bookable slots for a provider over a query range.
///
/// `busy` carries the windows of every appointment currently blocking the
/// calendar. The output is deduplicated and ordered by start time.
#[must_use]
pub fn build_slots(
    rules: &[AvailabilityRule],
    exceptions: &[AvailabilityException],
    busy: &[(DateTime<Utc>, DateTime<Utc>)],
    range_start_utc: DateTime<Utc>,
    range_end_utc: DateTime<Utc>,
    requested_slot_minutes: Option<u32>,
    limits: &SlotLimits,
) -> Vec<Slot> {
    let mut slots: Vec<Slot> = Vec::new();

    let candidate_ok = |start: DateTime<Utc>, end: DateTime<Utc>| {
        start >= range_start_utc
            && end <= range_end_utc
            && !exceptions.iter().any(|e| {
                e.kind == ExceptionKind::Block
                    && overlaps(start, end, e.starts_at_utc, e.ends_at_utc)
            })
            && !busy.iter().any(|&(bs, be)| overlaps(start, end, bs, be))
    };

    let mut day = range_start_utc.date_naive();
    let last_day = range_end_utc.date_naive();
    while day <= last_day {
        let midnight = day
            .and_hms_opt(0, 0, 0)
            .expect("midnight is always a valid time")
            .and_utc();

        for rule in rules.iter().filter(|r| r.active && r.weekday == day.weekday()) {
            let slot_minutes = requested_slot_minutes.unwrap_or(rule.slot_minutes);
            if slot_minutes < limits.min_slot_minutes || slot_minutes > limits.max_slot_minutes {
                continue;
            }

            let rule_start = midnight + Duration::minutes(i64::from(rule.start_minute));
            let rule_end = midnight + Duration::minutes(i64::from(rule.end_minute));
            if rule_end <= range_start_utc || rule_start >= range_end_utc {
                continue;
            }

            let step = Duration::minutes(i64::from(slot_minutes));
            let mut cursor = rule_start;
            while cursor + step <= rule_end {
                if candidate_ok(cursor, cursor + step) {
                    slots.push(Slot { window_start_utc: cursor, window_end_utc: cursor + step });
                }
                cursor = cursor + step;
            }
        }

        day = day + Duration::days(1);
    }

    // Open exceptions contribute slots independent of any rule.
    for exception in exceptions.iter().filter(|e| e.kind == ExceptionKind::Open) {
        let slot_minutes = requested_slot_minutes.unwrap_or(limits.default_slot_minutes);
        if slot_minutes < limits.min_slot_minutes || slot_minutes > limits.max_slot_minutes {
            continue;
        }
        let step = Duration::minutes(i64::from(slot_minutes));
        let mut cursor = exception.starts_at_utc;
        while cursor + step <= exception.ends_at_utc {
            if candidate_ok(cursor, cursor + step) {
                slots.push(Slot { window_start_utc: cursor, window_end_utc: cursor + step });
            }
            cursor = cursor + step;
        }
    }

    slots.sort_by_key(|s| (s.window_start_utc, s.window_end_utc));
    slots.dedup();
    slots
}

/// Booking-time conflict predicate.
///
/// A window is free when it lies inside an open interval (covered by a
/// single active rule on its weekday, or by an `Open` exception) and
/// overlaps neither a `Block` exception nor a busy window. The same
/// predicate is re-run inside the committing transaction so the losing
/// concurrent writer fails with `slot_unavailable` rather than silently
/// double-booking.
#[must_use]
pub fn window_is_free(
    rules: &[AvailabilityRule],
    exceptions: &[AvailabilityException],
    busy: &[(DateTime<Utc>, DateTime<Utc>)],
    window_start_utc: DateTime<Utc>,
    window_end_utc: DateTime<Utc>,
) -> bool {
    let start_minute = window_start_utc.hour() * 60 + window_start_utc.minute();
    let end_minute = window_end_utc.hour() * 60 + window_end_utc.minute();

    let covered_by_rule = rules.iter().any(|rule| {
        rule.active
            && rule.weekday == window_start_utc.weekday()
            && rule.start_minute <= start_minute
            && rule.end_minute >= end_minute
            && end_minute > start_minute
    });

    let covered_by_open_exception = exceptions.iter().any(|e| {
        e.kind == ExceptionKind::Open
            && e.starts_at_utc <= window_start_utc
            && e.ends_at_utc >= window_end_utc
    });

    if !covered_by_rule && !covered_by_open_exception {
        return false;
    }

    if exceptions.iter().any(|e| {
        e.kind == ExceptionKind::Block
            && overlaps(window_start_utc, window_end_utc, e.starts_at_utc, e.ends_at_utc)
    }) {
        return false;
    }

    !busy
        .iter()
        .any(|&(bs, be)| overlaps(window_start_utc, window_end_utc, bs, be))
}
