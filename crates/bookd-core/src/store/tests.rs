//! Tests for the persistence layer.

use chrono::{Duration, TimeZone, Utc, Weekday};
use rust_decimal::Decimal;
use tempfile::TempDir;
use uuid::Uuid;

use super::*;
use crate::appointment::entity::{Appointment, AppointmentHistory, HistoryMetadata, RiskSnapshot};
use crate::appointment::state::{ActorRole, AppointmentStatus};
use crate::availability::{AvailabilityException, AvailabilityRule, ExceptionKind};
use crate::completion::CompletionTerm;
use crate::config::default_policy_rules;
use crate::financial::PolicyEventType;
use crate::risk::{NoShowQueueItem, QueueFilter, QueueStatus, RiskLevel};

fn at(day: u32, hour: u32) -> chrono::DateTime<chrono::Utc> {
    Utc.with_ymd_and_hms(2026, 6, day, hour, 0, 0).unwrap()
}

fn full_week_rule(provider_id: Uuid) -> Vec<AvailabilityRule> {
    [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
        Weekday::Sat,
        Weekday::Sun,
    ]
    .into_iter()
    .map(|weekday| AvailabilityRule {
        id: Uuid::new_v4(),
        provider_id,
        weekday,
        start_minute: 8 * 60,
        end_minute: 22 * 60,
        slot_minutes: 60,
        active: true,
    })
    .collect()
}

fn appointment(provider_id: Uuid, day: u32, start_hour: u32, end_hour: u32) -> Appointment {
    let now = Utc::now();
    Appointment {
        id: Uuid::new_v4(),
        service_request_id: Uuid::new_v4(),
        client_id: Uuid::new_v4(),
        provider_id,
        window_start_utc: at(day, start_hour),
        window_end_utc: at(day, end_hour),
        status: AppointmentStatus::PendingProviderConfirmation,
        expires_at_utc: Some(now + Duration::hours(12)),
        reason: None,
        proposed_window_start_utc: None,
        proposed_window_end_utc: None,
        reschedule_requested_at_utc: None,
        reschedule_requested_by_role: None,
        reschedule_request_reason: None,
        confirmed_at_utc: None,
        arrived_at_utc: None,
        arrived_latitude: None,
        arrived_longitude: None,
        arrived_accuracy_meters: None,
        arrived_manual_reason: None,
        started_at_utc: None,
        rejected_at_utc: None,
        cancelled_at_utc: None,
        completed_at_utc: None,
        operational_status: None,
        operational_status_updated_at_utc: None,
        operational_status_reason: None,
        client_presence_confirmed: None,
        client_presence_responded_at_utc: None,
        client_presence_reason: None,
        provider_presence_confirmed: None,
        provider_presence_responded_at_utc: None,
        provider_presence_reason: None,
        no_show_risk_score: None,
        no_show_risk_level: None,
        no_show_risk_reasons: None,
        no_show_risk_calculated_at_utc: None,
        created_at: now,
        updated_at: None,
    }
}

fn creation_history(a: &Appointment) -> AppointmentHistory {
    AppointmentHistory {
        id: Uuid::new_v4(),
        appointment_id: a.id,
        previous_status: None,
        new_status: a.status,
        actor_user_id: Some(a.client_id),
        actor_role: ActorRole::Client,
        reason: Some("appointment created".to_owned()),
        previous_operational_status: None,
        new_operational_status: None,
        metadata: None,
        occurred_at_utc: a.created_at,
    }
}

fn seeded_store(provider_id: Uuid) -> Store {
    let store = Store::in_memory().expect("in-memory store");
    for rule in full_week_rule(provider_id) {
        store.insert_rule(&rule).expect("insert rule");
    }
    store
}

#[test]
fn open_creates_the_database_on_disk() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("bookd.db");
    let store = Store::open(&path).expect("open store");
    assert!(path.exists());

    let provider = Uuid::new_v4();
    let a = appointment(provider, 1, 10, 11);
    store.insert_rule(&full_week_rule(provider)[0]).expect("rule");
    let outcome = store
        .create_appointment_if_free(&a, &creation_history(&a))
        .expect("create");
    assert_eq!(outcome, CreateOutcome::Created);

    // Reopen and read back.
    drop(store);
    let store = Store::open(&path).expect("reopen");
    let loaded = store.get_appointment(a.id).expect("get").expect("present");
    assert_eq!(loaded.window_start_utc, a.window_start_utc);
    assert_eq!(loaded.status, AppointmentStatus::PendingProviderConfirmation);
}

#[test]
fn appointment_round_trips_all_fields() {
    let provider = Uuid::new_v4();
    let store = seeded_store(provider);

    let mut a = appointment(provider, 1, 10, 11);
    a.reason = Some("leaky sink".to_owned());
    a.client_presence_confirmed = Some(true);
    a.no_show_risk_score = Some(35);
    a.no_show_risk_level = Some(RiskLevel::Low);
    a.no_show_risk_reasons = Some("client_presence_not_confirmed".to_owned());

    let outcome = store
        .create_appointment_if_free(&a, &creation_history(&a))
        .expect("create");
    assert_eq!(outcome, CreateOutcome::Created);

    let loaded = store.get_appointment(a.id).expect("get").expect("present");
    assert_eq!(loaded.reason.as_deref(), Some("leaky sink"));
    assert_eq!(loaded.client_presence_confirmed, Some(true));
    assert_eq!(loaded.no_show_risk_score, Some(35));
    assert_eq!(loaded.no_show_risk_level, Some(RiskLevel::Low));
}

#[test]
fn overlapping_create_is_refused_adjacent_is_not() {
    let provider = Uuid::new_v4();
    let store = seeded_store(provider);

    let first = appointment(provider, 1, 10, 11);
    assert_eq!(
        store
            .create_appointment_if_free(&first, &creation_history(&first))
            .expect("create"),
        CreateOutcome::Created
    );

    // [10:30, 11:30) overlaps [10:00, 11:00).
    let mut overlapping = appointment(provider, 1, 10, 11);
    overlapping.window_start_utc = at(1, 10) + Duration::minutes(30);
    overlapping.window_end_utc = at(1, 11) + Duration::minutes(30);
    assert_eq!(
        store
            .create_appointment_if_free(&overlapping, &creation_history(&overlapping))
            .expect("create"),
        CreateOutcome::SlotUnavailable
    );

    // [11:00, 12:00) is adjacent, half-open semantics admit it.
    let adjacent = appointment(provider, 1, 11, 12);
    assert_eq!(
        store
            .create_appointment_if_free(&adjacent, &creation_history(&adjacent))
            .expect("create"),
        CreateOutcome::Created
    );
}

#[test]
fn duplicate_request_booking_is_refused_until_terminal() {
    let provider = Uuid::new_v4();
    let store = seeded_store(provider);

    let first = appointment(provider, 1, 10, 11);
    store
        .create_appointment_if_free(&first, &creation_history(&first))
        .expect("create");

    let mut second = appointment(provider, 2, 10, 11);
    second.service_request_id = first.service_request_id;
    assert_eq!(
        store
            .create_appointment_if_free(&second, &creation_history(&second))
            .expect("create"),
        CreateOutcome::RequestAlreadyBooked
    );

    // Cancel the first; the request becomes bookable again.
    let mut cancelled = first.clone();
    cancelled.status = AppointmentStatus::CancelledByClient;
    cancelled.cancelled_at_utc = Some(Utc::now());
    store.update_appointment(&cancelled).expect("update");

    assert_eq!(
        store
            .create_appointment_if_free(&second, &creation_history(&second))
            .expect("create"),
        CreateOutcome::Created
    );
}

#[test]
fn terminal_appointments_free_their_windows() {
    let provider = Uuid::new_v4();
    let store = seeded_store(provider);

    let first = appointment(provider, 1, 10, 11);
    store
        .create_appointment_if_free(&first, &creation_history(&first))
        .expect("create");

    let mut rejected = first.clone();
    rejected.status = AppointmentStatus::RejectedByProvider;
    store.update_appointment(&rejected).expect("update");

    let replacement = appointment(provider, 1, 10, 11);
    assert_eq!(
        store
            .create_appointment_if_free(&replacement, &creation_history(&replacement))
            .expect("create"),
        CreateOutcome::Created
    );
}

#[test]
fn reschedule_commit_rechecks_the_window() {
    let provider = Uuid::new_v4();
    let store = seeded_store(provider);

    let mut first = appointment(provider, 1, 10, 11);
    first.status = AppointmentStatus::Confirmed;
    store
        .create_appointment_if_free(&first, &creation_history(&first))
        .expect("create");

    let mut competitor = appointment(provider, 1, 14, 15);
    competitor.status = AppointmentStatus::Confirmed;
    store
        .create_appointment_if_free(&competitor, &creation_history(&competitor))
        .expect("create");

    // Moving `first` onto the competitor's window loses the race.
    let mut moved = first.clone();
    moved.window_start_utc = at(1, 14);
    moved.window_end_utc = at(1, 15);
    moved.status = AppointmentStatus::RescheduleConfirmed;
    assert_eq!(
        store
            .commit_reschedule_if_free(&moved, &creation_history(&moved))
            .expect("commit"),
        RescheduleOutcome::SlotUnavailable
    );

    // Moving to a free window commits; the appointment's own old window
    // does not block it.
    moved.window_start_utc = at(1, 10);
    moved.window_end_utc = at(1, 12);
    assert_eq!(
        store
            .commit_reschedule_if_free(&moved, &creation_history(&moved))
            .expect("commit"),
        RescheduleOutcome::Committed
    );
    let loaded = store.get_appointment(first.id).expect("get").expect("present");
    assert_eq!(loaded.window_end_utc, at(1, 12));
    assert_eq!(loaded.status, AppointmentStatus::RescheduleConfirmed);
}

#[test]
fn history_metadata_round_trips_typed() {
    let provider = Uuid::new_v4();
    let store = seeded_store(provider);

    let a = appointment(provider, 1, 10, 11);
    store
        .create_appointment_if_free(&a, &creation_history(&a))
        .expect("create");

    let mut h = creation_history(&a);
    h.id = Uuid::new_v4();
    h.metadata = Some(HistoryMetadata::NoShowRiskAssessment {
        previous: RiskSnapshot { score: None, level: None, reasons: None },
        current: RiskSnapshot {
            score: Some(70),
            level: Some(RiskLevel::High),
            reasons: Some("both_presence_not_confirmed".to_owned()),
        },
    });
    store.append_history(&h).expect("history");

    let trail = store.history_for(a.id).expect("trail");
    assert_eq!(trail.len(), 2);
    match trail[1].metadata.as_ref().expect("metadata") {
        HistoryMetadata::NoShowRiskAssessment { current, .. } => {
            assert_eq!(current.score, Some(70));
            assert_eq!(current.level, Some(RiskLevel::High));
        }
        other => panic!("unexpected metadata variant: {other:?}"),
    }
}

#[test]
fn expired_pending_pages_and_skips_fresh_rows() {
    let provider = Uuid::new_v4();
    let store = seeded_store(provider);
    let now = Utc::now();

    for day in 1..=4u32 {
        let mut a = appointment(provider, day, 10, 11);
        a.expires_at_utc = Some(if day <= 3 {
            now - Duration::minutes(i64::from(day))
        } else {
            now + Duration::hours(1)
        });
        store
            .create_appointment_if_free(&a, &creation_history(&a))
            .expect("create");
    }

    let page = store.expired_pending(now, 2).expect("page");
    assert_eq!(page.len(), 2);
    let all = store.expired_pending(now, 10).expect("all");
    assert_eq!(all.len(), 3);
}

#[test]
fn availability_exception_round_trip_and_delete() {
    let provider = Uuid::new_v4();
    let store = seeded_store(provider);

    let exception = AvailabilityException {
        id: Uuid::new_v4(),
        provider_id: provider,
        kind: ExceptionKind::Block,
        starts_at_utc: at(1, 9),
        ends_at_utc: at(1, 12),
        reason: Some("equipment maintenance".to_owned()),
    };
    store.insert_exception(&exception).expect("insert");

    let found = store
        .exceptions_overlapping(provider, at(1, 0), at(2, 0))
        .expect("query");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].kind, ExceptionKind::Block);

    // The exception blocks creation inside its interval.
    let a = appointment(provider, 1, 10, 11);
    assert_eq!(
        store
            .create_appointment_if_free(&a, &creation_history(&a))
            .expect("create"),
        CreateOutcome::SlotUnavailable
    );

    assert!(store.delete_exception(exception.id).expect("delete"));
    assert!(!store.delete_exception(exception.id).expect("second delete"));
    assert_eq!(
        store
            .create_appointment_if_free(&a, &creation_history(&a))
            .expect("create"),
        CreateOutcome::Created
    );
}

#[test]
fn completion_term_round_trips() {
    let provider = Uuid::new_v4();
    let store = seeded_store(provider);

    let a = appointment(provider, 1, 10, 11);
    store
        .create_appointment_if_free(&a, &creation_history(&a))
        .expect("create");

    let term = CompletionTerm::new_pending(
        a.service_request_id,
        a.id,
        a.provider_id,
        a.client_id,
        "Visit completion".to_owned(),
        "123456",
        10,
        Utc::now(),
    );
    store.insert_term(&term).expect("insert term");

    let mut loaded = store
        .term_for_appointment(a.id)
        .expect("query")
        .expect("present");
    assert_eq!(loaded.id, term.id);
    assert_eq!(loaded.pin_failed_attempts, 0);

    loaded.validate_pin("123456", 5, Utc::now()).expect("accept");
    store.update_term(&loaded).expect("update term");

    let reloaded = store
        .term_for_appointment(a.id)
        .expect("query")
        .expect("present");
    assert!(reloaded.pin_hash.is_none());
    assert!(reloaded.status.is_terminal());
}

#[test]
fn queue_upsert_helpers_and_terminal_resolution() {
    let provider = Uuid::new_v4();
    let store = seeded_store(provider);

    let a = appointment(provider, 1, 10, 11);
    store
        .create_appointment_if_free(&a, &creation_history(&a))
        .expect("create");

    assert!(store.active_queue_item(a.id).expect("query").is_none());

    let now = Utc::now();
    let item = NoShowQueueItem {
        id: Uuid::new_v4(),
        appointment_id: a.id,
        risk_level: RiskLevel::High,
        score: 85,
        reasons_csv: "both_presence_not_confirmed,window_within_2h".to_owned(),
        status: QueueStatus::Open,
        city: Some("santos".to_owned()),
        category: Some("electrical".to_owned()),
        first_detected_at_utc: now,
        last_detected_at_utc: now,
        resolved_at_utc: None,
        resolved_by: None,
        resolution_note: None,
    };
    store.insert_queue_item(&item).expect("insert");

    let active = store.active_queue_item(a.id).expect("query").expect("present");
    assert_eq!(active.score, 85);

    assert!(store
        .resolve_queue_for_appointment(a.id, "appointment reached terminal state", now)
        .expect("resolve"));
    assert!(store.active_queue_item(a.id).expect("query").is_none());
    let resolved = store.get_queue_item(item.id).expect("query").expect("present");
    assert_eq!(resolved.status, QueueStatus::Resolved);
    assert!(resolved.resolution_note.is_some());
}

#[test]
fn queue_listing_filters_and_paginates_at_volume() {
    let provider = Uuid::new_v4();
    let store = seeded_store(provider);
    let base = Utc::now();

    // 6k queue rows across two cities and three levels.
    for i in 0..6_000u32 {
        let item = NoShowQueueItem {
            id: Uuid::new_v4(),
            appointment_id: Uuid::new_v4(),
            risk_level: match i % 3 {
                0 => RiskLevel::Low,
                1 => RiskLevel::Medium,
                _ => RiskLevel::High,
            },
            score: (i % 100) as u8,
            reasons_csv: "window_within_24h".to_owned(),
            status: if i % 5 == 0 { QueueStatus::Resolved } else { QueueStatus::Open },
            city: Some(if i % 2 == 0 { "santos" } else { "campinas" }.to_owned()),
            category: Some("plumbing".to_owned()),
            first_detected_at_utc: base,
            last_detected_at_utc: base + Duration::seconds(i64::from(i)),
            resolved_at_utc: None,
            resolved_by: None,
            resolution_note: None,
        };
        store.insert_queue_item(&item).expect("insert");
    }

    let filter = QueueFilter {
        status: Some(QueueStatus::Open),
        risk_level: Some(RiskLevel::High),
        city: Some("santos".to_owned()),
        category: None,
        limit: Some(50),
        offset: Some(0),
    };
    let page = store.list_queue_items(&filter).expect("page");
    assert_eq!(page.items.len(), 50);
    assert!(page.total > 50);
    // Newest detections first.
    for pair in page.items.windows(2) {
        assert!(pair[0].last_detected_at_utc >= pair[1].last_detected_at_utc);
    }
    for item in &page.items {
        assert_eq!(item.status, QueueStatus::Open);
        assert_eq!(item.risk_level, RiskLevel::High);
        assert_eq!(item.city.as_deref(), Some("santos"));
    }

    // Pagination advances without overlap.
    let second = store
        .list_queue_items(&QueueFilter { offset: Some(50), ..filter.clone() })
        .expect("page 2");
    assert!(second.items.first().map(|i| i.last_detected_at_utc)
        <= page.items.last().map(|i| i.last_detected_at_utc));
}

#[test]
fn policy_rules_seed_once_and_filter_by_event() {
    let store = Store::in_memory().expect("store");
    let rules: Vec<_> = default_policy_rules().into_iter().map(|s| s.into_rule()).collect();

    store.seed_policy_rules(&rules).expect("seed");
    // Second seed is a no-op.
    store.seed_policy_rules(&rules).expect("reseed");

    let client_cancel = store
        .active_policy_rules(PolicyEventType::ClientCancellation)
        .expect("rules");
    assert_eq!(client_cancel.len(), 3);
    assert!(client_cancel.windows(2).all(|w| w[0].priority <= w[1].priority));
    assert_eq!(client_cancel[1].penalty_percent, Decimal::from(20));

    let provider_no_show = store
        .active_policy_rules(PolicyEventType::ProviderNoShow)
        .expect("rules");
    assert_eq!(provider_no_show.len(), 1);
}

#[test]
fn risk_event_counters_scope_by_party_and_time() {
    let provider = Uuid::new_v4();
    let store = seeded_store(provider);
    let now = Utc::now();
    let client = Uuid::new_v4();

    let mut cancelled = appointment(provider, 1, 10, 11);
    cancelled.client_id = client;
    store
        .create_appointment_if_free(&cancelled, &creation_history(&cancelled))
        .expect("create");
    cancelled.status = AppointmentStatus::CancelledByClient;
    cancelled.cancelled_at_utc = Some(now - Duration::days(5));
    store.update_appointment(&cancelled).expect("update");

    let mut expired = appointment(provider, 2, 10, 11);
    store
        .create_appointment_if_free(&expired, &creation_history(&expired))
        .expect("create");
    expired.status = AppointmentStatus::ExpiredWithoutProviderAction;
    expired.updated_at = Some(now - Duration::days(3));
    store.update_appointment(&expired).expect("update");

    let lookback = now - Duration::days(90);
    assert_eq!(
        store.count_client_risk_events(client, lookback, now).expect("count"),
        1
    );
    assert_eq!(
        store.count_provider_risk_events(provider, lookback, now).expect("count"),
        1
    );
    // Outside the window nothing counts.
    let outside = now - Duration::days(1);
    assert_eq!(
        store
            .count_client_risk_events(client, lookback, outside - Duration::days(10))
            .expect("count"),
        0
    );
}
