//! End-to-end lifecycle test against the public crate API: booking through
//! completion on one appointment, cancellation economics on another, with
//! the store on disk.

use std::sync::Arc;

use chrono::{Duration, Utc, Weekday};
use rust_decimal::Decimal;
use tempfile::TempDir;
use uuid::Uuid;

use bookd_core::appointment::{
    AcceptanceInput, Actor, ActorRole, AppointmentService, AppointmentStatus, ArrivalInput,
    CreateAppointmentRequest, HistoryMetadata, NewRule, OperationalStatus, SlotQuery,
};
use bookd_core::config::BookdConfig;
use bookd_core::external::{
    LedgerEntryType, RecordingNotifier, RecordingWallet, RequestSnapshot, StaticDirectory,
};
use bookd_core::store::Store;

struct World {
    service: AppointmentService,
    directory: Arc<StaticDirectory>,
    wallet: Arc<RecordingWallet>,
    _dir: TempDir,
    client: Actor,
    provider: Actor,
    system: Actor,
}

fn world() -> World {
    let dir = TempDir::new().expect("temp dir");
    let store = Store::open(dir.path().join("bookd.db")).expect("open store");

    let client = Actor::new(Uuid::new_v4(), ActorRole::Client);
    let provider = Actor::new(Uuid::new_v4(), ActorRole::Provider);

    let directory = Arc::new(StaticDirectory::new());
    directory.add_provider(provider.user_id);
    let wallet = Arc::new(RecordingWallet::new());

    let service = AppointmentService::new(
        store,
        BookdConfig::default(),
        directory.clone(),
        wallet.clone(),
        Arc::new(RecordingNotifier::new()),
    )
    .expect("service");

    // The provider works every day, 08:00-20:00 UTC, hour slots.
    for weekday in [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
        Weekday::Sat,
        Weekday::Sun,
    ] {
        service
            .add_rule(
                provider,
                &NewRule {
                    weekday,
                    start_minute: 8 * 60,
                    end_minute: 20 * 60,
                    slot_minutes: 60,
                },
            )
            .expect("rule");
    }

    World {
        service,
        directory,
        wallet,
        _dir: dir,
        client,
        provider,
        system: Actor::new(Uuid::new_v4(), ActorRole::System),
    }
}

impl World {
    fn request(&self, value: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.directory.add_request(RequestSnapshot {
            id,
            client_id: self.client.user_id,
            accepted_provider_ids: vec![self.provider.user_id],
            agreed_value: Some(value.parse().expect("decimal literal")),
            city: Some("santos".to_owned()),
            category: Some("electrical".to_owned()),
        });
        id
    }

    fn window(&self, days: i64, hour: u32) -> (chrono::DateTime<Utc>, chrono::DateTime<Utc>) {
        let start = (Utc::now() + Duration::days(days))
            .date_naive()
            .and_hms_opt(hour, 0, 0)
            .expect("valid time")
            .and_utc();
        (start, start + Duration::hours(1))
    }
}

#[test]
fn booking_to_completion_end_to_end() {
    let w = world();
    let request_id = w.request("350");

    // The client picks one of the provider's offered slots.
    let (from, _) = w.window(3, 8);
    let slots = w
        .service
        .available_slots(
            w.client,
            &SlotQuery {
                provider_id: w.provider.user_id,
                from_utc: from,
                to_utc: from + Duration::days(1),
                slot_minutes: Some(60),
            },
        )
        .expect("slots");
    assert!(!slots.is_empty());
    let slot = slots[2];

    let appointment = w
        .service
        .create(
            w.client,
            &CreateAppointmentRequest {
                service_request_id: request_id,
                provider_id: w.provider.user_id,
                window_start_utc: slot.window_start_utc,
                window_end_utc: slot.window_end_utc,
                reason: Some("breaker panel inspection".to_owned()),
            },
        )
        .expect("create");
    assert_eq!(appointment.status, AppointmentStatus::PendingProviderConfirmation);
    assert!(appointment.expires_at_utc.is_some());

    // The booked slot is gone from the next query.
    let remaining = w
        .service
        .available_slots(
            w.client,
            &SlotQuery {
                provider_id: w.provider.user_id,
                from_utc: from,
                to_utc: from + Duration::days(1),
                slot_minutes: Some(60),
            },
        )
        .expect("slots");
    assert!(remaining.iter().all(|s| s.window_start_utc != slot.window_start_utc));

    w.service.confirm(w.provider, appointment.id).expect("confirm");
    w.service
        .respond_presence(w.client, appointment.id, true, Some("home all day"))
        .expect("presence");

    // Execution day: on the way, on site, arrive, work, finish.
    w.service
        .update_operational_status(w.provider, appointment.id, OperationalStatus::OnTheWay, None)
        .expect("on the way");
    w.service
        .update_operational_status(w.provider, appointment.id, OperationalStatus::OnSite, None)
        .expect("on site");
    w.service
        .mark_arrived(
            w.provider,
            appointment.id,
            &ArrivalInput {
                latitude: Some(-23.96),
                longitude: Some(-46.33),
                accuracy_meters: Some(8.0),
                manual_reason: None,
            },
        )
        .expect("arrive");
    w.service
        .start_execution(w.provider, appointment.id, Some("work started"))
        .expect("start");
    w.service
        .update_operational_status(w.provider, appointment.id, OperationalStatus::InService, None)
        .expect("in service");

    let issued = w
        .service
        .generate_completion_pin(w.provider, appointment.id)
        .expect("pin");
    let term = w
        .service
        .confirm_completion(w.client, appointment.id, &AcceptanceInput::Pin(issued.pin))
        .expect("accept");
    assert!(term.accepted_at_utc.is_some());

    let done = w.service.get(w.client, appointment.id).expect("reload");
    assert_eq!(done.status, AppointmentStatus::Completed);

    // Windows always ordered; no financial event on a clean completion.
    assert!(done.window_end_utc > done.window_start_utc);
    assert!(w.wallet.entries().is_empty());
}

#[test]
fn cancellation_economics_and_expiry_batch() {
    let w = world();

    // A same-week appointment cancelled by the provider inside the policy
    // window debits the provider.
    let request_id = w.request("200");
    let (start, end) = w.window(2, 10);
    let appointment = w
        .service
        .create(
            w.client,
            &CreateAppointmentRequest {
                service_request_id: request_id,
                provider_id: w.provider.user_id,
                window_start_utc: start,
                window_end_utc: end,
                reason: None,
            },
        )
        .expect("create");
    w.service.confirm(w.provider, appointment.id).expect("confirm");

    // Pull the window to six hours out so the cancellation prices in the
    // 4-24h band, then cancel as the provider.
    let store = w.service.store().clone();
    let mut near = store.get_appointment(appointment.id).expect("get").expect("row");
    near.window_start_utc = Utc::now() + Duration::hours(6);
    near.window_end_utc = near.window_start_utc + Duration::hours(1);
    store.update_appointment(&near).expect("move window");

    w.service
        .cancel(w.provider, appointment.id, "truck broke down")
        .expect("cancel");

    let entries = w.wallet.entries();
    assert_eq!(entries.len(), 1);
    // Provider cancel 4-24h: 25% penalty on 200, debited in full.
    assert_eq!(entries[0].1, LedgerEntryType::Debit);
    assert_eq!(entries[0].2, Decimal::from(50));

    let trail = w
        .service
        .history(Actor::new(Uuid::new_v4(), ActorRole::Admin), appointment.id)
        .expect("history");
    let receipt = trail
        .iter()
        .find_map(|row| match &row.metadata {
            Some(HistoryMetadata::FinancialPolicyApplied { breakdown, ledger }) => {
                Some((breakdown.clone(), ledger.clone()))
            }
            _ => None,
        })
        .expect("financial receipt");
    assert_eq!(receipt.0.penalty_amount, Decimal::from(50));
    assert_eq!(
        receipt.0.penalty_amount,
        receipt.0.compensation_amount + receipt.0.retention_amount + receipt.0.residual_amount()
    );
    assert!(receipt.1.requested);

    // A pending appointment whose deadline lapses expires in the batch and
    // debits the provider for the silent no-show.
    let request_id = w.request("100");
    let (start, end) = w.window(3, 10);
    let pending = w
        .service
        .create(
            w.client,
            &CreateAppointmentRequest {
                service_request_id: request_id,
                provider_id: w.provider.user_id,
                window_start_utc: start,
                window_end_utc: end,
                reason: None,
            },
        )
        .expect("create");

    let mut overdue = store.get_appointment(pending.id).expect("get").expect("row");
    overdue.expires_at_utc = Some(Utc::now() - Duration::minutes(1));
    store.update_appointment(&overdue).expect("backdate");

    let processed = w
        .service
        .expire_pending(w.system, Utc::now(), 100)
        .expect("expire");
    assert_eq!(processed, 1);
    assert_eq!(
        store.get_appointment(pending.id).expect("get").expect("row").status,
        AppointmentStatus::ExpiredWithoutProviderAction
    );
    // 40% of 100.
    let entries = w.wallet.entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].2, Decimal::from(40));
}
