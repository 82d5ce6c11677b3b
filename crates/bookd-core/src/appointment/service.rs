//! The appointment service: every externally reachable operation.
//!
//! One service instance owns the store, the configuration, and the three
//! collaborator ports. Each operation checks the role-permission table
//! first, then ownership, then state, then runs its transition; every
//! successful transition appends exactly one history row and, where
//! material, refreshes the no-show risk assessment and the triage queue.
//!
//! Financial consequences are computed inside the cancellation/expiry
//! transitions but isolated: an engine failure is recorded in the history
//! metadata and never aborts the booking-state change.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::entity::{Appointment, AppointmentHistory, HistoryMetadata, LedgerOutcome, RiskSnapshot};
use super::permissions::Operation;
use super::state::{Actor, ActorRole, AppointmentStatus, OperationalStatus};
use crate::availability::{
    self, AvailabilityException, AvailabilityRule, ExceptionKind, Slot,
};
use crate::completion::{self, CompletionTerm};
use crate::config::BookdConfig;
use crate::error::BookingError;
use crate::external::{CreditWallet, LedgerEntryType, Notifier, RequestDirectory};
use crate::financial::{self, PolicyEventType};
use crate::risk::{self, NoShowQueueItem, QueueFilter, QueuePage, QueueStatus, RiskInputs};
use crate::store::{CreateOutcome, RescheduleOutcome, Store};

/// Input for [`AppointmentService::create`].
#[derive(Debug, Clone)]
pub struct CreateAppointmentRequest {
    /// The service request being scheduled.
    pub service_request_id: Uuid,
    /// The provider with an accepted proposal.
    pub provider_id: Uuid,
    /// Window start (inclusive).
    pub window_start_utc: DateTime<Utc>,
    /// Window end (exclusive).
    pub window_end_utc: DateTime<Utc>,
    /// Optional note from the client.
    pub reason: Option<String>,
}

/// Input for [`AppointmentService::available_slots`].
#[derive(Debug, Clone)]
pub struct SlotQuery {
    /// The provider whose calendar is queried.
    pub provider_id: Uuid,
    /// Range start.
    pub from_utc: DateTime<Utc>,
    /// Range end.
    pub to_utc: DateTime<Utc>,
    /// Requested slot granularity; defaults to each rule's own.
    pub slot_minutes: Option<u32>,
}

/// Input for [`AppointmentService::mark_arrived`]: a full geolocation
/// reading, or a manual justification when GPS is unavailable.
#[derive(Debug, Clone, Default)]
pub struct ArrivalInput {
    /// Latitude, when geolocated.
    pub latitude: Option<f64>,
    /// Longitude, when geolocated.
    pub longitude: Option<f64>,
    /// GPS accuracy in meters, when geolocated.
    pub accuracy_meters: Option<f64>,
    /// Fallback justification without GPS.
    pub manual_reason: Option<String>,
}

impl ArrivalInput {
    fn has_full_geolocation(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some() && self.accuracy_meters.is_some()
    }

    fn manual_reason_trimmed(&self) -> Option<&str> {
        self.manual_reason.as_deref().map(str::trim).filter(|r| !r.is_empty())
    }
}

/// How the client accepts a completion term.
#[derive(Debug, Clone)]
pub enum AcceptanceInput {
    /// One-time PIN typed by the client.
    Pin(String),
    /// Client signs with their name.
    Signature(String),
}

impl AcceptanceInput {
    /// Parse the transport form (`method` string plus optional fields).
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidAcceptanceMethod`] for unknown
    /// methods.
    pub fn parse(
        method: &str,
        pin: Option<&str>,
        signature_name: Option<&str>,
    ) -> Result<Self, BookingError> {
        match method.trim().to_ascii_lowercase().as_str() {
            "pin" => Ok(Self::Pin(pin.unwrap_or_default().to_owned())),
            "signature" => Ok(Self::Signature(signature_name.unwrap_or_default().to_owned())),
            other => Err(BookingError::InvalidAcceptanceMethod { method: other.to_owned() }),
        }
    }
}

/// A freshly issued completion PIN. The clear PIN appears here exactly
/// once; only its hash is stored.
#[derive(Debug, Clone)]
pub struct IssuedPin {
    /// The pending term.
    pub term: CompletionTerm,
    /// The one-time PIN to hand to the client.
    pub pin: String,
}

/// Input for availability rule creation.
#[derive(Debug, Clone)]
pub struct NewRule {
    /// Weekday the rule recurs on.
    pub weekday: chrono::Weekday,
    /// Window start, minutes from UTC midnight.
    pub start_minute: u32,
    /// Window end, minutes from UTC midnight (exclusive).
    pub end_minute: u32,
    /// Default slot granularity.
    pub slot_minutes: u32,
}

/// Input for availability exception creation.
#[derive(Debug, Clone)]
pub struct NewException {
    /// Block or open.
    pub kind: ExceptionKind,
    /// Interval start.
    pub starts_at_utc: DateTime<Utc>,
    /// Interval end.
    pub ends_at_utc: DateTime<Utc>,
    /// Optional annotation.
    pub reason: Option<String>,
}

/// The appointment coordination service.
pub struct AppointmentService {
    store: Store,
    config: BookdConfig,
    directory: Arc<dyn RequestDirectory>,
    wallet: Arc<dyn CreditWallet>,
    notifier: Arc<dyn Notifier>,
}

impl AppointmentService {
    /// Build a service over a store and collaborators, seeding the
    /// financial policy rule table when empty.
    ///
    /// # Errors
    ///
    /// Returns a [`BookingError::Storage`] when seeding fails.
    pub fn new(
        store: Store,
        config: BookdConfig,
        directory: Arc<dyn RequestDirectory>,
        wallet: Arc<dyn CreditWallet>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, BookingError> {
        let seed: Vec<_> = config
            .financial
            .rules
            .iter()
            .cloned()
            .map(crate::config::PolicyRuleSeed::into_rule)
            .collect();
        store.seed_policy_rules(&seed)?;
        Ok(Self { store, config, directory, wallet, notifier })
    }

    /// The underlying store (read-only escape hatch for adapters).
    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    // ── Availability ───────────────────────────────────────────────────

    /// Bookable slots for a provider over a range.
    ///
    /// # Errors
    ///
    /// `forbidden`, `invalid_range`, `range_too_large`,
    /// `invalid_slot_duration`, `provider_not_found`, or `storage`.
    pub fn available_slots(&self, actor: Actor, query: &SlotQuery) -> Result<Vec<Slot>, BookingError> {
        Operation::AvailableSlots.ensure_allowed(actor.role)?;
        if actor.role == ActorRole::Provider && actor.user_id != query.provider_id {
            return Err(BookingError::Forbidden {
                detail: "providers may only query their own calendar",
            });
        }

        if query.to_utc <= query.from_utc {
            return Err(BookingError::InvalidRange);
        }
        let limits = self.config.scheduling.slot_limits();
        let range_days = (query.to_utc - query.from_utc).num_days();
        if range_days > i64::from(limits.max_query_range_days) {
            return Err(BookingError::RangeTooLarge { max_days: limits.max_query_range_days });
        }
        if let Some(slot_minutes) = query.slot_minutes {
            if slot_minutes < limits.min_slot_minutes || slot_minutes > limits.max_slot_minutes {
                return Err(BookingError::InvalidSlotDuration {
                    min_minutes: limits.min_slot_minutes,
                    max_minutes: limits.max_slot_minutes,
                });
            }
        }
        if !self.directory.provider_exists(query.provider_id) {
            return Err(BookingError::ProviderNotFound { provider_id: query.provider_id });
        }

        let rules = self.store.rules_for(query.provider_id)?;
        let exceptions =
            self.store.exceptions_overlapping(query.provider_id, query.from_utc, query.to_utc)?;
        let busy =
            self.store.blocking_windows(query.provider_id, query.from_utc, query.to_utc, None)?;

        Ok(availability::build_slots(
            &rules,
            &exceptions,
            &busy,
            query.from_utc,
            query.to_utc,
            query.slot_minutes,
            &limits,
        ))
    }

    /// Add a recurring availability rule for the acting provider.
    ///
    /// # Errors
    ///
    /// `forbidden`, `invalid_window`, `invalid_slot_duration`, or
    /// `storage`.
    pub fn add_rule(&self, actor: Actor, input: &NewRule) -> Result<AvailabilityRule, BookingError> {
        Operation::ManageAvailability.ensure_allowed(actor.role)?;
        if input.end_minute <= input.start_minute || input.end_minute > 24 * 60 {
            return Err(BookingError::InvalidWindow { detail: "rule window is inverted or past midnight" });
        }
        let limits = self.config.scheduling.slot_limits();
        if input.slot_minutes < limits.min_slot_minutes
            || input.slot_minutes > limits.max_slot_minutes
        {
            return Err(BookingError::InvalidSlotDuration {
                min_minutes: limits.min_slot_minutes,
                max_minutes: limits.max_slot_minutes,
            });
        }

        let rule = AvailabilityRule {
            id: Uuid::new_v4(),
            provider_id: actor.user_id,
            weekday: input.weekday,
            start_minute: input.start_minute,
            end_minute: input.end_minute,
            slot_minutes: input.slot_minutes,
            active: true,
        };
        self.store.insert_rule(&rule)?;
        Ok(rule)
    }

    /// Remove one of the acting provider's rules.
    ///
    /// # Errors
    ///
    /// `forbidden`, `rule_not_found`, or `storage`.
    pub fn remove_rule(&self, actor: Actor, rule_id: Uuid) -> Result<(), BookingError> {
        Operation::ManageAvailability.ensure_allowed(actor.role)?;
        let rule = self
            .store
            .get_rule(rule_id)?
            .ok_or(BookingError::RuleNotFound { rule_id })?;
        if rule.provider_id != actor.user_id {
            return Err(BookingError::Forbidden { detail: "rule belongs to another provider" });
        }
        self.store.delete_rule(rule_id)?;
        Ok(())
    }

    /// Add an availability exception for the acting provider.
    ///
    /// # Errors
    ///
    /// `forbidden`, `invalid_window`, or `storage`.
    pub fn add_exception(
        &self,
        actor: Actor,
        input: &NewException,
    ) -> Result<AvailabilityException, BookingError> {
        Operation::ManageAvailability.ensure_allowed(actor.role)?;
        if input.ends_at_utc <= input.starts_at_utc {
            return Err(BookingError::InvalidWindow { detail: "exception interval is inverted" });
        }

        let exception = AvailabilityException {
            id: Uuid::new_v4(),
            provider_id: actor.user_id,
            kind: input.kind,
            starts_at_utc: input.starts_at_utc,
            ends_at_utc: input.ends_at_utc,
            reason: input.reason.clone(),
        };
        self.store.insert_exception(&exception)?;
        Ok(exception)
    }

    /// A provider's rules plus the exceptions overlapping `[from, to)`:
    /// the calendar as the provider manages it, before bookings subtract
    /// from it.
    ///
    /// # Errors
    ///
    /// `forbidden`, `provider_not_found`, or `storage`.
    pub fn availability_overview(
        &self,
        actor: Actor,
        provider_id: Uuid,
        from_utc: DateTime<Utc>,
        to_utc: DateTime<Utc>,
    ) -> Result<(Vec<AvailabilityRule>, Vec<AvailabilityException>), BookingError> {
        Operation::AvailableSlots.ensure_allowed(actor.role)?;
        if actor.role == ActorRole::Provider && actor.user_id != provider_id {
            return Err(BookingError::Forbidden {
                detail: "providers may only query their own calendar",
            });
        }
        if !self.directory.provider_exists(provider_id) {
            return Err(BookingError::ProviderNotFound { provider_id });
        }
        let rules = self.store.rules_for(provider_id)?;
        let exceptions = self.store.exceptions_overlapping(provider_id, from_utc, to_utc)?;
        Ok((rules, exceptions))
    }

    /// Remove one of the acting provider's exceptions.
    ///
    /// # Errors
    ///
    /// `forbidden`, `exception_not_found`, or `storage`.
    pub fn remove_exception(&self, actor: Actor, exception_id: Uuid) -> Result<(), BookingError> {
        Operation::ManageAvailability.ensure_allowed(actor.role)?;
        let exception = self
            .store
            .get_exception(exception_id)?
            .ok_or(BookingError::ExceptionNotFound { exception_id })?;
        if exception.provider_id != actor.user_id {
            return Err(BookingError::Forbidden { detail: "exception belongs to another provider" });
        }
        self.store.delete_exception(exception_id)?;
        Ok(())
    }

    // ── Booking lifecycle ──────────────────────────────────────────────

    /// Create an appointment for a service request.
    ///
    /// # Errors
    ///
    /// `forbidden`, `invalid_window`, `request_not_found`,
    /// `provider_not_found`, `provider_not_assigned`,
    /// `appointment_already_exists`, `slot_unavailable`, or `storage`.
    pub fn create(
        &self,
        actor: Actor,
        request: &CreateAppointmentRequest,
    ) -> Result<Appointment, BookingError> {
        Operation::Create.ensure_allowed(actor.role)?;
        let now = Utc::now();
        self.validate_window(request.window_start_utc, request.window_end_utc, now)?;

        let snapshot = self
            .directory
            .find_request(request.service_request_id)
            .ok_or(BookingError::RequestNotFound { request_id: request.service_request_id })?;
        if snapshot.client_id != actor.user_id {
            return Err(BookingError::Forbidden { detail: "request belongs to another client" });
        }
        if !self.directory.provider_exists(request.provider_id) {
            return Err(BookingError::ProviderNotFound { provider_id: request.provider_id });
        }
        if !snapshot.provider_accepted(request.provider_id) {
            return Err(BookingError::ProviderNotAssigned {
                request_id: request.service_request_id,
                provider_id: request.provider_id,
            });
        }

        let mut appointment = Appointment {
            id: Uuid::new_v4(),
            service_request_id: request.service_request_id,
            client_id: snapshot.client_id,
            provider_id: request.provider_id,
            window_start_utc: request.window_start_utc,
            window_end_utc: request.window_end_utc,
            status: AppointmentStatus::PendingProviderConfirmation,
            expires_at_utc: Some(
                now + Duration::hours(i64::from(self.config.scheduling.confirmation_sla_hours)),
            ),
            reason: request.reason.as_deref().map(str::trim).filter(|r| !r.is_empty()).map(str::to_owned),
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
        };

        let history = self.history_row(
            &appointment,
            None,
            actor,
            Some("appointment created".to_owned()),
            None,
            now,
        );

        match self.store.create_appointment_if_free(&appointment, &history)? {
            CreateOutcome::Created => {}
            CreateOutcome::RequestAlreadyBooked => {
                return Err(BookingError::AppointmentAlreadyExists {
                    request_id: request.service_request_id,
                })
            }
            CreateOutcome::SlotUnavailable => return Err(BookingError::SlotUnavailable),
        }

        info!(
            appointment_id = %appointment.id,
            provider_id = %appointment.provider_id,
            "appointment created"
        );
        self.refresh_risk(&mut appointment, now)?;
        self.store.update_appointment(&appointment)?;

        self.notifier.notify(
            appointment.provider_id,
            "New appointment awaiting confirmation",
            "A client booked a visit window; confirm or reject it.",
            &appointment_url(&appointment),
        );
        Ok(appointment)
    }

    /// Provider confirms a pending appointment.
    ///
    /// # Errors
    ///
    /// `forbidden`, `appointment_not_found`, `invalid_state`, or
    /// `storage`.
    pub fn confirm(&self, actor: Actor, appointment_id: Uuid) -> Result<Appointment, BookingError> {
        Operation::Confirm.ensure_allowed(actor.role)?;
        let mut appointment = self.load_owned(appointment_id, actor)?;
        self.require_status(
            &appointment,
            &[AppointmentStatus::PendingProviderConfirmation],
            "confirm",
        )?;

        let now = Utc::now();
        let previous = appointment.status;
        appointment.status = AppointmentStatus::Confirmed;
        appointment.confirmed_at_utc = Some(now);
        appointment.expires_at_utc = None;
        appointment.updated_at = Some(now);

        self.refresh_risk(&mut appointment, now)?;
        let history = self.history_row(&appointment, Some(previous), actor, None, None, now);
        self.store.update_appointment_with_history(&appointment, &history)?;

        self.notifier.notify(
            appointment.client_id,
            "Appointment confirmed",
            "The provider confirmed your visit window.",
            &appointment_url(&appointment),
        );
        Ok(appointment)
    }

    /// Provider rejects a pending appointment; terminal.
    ///
    /// # Errors
    ///
    /// `forbidden`, `appointment_not_found`, `invalid_state`,
    /// `invalid_reason`, or `storage`.
    pub fn reject(
        &self,
        actor: Actor,
        appointment_id: Uuid,
        reason: &str,
    ) -> Result<Appointment, BookingError> {
        Operation::Reject.ensure_allowed(actor.role)?;
        let reason = non_empty(reason)?;
        let mut appointment = self.load_owned(appointment_id, actor)?;
        self.require_status(
            &appointment,
            &[AppointmentStatus::PendingProviderConfirmation],
            "reject",
        )?;

        let now = Utc::now();
        let previous = appointment.status;
        appointment.status = AppointmentStatus::RejectedByProvider;
        appointment.rejected_at_utc = Some(now);
        appointment.reason = Some(reason.to_owned());
        appointment.updated_at = Some(now);

        let history =
            self.history_row(&appointment, Some(previous), actor, Some(reason.to_owned()), None, now);
        self.store.update_appointment_with_history(&appointment, &history)?;
        self.store.resolve_queue_for_appointment(
            appointment.id,
            "appointment rejected by provider",
            now,
        )?;

        self.notifier.notify(
            appointment.client_id,
            "Appointment rejected",
            "The provider rejected the proposed visit window.",
            &appointment_url(&appointment),
        );
        Ok(appointment)
    }

    /// Either party cancels a non-terminal appointment. Inside the policy
    /// window this triggers the financial engine; the booking transition
    /// commits regardless of the engine's outcome.
    ///
    /// # Errors
    ///
    /// `forbidden`, `appointment_not_found`, `invalid_state`,
    /// `invalid_reason`, or `storage`.
    pub fn cancel(
        &self,
        actor: Actor,
        appointment_id: Uuid,
        reason: &str,
    ) -> Result<Appointment, BookingError> {
        Operation::Cancel.ensure_allowed(actor.role)?;
        let reason = non_empty(reason)?;
        let mut appointment = self.load_owned(appointment_id, actor)?;
        if !appointment.status.is_cancellable() {
            return Err(self.invalid_state(&appointment, "cancel"));
        }

        let now = Utc::now();
        let previous = appointment.status;
        appointment.status = match actor.role {
            ActorRole::Provider => AppointmentStatus::CancelledByProvider,
            _ => AppointmentStatus::CancelledByClient,
        };
        appointment.cancelled_at_utc = Some(now);
        appointment.reason = Some(reason.to_owned());
        appointment.updated_at = Some(now);

        // Money side: only when the cancellation lands inside the policy
        // window; the breakdown (or the failure) rides the transition's
        // history row.
        let metadata = if self.inside_policy_window(&appointment, now) {
            let event = match actor.role {
                ActorRole::Provider => PolicyEventType::ProviderCancellation,
                _ => PolicyEventType::ClientCancellation,
            };
            Some(self.apply_financial_event(&appointment, event, now))
        } else {
            None
        };

        let history =
            AppointmentHistory {
                id: Uuid::new_v4(),
                appointment_id: appointment.id,
                previous_status: Some(previous),
                new_status: appointment.status,
                actor_user_id: Some(actor.user_id),
                actor_role: actor.role,
                reason: Some(reason.to_owned()),
                previous_operational_status: None,
                new_operational_status: None,
                metadata,
                occurred_at_utc: now,
            };
        self.store.update_appointment_with_history(&appointment, &history)?;
        self.store.resolve_queue_for_appointment(appointment.id, "appointment cancelled", now)?;

        let counterparty = if actor.user_id == appointment.client_id {
            appointment.provider_id
        } else {
            appointment.client_id
        };
        self.notifier.notify(
            counterparty,
            "Appointment cancelled",
            "The other party cancelled the scheduled visit.",
            &appointment_url(&appointment),
        );
        Ok(appointment)
    }

    /// Expire pending appointments past their confirmation deadline.
    /// Idempotent: already-terminal rows are skipped, and re-running with
    /// the same `now_utc` finds nothing new. Each expiry raises a
    /// provider-no-show financial event.
    ///
    /// # Errors
    ///
    /// `forbidden` or `storage`.
    pub fn expire_pending(
        &self,
        actor: Actor,
        now_utc: DateTime<Utc>,
        batch_size: u32,
    ) -> Result<u32, BookingError> {
        Operation::RunBatch.ensure_allowed(actor.role)?;

        let page = self.store.expired_pending(now_utc, batch_size)?;
        let mut processed = 0u32;
        for mut appointment in page {
            // Already-terminal rows are skipped, not re-transitioned.
            if appointment.status != AppointmentStatus::PendingProviderConfirmation {
                continue;
            }
            let previous = appointment.status;
            appointment.status = AppointmentStatus::ExpiredWithoutProviderAction;
            appointment.updated_at = Some(now_utc);

            let metadata =
                self.apply_financial_event(&appointment, PolicyEventType::ProviderNoShow, now_utc);
            let history = AppointmentHistory {
                id: Uuid::new_v4(),
                appointment_id: appointment.id,
                previous_status: Some(previous),
                new_status: appointment.status,
                actor_user_id: None,
                actor_role: ActorRole::System,
                reason: Some("confirmation deadline passed".to_owned()),
                previous_operational_status: None,
                new_operational_status: None,
                metadata: Some(metadata),
                occurred_at_utc: now_utc,
            };
            self.store.update_appointment_with_history(&appointment, &history)?;
            self.store.resolve_queue_for_appointment(
                appointment.id,
                "appointment expired without provider action",
                now_utc,
            )?;
            processed += 1;
        }

        if processed > 0 {
            info!(processed, "expired pending appointments");
        }
        Ok(processed)
    }

    // ── Reschedule negotiation ─────────────────────────────────────────

    /// Open a reschedule negotiation with a proposed window.
    ///
    /// # Errors
    ///
    /// `forbidden`, `appointment_not_found`, `invalid_state`,
    /// `invalid_window`, `invalid_reason`, `slot_unavailable`, or
    /// `storage`.
    pub fn request_reschedule(
        &self,
        actor: Actor,
        appointment_id: Uuid,
        proposed_start_utc: DateTime<Utc>,
        proposed_end_utc: DateTime<Utc>,
        reason: &str,
    ) -> Result<Appointment, BookingError> {
        Operation::RequestReschedule.ensure_allowed(actor.role)?;
        let reason = non_empty(reason)?;
        let mut appointment = self.load_owned(appointment_id, actor)?;
        self.require_status(
            &appointment,
            &[AppointmentStatus::Confirmed, AppointmentStatus::RescheduleConfirmed],
            "request_reschedule",
        )?;

        let now = Utc::now();
        self.validate_window(proposed_start_utc, proposed_end_utc, now)?;
        if !self.window_free(&appointment, proposed_start_utc, proposed_end_utc)? {
            return Err(BookingError::SlotUnavailable);
        }

        let previous = appointment.status;
        appointment.status = match actor.role {
            ActorRole::Provider => AppointmentStatus::RescheduleRequestedByProvider,
            _ => AppointmentStatus::RescheduleRequestedByClient,
        };
        appointment.proposed_window_start_utc = Some(proposed_start_utc);
        appointment.proposed_window_end_utc = Some(proposed_end_utc);
        appointment.reschedule_requested_at_utc = Some(now);
        appointment.reschedule_requested_by_role = Some(actor.role);
        appointment.reschedule_request_reason = Some(reason.to_owned());
        appointment.updated_at = Some(now);

        let history =
            self.history_row(&appointment, Some(previous), actor, Some(reason.to_owned()), None, now);
        self.store.update_appointment_with_history(&appointment, &history)?;

        let counterparty = if actor.role == ActorRole::Provider {
            appointment.client_id
        } else {
            appointment.provider_id
        };
        self.notifier.notify(
            counterparty,
            "Reschedule requested",
            "The other party proposed a new visit window.",
            &appointment_url(&appointment),
        );
        Ok(appointment)
    }

    /// Counterparty answers an open reschedule negotiation.
    ///
    /// Accepting re-validates the proposed window at commit time; a
    /// conflicting booking that landed meanwhile fails the accept with
    /// `slot_unavailable` rather than silently double-booking. Rejecting
    /// restores the pre-negotiation status and window.
    ///
    /// # Errors
    ///
    /// `forbidden`, `appointment_not_found`, `invalid_state`,
    /// `slot_unavailable`, or `storage`.
    pub fn respond_reschedule(
        &self,
        actor: Actor,
        appointment_id: Uuid,
        accept: bool,
        reason: Option<&str>,
    ) -> Result<Appointment, BookingError> {
        Operation::RespondReschedule.ensure_allowed(actor.role)?;
        let mut appointment = self.load_owned(appointment_id, actor)?;
        self.require_status(
            &appointment,
            &[
                AppointmentStatus::RescheduleRequestedByClient,
                AppointmentStatus::RescheduleRequestedByProvider,
            ],
            "respond_reschedule",
        )?;

        // Only the counterparty of the requesting role may answer.
        let requested_by = appointment
            .reschedule_requested_by_role
            .unwrap_or(ActorRole::Client);
        if requested_by.counterparty() != Some(actor.role) {
            return Err(BookingError::Forbidden {
                detail: "only the counterparty may answer a reschedule request",
            });
        }

        let now = Utc::now();
        let previous = appointment.status;
        let (proposed_start, proposed_end) = match (
            appointment.proposed_window_start_utc,
            appointment.proposed_window_end_utc,
        ) {
            (Some(start), Some(end)) => (start, end),
            _ => return Err(self.invalid_state(&appointment, "respond_reschedule")),
        };

        if accept {
            appointment.status = AppointmentStatus::RescheduleConfirmed;
            appointment.window_start_utc = proposed_start;
            appointment.window_end_utc = proposed_end;
            clear_negotiation(&mut appointment);
            appointment.updated_at = Some(now);

            let history = self.history_row(
                &appointment,
                Some(previous),
                actor,
                reason.map(str::to_owned),
                None,
                now,
            );
            match self.store.commit_reschedule_if_free(&appointment, &history)? {
                RescheduleOutcome::Committed => {}
                RescheduleOutcome::SlotUnavailable => return Err(BookingError::SlotUnavailable),
            }
            // The window moved; the proximity signals moved with it.
            self.refresh_risk(&mut appointment, now)?;
            self.store.update_appointment(&appointment)?;
        } else {
            // Back to wherever the negotiation started from; the history
            // trail remembers what that was. Risk rows re-state the current
            // status on both sides, so only genuine transitions count.
            let restored = self
                .store
                .history_for(appointment.id)?
                .iter()
                .rev()
                .find(|h| {
                    h.new_status == previous && h.previous_status.map_or(true, |p| p != previous)
                })
                .and_then(|h| h.previous_status)
                .unwrap_or(AppointmentStatus::Confirmed);
            appointment.status = restored;
            clear_negotiation(&mut appointment);
            appointment.updated_at = Some(now);

            let history = self.history_row(
                &appointment,
                Some(previous),
                actor,
                reason.map(str::to_owned),
                None,
                now,
            );
            self.store.update_appointment_with_history(&appointment, &history)?;
        }

        let requester = if actor.user_id == appointment.client_id {
            appointment.provider_id
        } else {
            appointment.client_id
        };
        self.notifier.notify(
            requester,
            if accept { "Reschedule accepted" } else { "Reschedule rejected" },
            if accept {
                "The proposed window was accepted; the appointment moved."
            } else {
                "The proposed window was rejected; the original window stands."
            },
            &appointment_url(&appointment),
        );
        Ok(appointment)
    }

    // ── Presence & execution ───────────────────────────────────────────

    /// Provider registers on-site arrival, by geolocation or with a manual
    /// justification.
    ///
    /// # Errors
    ///
    /// `forbidden`, `appointment_not_found`, `invalid_state`,
    /// `invalid_reason`, or `storage`.
    pub fn mark_arrived(
        &self,
        actor: Actor,
        appointment_id: Uuid,
        arrival: &ArrivalInput,
    ) -> Result<Appointment, BookingError> {
        Operation::MarkArrived.ensure_allowed(actor.role)?;
        let mut appointment = self.load_owned(appointment_id, actor)?;
        self.require_status(
            &appointment,
            &[AppointmentStatus::Confirmed, AppointmentStatus::RescheduleConfirmed],
            "mark_arrived",
        )?;

        let manual_reason = arrival.manual_reason_trimmed();
        if !arrival.has_full_geolocation() && manual_reason.is_none() {
            return Err(BookingError::InvalidReason);
        }

        let now = Utc::now();
        let previous = appointment.status;
        appointment.status = AppointmentStatus::Arrived;
        appointment.arrived_at_utc = Some(now);
        if arrival.has_full_geolocation() {
            appointment.arrived_latitude = arrival.latitude;
            appointment.arrived_longitude = arrival.longitude;
            appointment.arrived_accuracy_meters = arrival.accuracy_meters;
        } else {
            appointment.arrived_manual_reason = manual_reason.map(str::to_owned);
        }
        // Arrival is the strongest presence confirmation the provider can
        // give.
        appointment.provider_presence_confirmed = Some(true);
        appointment.provider_presence_responded_at_utc = Some(now);
        appointment.updated_at = Some(now);

        self.refresh_risk(&mut appointment, now)?;
        let history = self.history_row(&appointment, Some(previous), actor, None, None, now);
        self.store.update_appointment_with_history(&appointment, &history)?;

        self.notifier.notify(
            appointment.client_id,
            "Provider arrived",
            "The provider registered arrival at the service site.",
            &appointment_url(&appointment),
        );
        Ok(appointment)
    }

    /// Provider starts execution after arrival.
    ///
    /// # Errors
    ///
    /// `forbidden`, `appointment_not_found`, `invalid_state`, or
    /// `storage`.
    pub fn start_execution(
        &self,
        actor: Actor,
        appointment_id: Uuid,
        reason: Option<&str>,
    ) -> Result<Appointment, BookingError> {
        Operation::StartExecution.ensure_allowed(actor.role)?;
        let mut appointment = self.load_owned(appointment_id, actor)?;
        self.require_status(&appointment, &[AppointmentStatus::Arrived], "start_execution")?;

        let now = Utc::now();
        let previous = appointment.status;
        appointment.status = AppointmentStatus::InProgress;
        appointment.started_at_utc = Some(now);
        appointment.updated_at = Some(now);

        let history = self.history_row(
            &appointment,
            Some(previous),
            actor,
            reason.map(str::to_owned),
            None,
            now,
        );
        self.store.update_appointment_with_history(&appointment, &history)?;
        Ok(appointment)
    }

    /// A party answers the presence check ahead of the visit.
    ///
    /// # Errors
    ///
    /// `forbidden`, `appointment_not_found`, `invalid_state`, or
    /// `storage`.
    pub fn respond_presence(
        &self,
        actor: Actor,
        appointment_id: Uuid,
        confirmed: bool,
        reason: Option<&str>,
    ) -> Result<Appointment, BookingError> {
        Operation::RespondPresence.ensure_allowed(actor.role)?;
        let mut appointment = self.load_owned(appointment_id, actor)?;
        if !appointment.status.is_pre_visit() {
            return Err(self.invalid_state(&appointment, "respond_presence"));
        }

        let now = Utc::now();
        let reason = reason.map(str::trim).filter(|r| !r.is_empty()).map(str::to_owned);
        match actor.role {
            ActorRole::Client => {
                appointment.client_presence_confirmed = Some(confirmed);
                appointment.client_presence_responded_at_utc = Some(now);
                appointment.client_presence_reason = reason.clone();
            }
            _ => {
                appointment.provider_presence_confirmed = Some(confirmed);
                appointment.provider_presence_responded_at_utc = Some(now);
                appointment.provider_presence_reason = reason.clone();
            }
        }
        appointment.updated_at = Some(now);

        self.refresh_risk(&mut appointment, now)?;
        let history = AppointmentHistory {
            id: Uuid::new_v4(),
            appointment_id: appointment.id,
            previous_status: Some(appointment.status),
            new_status: appointment.status,
            actor_user_id: Some(actor.user_id),
            actor_role: actor.role,
            reason: reason.clone(),
            previous_operational_status: None,
            new_operational_status: None,
            metadata: Some(HistoryMetadata::PresenceResponse {
                participant: actor.role,
                confirmed,
                reason,
            }),
            occurred_at_utc: now,
        };
        self.store.update_appointment_with_history(&appointment, &history)?;

        let counterparty = if actor.user_id == appointment.client_id {
            appointment.provider_id
        } else {
            appointment.client_id
        };
        self.notifier.notify(
            counterparty,
            "Presence response",
            if confirmed {
                "The other party confirmed presence for the visit."
            } else {
                "The other party flagged a presence problem for the visit."
            },
            &appointment_url(&appointment),
        );
        Ok(appointment)
    }

    /// Provider advances the in-visit operational status. Never touches the
    /// booking state machine.
    ///
    /// # Errors
    ///
    /// `forbidden`, `appointment_not_found`, `invalid_state`,
    /// `invalid_operational_transition`, `invalid_reason`, or `storage`.
    pub fn update_operational_status(
        &self,
        actor: Actor,
        appointment_id: Uuid,
        next: OperationalStatus,
        reason: Option<&str>,
    ) -> Result<Appointment, BookingError> {
        Operation::UpdateOperationalStatus.ensure_allowed(actor.role)?;
        let mut appointment = self.load_owned(appointment_id, actor)?;
        self.require_status(
            &appointment,
            &[
                AppointmentStatus::Confirmed,
                AppointmentStatus::RescheduleConfirmed,
                AppointmentStatus::Arrived,
                AppointmentStatus::InProgress,
            ],
            "update_operational_status",
        )?;

        let current = appointment.operational_status;
        if !OperationalStatus::step_allowed(current, next) {
            return Err(BookingError::InvalidOperationalTransition { from: current, to: next });
        }
        let reason = reason.map(str::trim).filter(|r| !r.is_empty()).map(str::to_owned);
        if next.requires_reason() && reason.is_none() {
            return Err(BookingError::InvalidReason);
        }

        let now = Utc::now();
        appointment.operational_status = Some(next);
        appointment.operational_status_updated_at_utc = Some(now);
        appointment.operational_status_reason = reason.clone();
        appointment.updated_at = Some(now);

        let history = AppointmentHistory {
            id: Uuid::new_v4(),
            appointment_id: appointment.id,
            previous_status: Some(appointment.status),
            new_status: appointment.status,
            actor_user_id: Some(actor.user_id),
            actor_role: actor.role,
            reason,
            previous_operational_status: current,
            new_operational_status: Some(next),
            metadata: None,
            occurred_at_utc: now,
        };
        self.store.update_appointment_with_history(&appointment, &history)?;
        Ok(appointment)
    }

    // ── Completion confirmation ────────────────────────────────────────

    /// Provider issues (or re-issues) the completion PIN on an in-progress
    /// visit.
    ///
    /// # Errors
    ///
    /// `forbidden`, `appointment_not_found`, `invalid_state`, or
    /// `storage`.
    pub fn generate_completion_pin(
        &self,
        actor: Actor,
        appointment_id: Uuid,
    ) -> Result<IssuedPin, BookingError> {
        Operation::GenerateCompletionPin.ensure_allowed(actor.role)?;
        let appointment = self.load_owned(appointment_id, actor)?;
        self.require_status(&appointment, &[AppointmentStatus::InProgress], "generate_completion_pin")?;

        let now = Utc::now();
        let pin = completion::generate_pin(&mut rand::thread_rng());
        let ttl = self.config.completion.pin_ttl_minutes;

        let term = match self.store.term_for_appointment(appointment.id)? {
            None => {
                let term = CompletionTerm::new_pending(
                    appointment.service_request_id,
                    appointment.id,
                    appointment.provider_id,
                    appointment.client_id,
                    "Completion of the scheduled service visit".to_owned(),
                    &pin,
                    ttl,
                    now,
                );
                self.store.insert_term(&term)?;
                term
            }
            Some(mut existing) if existing.status == completion::TermStatus::PendingClientAcceptance => {
                existing.reissue_pin(&pin, ttl, now);
                self.store.update_term(&existing)?;
                existing
            }
            Some(existing) => {
                return Err(BookingError::InvalidState {
                    state: existing.status.as_str().to_owned(),
                    operation: "generate_completion_pin",
                })
            }
        };

        self.notifier.notify(
            appointment.client_id,
            "Completion acceptance requested",
            "The provider finished the work and asked for your acceptance.",
            &appointment_url(&appointment),
        );
        Ok(IssuedPin { term, pin })
    }

    /// Client accepts completion by PIN or signature; on success the
    /// appointment completes.
    ///
    /// # Errors
    ///
    /// `forbidden`, `appointment_not_found`, `completion_term_not_found`,
    /// `invalid_state`, PIN errors, `signature_required`, or `storage`.
    pub fn confirm_completion(
        &self,
        actor: Actor,
        appointment_id: Uuid,
        input: &AcceptanceInput,
    ) -> Result<CompletionTerm, BookingError> {
        Operation::ConfirmCompletion.ensure_allowed(actor.role)?;
        let mut appointment = self.load_owned(appointment_id, actor)?;
        let mut term = self
            .store
            .term_for_appointment(appointment_id)?
            .ok_or(BookingError::CompletionTermNotFound { appointment_id })?;

        let now = Utc::now();
        let outcome = match input {
            AcceptanceInput::Pin(pin) => {
                term.validate_pin(pin, self.config.completion.max_pin_attempts, now)
            }
            AcceptanceInput::Signature(name) => term.accept_with_signature(name, now),
        };
        // Failed attempts mutate the counter; persist the term either way.
        self.store.update_term(&term)?;
        outcome?;

        if appointment.status == AppointmentStatus::InProgress {
            let previous = appointment.status;
            appointment.status = AppointmentStatus::Completed;
            appointment.completed_at_utc = Some(now);
            appointment.updated_at = Some(now);
            let history = self.history_row(
                &appointment,
                Some(previous),
                actor,
                Some("completion accepted by client".to_owned()),
                None,
                now,
            );
            self.store.update_appointment_with_history(&appointment, &history)?;
            self.store.resolve_queue_for_appointment(appointment.id, "appointment completed", now)?;
        }

        self.notifier.notify(
            appointment.provider_id,
            "Completion accepted",
            "The client accepted the completion of the visit.",
            &appointment_url(&appointment),
        );
        Ok(term)
    }

    /// Client contests a pending completion term.
    ///
    /// # Errors
    ///
    /// `forbidden`, `appointment_not_found`, `completion_term_not_found`,
    /// `contest_reason_required`, `invalid_state`, or `storage`.
    pub fn contest_completion(
        &self,
        actor: Actor,
        appointment_id: Uuid,
        reason: &str,
    ) -> Result<CompletionTerm, BookingError> {
        Operation::ContestCompletion.ensure_allowed(actor.role)?;
        let appointment = self.load_owned(appointment_id, actor)?;
        let mut term = self
            .store
            .term_for_appointment(appointment_id)?
            .ok_or(BookingError::CompletionTermNotFound { appointment_id })?;

        let now = Utc::now();
        term.contest(reason, now)?;
        self.store.update_term(&term)?;

        self.notifier.notify(
            appointment.provider_id,
            "Completion contested",
            "The client contested the completion claim; an operator will review it.",
            &appointment_url(&appointment),
        );
        Ok(term)
    }

    /// Operator escalates a contested completion term; terminal.
    ///
    /// # Errors
    ///
    /// `forbidden`, `completion_term_not_found`, `invalid_state`, or
    /// `storage`.
    pub fn escalate_completion(
        &self,
        actor: Actor,
        appointment_id: Uuid,
    ) -> Result<CompletionTerm, BookingError> {
        Operation::EscalateCompletion.ensure_allowed(actor.role)?;
        let mut term = self
            .store
            .term_for_appointment(appointment_id)?
            .ok_or(BookingError::CompletionTermNotFound { appointment_id })?;

        term.escalate(Utc::now())?;
        self.store.update_term(&term)?;
        Ok(term)
    }

    /// Read the completion term of an appointment (parties and admins).
    ///
    /// # Errors
    ///
    /// `forbidden`, `appointment_not_found`, `completion_term_not_found`,
    /// or `storage`.
    pub fn completion_term(
        &self,
        actor: Actor,
        appointment_id: Uuid,
    ) -> Result<CompletionTerm, BookingError> {
        Operation::Read.ensure_allowed(actor.role)?;
        let appointment = self.load(appointment_id)?;
        self.ensure_party_or_admin(&appointment, actor)?;
        self.store
            .term_for_appointment(appointment_id)?
            .ok_or(BookingError::CompletionTermNotFound { appointment_id })
    }

    // ── Reads ──────────────────────────────────────────────────────────

    /// Read one appointment (parties and admins).
    ///
    /// # Errors
    ///
    /// `forbidden`, `appointment_not_found`, or `storage`.
    pub fn get(&self, actor: Actor, appointment_id: Uuid) -> Result<Appointment, BookingError> {
        Operation::Read.ensure_allowed(actor.role)?;
        let appointment = self.load(appointment_id)?;
        self.ensure_party_or_admin(&appointment, actor)?;
        Ok(appointment)
    }

    /// The audit trail of one appointment (parties and admins).
    ///
    /// # Errors
    ///
    /// `forbidden`, `appointment_not_found`, or `storage`.
    pub fn history(
        &self,
        actor: Actor,
        appointment_id: Uuid,
    ) -> Result<Vec<AppointmentHistory>, BookingError> {
        Operation::Read.ensure_allowed(actor.role)?;
        let appointment = self.load(appointment_id)?;
        self.ensure_party_or_admin(&appointment, actor)?;
        Ok(self.store.history_for(appointment_id)?)
    }

    /// Appointments the actor is a party of, optionally range-bounded.
    ///
    /// # Errors
    ///
    /// `forbidden` or `storage`.
    pub fn list_for_actor(
        &self,
        actor: Actor,
        from_utc: Option<DateTime<Utc>>,
        to_utc: Option<DateTime<Utc>>,
    ) -> Result<Vec<Appointment>, BookingError> {
        Operation::Read.ensure_allowed(actor.role)?;
        Ok(self.store.list_for_party(actor.user_id, from_utc, to_utc)?)
    }

    // ── Risk sweep & triage queue ──────────────────────────────────────

    /// Batch risk sweep over upcoming appointments. Pure with respect to
    /// the clock: the caller supplies `now_utc`.
    ///
    /// # Errors
    ///
    /// `forbidden` or `storage`.
    pub fn evaluate_no_show_risk(
        &self,
        actor: Actor,
        now_utc: DateTime<Utc>,
        batch_size: u32,
    ) -> Result<u32, BookingError> {
        Operation::RunBatch.ensure_allowed(actor.role)?;

        let from = now_utc - Duration::minutes(i64::from(self.config.risk.include_past_minutes));
        let to = now_utc + Duration::hours(i64::from(self.config.risk.lookahead_hours));
        let candidates = self.store.risk_candidates(from, to, batch_size)?;

        let mut processed = 0u32;
        for mut appointment in candidates {
            self.refresh_risk(&mut appointment, now_utc)?;
            self.store.update_appointment(&appointment)?;
            processed += 1;
        }
        debug!(processed, "no-show risk sweep finished");
        Ok(processed)
    }

    /// Operator claims a queue item for triage.
    ///
    /// # Errors
    ///
    /// `forbidden`, `queue_item_not_found`, `invalid_state`, or
    /// `storage`.
    pub fn claim_queue_item(
        &self,
        actor: Actor,
        item_id: Uuid,
    ) -> Result<NoShowQueueItem, BookingError> {
        Operation::ClaimQueueItem.ensure_allowed(actor.role)?;
        let mut item = self
            .store
            .get_queue_item(item_id)?
            .ok_or(BookingError::QueueItemNotFound { item_id })?;
        if item.status != QueueStatus::Open {
            return Err(BookingError::InvalidState {
                state: item.status.as_str().to_owned(),
                operation: "claim_queue_item",
            });
        }
        item.status = QueueStatus::InProgress;
        self.store.update_queue_item(&item)?;
        Ok(item)
    }

    /// Operator resolves a queue item with a note.
    ///
    /// # Errors
    ///
    /// `forbidden`, `queue_item_not_found`, `invalid_state`,
    /// `invalid_reason`, or `storage`.
    pub fn resolve_queue_item(
        &self,
        actor: Actor,
        item_id: Uuid,
        note: &str,
    ) -> Result<NoShowQueueItem, BookingError> {
        Operation::ResolveQueueItem.ensure_allowed(actor.role)?;
        let note = non_empty(note)?;
        let mut item = self
            .store
            .get_queue_item(item_id)?
            .ok_or(BookingError::QueueItemNotFound { item_id })?;
        if !item.status.is_active() {
            return Err(BookingError::InvalidState {
                state: item.status.as_str().to_owned(),
                operation: "resolve_queue_item",
            });
        }
        item.status = QueueStatus::Resolved;
        item.resolved_at_utc = Some(Utc::now());
        item.resolved_by = Some(actor.user_id);
        item.resolution_note = Some(note.to_owned());
        self.store.update_queue_item(&item)?;
        Ok(item)
    }

    /// Filtered, paginated triage listing.
    ///
    /// # Errors
    ///
    /// `forbidden` or `storage`.
    pub fn list_queue(&self, actor: Actor, filter: &QueueFilter) -> Result<QueuePage, BookingError> {
        Operation::ListQueue.ensure_allowed(actor.role)?;
        Ok(self.store.list_queue_items(filter)?)
    }

    // ── Internals ──────────────────────────────────────────────────────

    fn load(&self, appointment_id: Uuid) -> Result<Appointment, BookingError> {
        self.store
            .get_appointment(appointment_id)?
            .ok_or(BookingError::AppointmentNotFound { appointment_id })
    }

    /// Load and enforce that the actor is the matching party for their
    /// role (admins pass).
    fn load_owned(&self, appointment_id: Uuid, actor: Actor) -> Result<Appointment, BookingError> {
        let appointment = self.load(appointment_id)?;
        let owns = match actor.role {
            ActorRole::Client => appointment.client_id == actor.user_id,
            ActorRole::Provider => appointment.provider_id == actor.user_id,
            ActorRole::Admin | ActorRole::System => true,
        };
        if !owns {
            return Err(BookingError::Forbidden { detail: "appointment belongs to another user" });
        }
        Ok(appointment)
    }

    fn ensure_party_or_admin(
        &self,
        appointment: &Appointment,
        actor: Actor,
    ) -> Result<(), BookingError> {
        let allowed = match actor.role {
            ActorRole::Admin | ActorRole::System => true,
            _ => appointment.is_party(actor.user_id),
        };
        if allowed {
            Ok(())
        } else {
            Err(BookingError::Forbidden { detail: "appointment belongs to another user" })
        }
    }

    fn invalid_state(&self, appointment: &Appointment, operation: &'static str) -> BookingError {
        BookingError::InvalidState {
            state: appointment.status.as_str().to_owned(),
            operation,
        }
    }

    fn require_status(
        &self,
        appointment: &Appointment,
        allowed: &[AppointmentStatus],
        operation: &'static str,
    ) -> Result<(), BookingError> {
        if allowed.contains(&appointment.status) {
            Ok(())
        } else {
            Err(self.invalid_state(appointment, operation))
        }
    }

    /// Structural window validation shared by create and reschedule.
    fn validate_window(
        &self,
        start_utc: DateTime<Utc>,
        end_utc: DateTime<Utc>,
        now_utc: DateTime<Utc>,
    ) -> Result<(), BookingError> {
        if end_utc <= start_utc {
            return Err(BookingError::InvalidWindow { detail: "window end precedes its start" });
        }
        let minutes = (end_utc - start_utc).num_minutes();
        let scheduling = &self.config.scheduling;
        if minutes < i64::from(scheduling.min_slot_minutes)
            || minutes > i64::from(scheduling.max_window_minutes)
        {
            return Err(BookingError::InvalidWindow { detail: "window duration out of bounds" });
        }
        if start_utc.date_naive() != end_utc.date_naive() {
            return Err(BookingError::InvalidWindow { detail: "window must stay within one day" });
        }
        if start_utc < now_utc + Duration::minutes(1) {
            return Err(BookingError::InvalidWindow { detail: "window must start in the future" });
        }
        Ok(())
    }

    /// Advisory conflict check outside the committing transaction.
    fn window_free(
        &self,
        appointment: &Appointment,
        start_utc: DateTime<Utc>,
        end_utc: DateTime<Utc>,
    ) -> Result<bool, BookingError> {
        let rules = self.store.rules_for(appointment.provider_id)?;
        let exceptions =
            self.store.exceptions_overlapping(appointment.provider_id, start_utc, end_utc)?;
        let busy = self.store.blocking_windows(
            appointment.provider_id,
            start_utc,
            end_utc,
            Some(appointment.id),
        )?;
        Ok(availability::window_is_free(&rules, &exceptions, &busy, start_utc, end_utc))
    }

    fn history_row(
        &self,
        appointment: &Appointment,
        previous_status: Option<AppointmentStatus>,
        actor: Actor,
        reason: Option<String>,
        metadata: Option<HistoryMetadata>,
        now_utc: DateTime<Utc>,
    ) -> AppointmentHistory {
        AppointmentHistory {
            id: Uuid::new_v4(),
            appointment_id: appointment.id,
            previous_status,
            new_status: appointment.status,
            actor_user_id: Some(actor.user_id),
            actor_role: actor.role,
            reason,
            previous_operational_status: None,
            new_operational_status: None,
            metadata,
            occurred_at_utc: now_utc,
        }
    }

    fn inside_policy_window(&self, appointment: &Appointment, now_utc: DateTime<Utc>) -> bool {
        let hours_before =
            (appointment.window_start_utc - now_utc).num_seconds() as f64 / 3600.0;
        hours_before <= f64::from(self.config.financial.cancellation_policy_window_hours)
    }

    /// Run the financial policy engine for one event and attempt the
    /// ledger post. Infallible by design: every failure mode collapses
    /// into history metadata.
    fn apply_financial_event(
        &self,
        appointment: &Appointment,
        event: PolicyEventType,
        now_utc: DateTime<Utc>,
    ) -> HistoryMetadata {
        let service_value = match self
            .directory
            .find_request(appointment.service_request_id)
            .and_then(|r| r.agreed_value)
        {
            Some(value) => value,
            None => {
                warn!(
                    appointment_id = %appointment.id,
                    event = %event,
                    "financial policy skipped: request has no agreed value"
                );
                return HistoryMetadata::FinancialPolicyCalculationFailed {
                    error_code: "invalid_service_value".to_owned(),
                    message: "service request has no agreed commercial value".to_owned(),
                };
            }
        };

        let rules = match self.store.active_policy_rules(event) {
            Ok(rules) => rules,
            Err(err) => {
                warn!(appointment_id = %appointment.id, error = %err, "financial policy rule load failed");
                return HistoryMetadata::FinancialPolicyCalculationFailed {
                    error_code: "storage".to_owned(),
                    message: err.to_string(),
                };
            }
        };

        let breakdown = match financial::calculate(
            &rules,
            event,
            service_value,
            appointment.window_start_utc,
            now_utc,
        ) {
            Ok(breakdown) => breakdown,
            Err(err) => {
                warn!(appointment_id = %appointment.id, event = %event, error = %err, "financial policy calculation failed");
                return HistoryMetadata::FinancialPolicyCalculationFailed {
                    error_code: err.error_code().to_owned(),
                    message: err.to_string(),
                };
            }
        };

        let ledger = if breakdown.penalty_amount.is_zero() {
            LedgerOutcome::skipped_zero_penalty()
        } else {
            // Client-fault events grant the compensation to the provider;
            // provider-fault events debit the full penalty against them.
            let (entry_type, amount) = if event.provider_at_fault() {
                (LedgerEntryType::Debit, breakdown.penalty_amount)
            } else {
                (LedgerEntryType::Grant, breakdown.compensation_amount)
            };
            let reason = format!(
                "financial_policy:{}:appointment:{}",
                event.as_str(),
                appointment.id
            );
            match self.wallet.append(appointment.provider_id, entry_type, amount, &reason) {
                Ok(()) => LedgerOutcome::applied(),
                Err(err) => {
                    warn!(
                        appointment_id = %appointment.id,
                        error = %err,
                        "ledger post failed; recorded for reconciliation"
                    );
                    LedgerOutcome::failed(&err.to_string())
                }
            }
        };

        HistoryMetadata::FinancialPolicyApplied { breakdown, ledger }
    }

    /// Recompute the risk assessment in place, maintain the triage queue,
    /// and append a risk history row when the assessment changed. The
    /// caller persists the appointment row afterwards.
    fn refresh_risk(
        &self,
        appointment: &mut Appointment,
        now_utc: DateTime<Utc>,
    ) -> Result<(), BookingError> {
        // Appointments beyond the lookahead horizon are not
        // proximity-relevant yet; the sweep picks them up as their window
        // approaches.
        let horizon = now_utc + Duration::hours(i64::from(self.config.risk.lookahead_hours));
        if appointment.window_start_utc > horizon {
            return Ok(());
        }

        let policy = &self.config.risk.policy;
        let lookback = now_utc - Duration::days(i64::from(policy.lookback_days));

        let inputs = RiskInputs {
            client_presence_confirmed: appointment.client_presence_confirmed == Some(true),
            provider_presence_confirmed: appointment.provider_presence_confirmed == Some(true),
            minutes_to_window: (appointment.window_start_utc - now_utc).num_minutes(),
            client_history_events: self.store.count_client_risk_events(
                appointment.client_id,
                lookback,
                now_utc,
            )?,
            provider_history_events: self.store.count_provider_risk_events(
                appointment.provider_id,
                lookback,
                now_utc,
            )?,
        };
        let assessment = risk::assess(&inputs, policy);

        let previous = RiskSnapshot {
            score: appointment.no_show_risk_score,
            level: appointment.no_show_risk_level,
            reasons: appointment.no_show_risk_reasons.clone(),
        };
        let reasons_csv = assessment.reasons_csv();
        let changed = previous.score != Some(assessment.score)
            || previous.level != Some(assessment.level)
            || previous.reasons.as_deref() != Some(reasons_csv.as_str());

        let previous_level = appointment.no_show_risk_level;
        appointment.no_show_risk_score = Some(assessment.score);
        appointment.no_show_risk_level = Some(assessment.level);
        appointment.no_show_risk_reasons = Some(reasons_csv.clone());
        appointment.no_show_risk_calculated_at_utc = Some(now_utc);

        if changed {
            let history = AppointmentHistory {
                id: Uuid::new_v4(),
                appointment_id: appointment.id,
                previous_status: Some(appointment.status),
                new_status: appointment.status,
                actor_user_id: None,
                actor_role: ActorRole::System,
                reason: Some(format!(
                    "no-show risk recalculated: {} ({})",
                    assessment.level, assessment.score
                )),
                previous_operational_status: None,
                new_operational_status: None,
                metadata: Some(HistoryMetadata::NoShowRiskAssessment {
                    previous: previous.clone(),
                    current: RiskSnapshot {
                        score: Some(assessment.score),
                        level: Some(assessment.level),
                        reasons: Some(reasons_csv.clone()),
                    },
                }),
                occurred_at_utc: now_utc,
            };
            self.store.append_history(&history)?;
        }

        // Queue maintenance: one active item per appointment, refreshed on
        // re-detection, never resolved here on mere score decay.
        if assessment.level.is_actionable() {
            let snapshot = self.directory.find_request(appointment.service_request_id);
            match self.store.active_queue_item(appointment.id)? {
                Some(mut item) => {
                    item.risk_level = assessment.level;
                    item.score = assessment.score;
                    item.reasons_csv = reasons_csv;
                    item.last_detected_at_utc = now_utc;
                    self.store.update_queue_item(&item)?;
                }
                None => {
                    let item = NoShowQueueItem {
                        id: Uuid::new_v4(),
                        appointment_id: appointment.id,
                        risk_level: assessment.level,
                        score: assessment.score,
                        reasons_csv,
                        status: QueueStatus::Open,
                        city: snapshot.as_ref().and_then(|s| s.city.clone()),
                        category: snapshot.as_ref().and_then(|s| s.category.clone()),
                        first_detected_at_utc: now_utc,
                        last_detected_at_utc: now_utc,
                        resolved_at_utc: None,
                        resolved_by: None,
                        resolution_note: None,
                    };
                    self.store.insert_queue_item(&item)?;
                }
            }
        }

        // Escalations into an actionable band alert both parties.
        if changed
            && assessment.level.is_actionable()
            && previous_level.map_or(true, |l| l < assessment.level)
        {
            let subject = format!("No-show risk alert: {}", assessment.level);
            let message = format!(
                "The visit scheduled for {} is at {} no-show risk (score {}/100).",
                appointment.window_start_utc.format("%Y-%m-%d %H:%M UTC"),
                assessment.level,
                assessment.score
            );
            let url = appointment_url(appointment);
            self.notifier.notify(appointment.client_id, &subject, &message, &url);
            self.notifier.notify(appointment.provider_id, &subject, &message, &url);
        }

        Ok(())
    }
}

fn clear_negotiation(appointment: &mut Appointment) {
    appointment.proposed_window_start_utc = None;
    appointment.proposed_window_end_utc = None;
    appointment.reschedule_requested_at_utc = None;
    appointment.reschedule_requested_by_role = None;
    appointment.reschedule_request_reason = None;
}

fn non_empty(reason: &str) -> Result<&str, BookingError> {
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        Err(BookingError::InvalidReason)
    } else {
        Ok(trimmed)
    }
}

fn appointment_url(appointment: &Appointment) -> String {
    format!(
        "/requests/{}/appointments/{}",
        appointment.service_request_id, appointment.id
    )
}
