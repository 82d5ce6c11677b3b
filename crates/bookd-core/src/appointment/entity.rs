//! Appointment root entity and its append-only history trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::{ActorRole, AppointmentStatus, OperationalStatus};
use crate::financial::Breakdown;
use crate::risk::RiskLevel;

/// The appointment root entity.
///
/// One appointment tracks a single scheduled visit for a
/// `(service_request, provider)` pair. At most one appointment per pair may
/// be in a non-terminal status at any time; the invariant is enforced at
/// creation and at reschedule acceptance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    /// Appointment id.
    pub id: Uuid,
    /// The service request this visit fulfils.
    pub service_request_id: Uuid,
    /// The client who owns the request.
    pub client_id: Uuid,
    /// The provider performing the visit.
    pub provider_id: Uuid,
    /// Scheduled window start (inclusive).
    pub window_start_utc: DateTime<Utc>,
    /// Scheduled window end (exclusive).
    pub window_end_utc: DateTime<Utc>,
    /// Booking status.
    pub status: AppointmentStatus,
    /// Deadline for provider confirmation while pending.
    pub expires_at_utc: Option<DateTime<Utc>>,
    /// Free-text reason attached by the last actor (creation note,
    /// rejection or cancellation reason).
    pub reason: Option<String>,

    /// Proposed window start during a reschedule negotiation.
    pub proposed_window_start_utc: Option<DateTime<Utc>>,
    /// Proposed window end during a reschedule negotiation.
    pub proposed_window_end_utc: Option<DateTime<Utc>>,
    /// When the open reschedule request was made.
    pub reschedule_requested_at_utc: Option<DateTime<Utc>>,
    /// Who asked for the open reschedule.
    pub reschedule_requested_by_role: Option<ActorRole>,
    /// Why the reschedule was requested.
    pub reschedule_request_reason: Option<String>,

    /// When the provider confirmed.
    pub confirmed_at_utc: Option<DateTime<Utc>>,
    /// When arrival was registered.
    pub arrived_at_utc: Option<DateTime<Utc>>,
    /// Arrival latitude, when geolocated.
    pub arrived_latitude: Option<f64>,
    /// Arrival longitude, when geolocated.
    pub arrived_longitude: Option<f64>,
    /// Arrival GPS accuracy in meters, when geolocated.
    pub arrived_accuracy_meters: Option<f64>,
    /// Manual justification when arrival was registered without GPS.
    pub arrived_manual_reason: Option<String>,
    /// When execution started.
    pub started_at_utc: Option<DateTime<Utc>>,
    /// When the provider rejected.
    pub rejected_at_utc: Option<DateTime<Utc>>,
    /// When the appointment was cancelled.
    pub cancelled_at_utc: Option<DateTime<Utc>>,
    /// When the client accepted completion.
    pub completed_at_utc: Option<DateTime<Utc>>,

    /// In-visit operational status (orthogonal to `status`).
    pub operational_status: Option<OperationalStatus>,
    /// When the operational status last changed.
    pub operational_status_updated_at_utc: Option<DateTime<Utc>>,
    /// Reason for the last operational status change.
    pub operational_status_reason: Option<String>,

    /// Client's answer to the presence check, if any.
    pub client_presence_confirmed: Option<bool>,
    /// When the client answered.
    pub client_presence_responded_at_utc: Option<DateTime<Utc>>,
    /// Free-text attached to the client's answer.
    pub client_presence_reason: Option<String>,
    /// Provider's answer to the presence check, if any.
    pub provider_presence_confirmed: Option<bool>,
    /// When the provider answered.
    pub provider_presence_responded_at_utc: Option<DateTime<Utc>>,
    /// Free-text attached to the provider's answer.
    pub provider_presence_reason: Option<String>,

    /// Last computed no-show risk score (0–100).
    pub no_show_risk_score: Option<u8>,
    /// Last computed no-show risk level.
    pub no_show_risk_level: Option<RiskLevel>,
    /// Comma-separated reason codes from the last assessment.
    pub no_show_risk_reasons: Option<String>,
    /// When the risk was last computed.
    pub no_show_risk_calculated_at_utc: Option<DateTime<Utc>>,

    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: Option<DateTime<Utc>>,
}

impl Appointment {
    /// Whether the given user is a party (client or provider) of this
    /// appointment.
    #[must_use]
    pub fn is_party(&self, user_id: Uuid) -> bool {
        self.client_id == user_id || self.provider_id == user_id
    }
}

/// One append-only audit row per transition or recorded event.
///
/// Never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentHistory {
    /// History row id.
    pub id: Uuid,
    /// Owning appointment.
    pub appointment_id: Uuid,
    /// Status before the transition (`None` on creation).
    pub previous_status: Option<AppointmentStatus>,
    /// Status after the transition.
    pub new_status: AppointmentStatus,
    /// Acting user, when the event was user-initiated.
    pub actor_user_id: Option<Uuid>,
    /// Role of the actor.
    pub actor_role: ActorRole,
    /// Free-text annotation.
    pub reason: Option<String>,
    /// Operational status before the event, when relevant.
    pub previous_operational_status: Option<OperationalStatus>,
    /// Operational status after the event, when relevant.
    pub new_operational_status: Option<OperationalStatus>,
    /// Structured event payload, when the event carries one.
    pub metadata: Option<HistoryMetadata>,
    /// When the event occurred.
    pub occurred_at_utc: DateTime<Utc>,
}

/// Machine-checkable payload embedded in a history row.
///
/// Serialized as JSON with a `type` discriminator so operators and tooling
/// can branch on the variant without guessing at an untyped map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryMetadata {
    /// A no-show risk assessment changed.
    NoShowRiskAssessment {
        /// Assessment before this run.
        previous: RiskSnapshot,
        /// Assessment after this run.
        current: RiskSnapshot,
    },
    /// A party answered the presence check.
    PresenceResponse {
        /// Which party answered.
        participant: ActorRole,
        /// Whether presence was confirmed.
        confirmed: bool,
        /// Free-text attached to the answer.
        reason: Option<String>,
    },
    /// The financial policy engine computed and (attempted to) post a
    /// penalty split.
    FinancialPolicyApplied {
        /// The full computation receipt.
        breakdown: Breakdown,
        /// Outcome of the external ledger post.
        ledger: LedgerOutcome,
    },
    /// The financial policy engine failed; the booking transition committed
    /// regardless.
    FinancialPolicyCalculationFailed {
        /// Stable engine error code.
        error_code: String,
        /// Human-readable failure description.
        message: String,
    },
}

/// Score/level/reasons triple captured before and after a scorer run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSnapshot {
    /// Risk score (0–100), if one had been computed.
    pub score: Option<u8>,
    /// Risk level, if one had been computed.
    pub level: Option<RiskLevel>,
    /// Comma-separated reason codes.
    pub reasons: Option<String>,
}

/// Result of the single ledger post attempted for a financial event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerOutcome {
    /// Whether a post was attempted at all (zero-penalty outcomes skip it).
    pub requested: bool,
    /// `applied`, `skipped_zero_penalty`, or `failed: <detail>`.
    pub result: String,
}

impl LedgerOutcome {
    /// A successfully applied post.
    #[must_use]
    pub fn applied() -> Self {
        Self { requested: true, result: "applied".to_owned() }
    }

    /// No post was attempted because the penalty was zero.
    #[must_use]
    pub fn skipped_zero_penalty() -> Self {
        Self { requested: false, result: "skipped_zero_penalty".to_owned() }
    }

    /// The post was attempted and failed; reconciliation is out-of-band.
    #[must_use]
    pub fn failed(detail: &str) -> Self {
        Self { requested: true, result: format!("failed: {detail}") }
    }
}
