//! Crate-wide error type and wire error-code taxonomy.
//!
//! Every fallible operation in this crate returns [`BookingError`]. The enum
//! carries enough structure for callers to branch on, while
//! [`BookingError::error_code`] exposes the stable snake_case code that goes
//! over the wire and [`BookingError::kind`] groups codes into the four
//! transport classes (plus storage):
//!
//! | [`ErrorKind`] | Typical HTTP mapping |
//! |---------------|----------------------|
//! | `NotFound`    | 404                  |
//! | `Conflict`    | 409                  |
//! | `Validation`  | 400                  |
//! | `Forbidden`   | 403                  |
//! | `Storage`     | 500                  |
//!
//! The mapping itself lives in whatever transport adapter sits above this
//! crate; nothing here depends on HTTP.

use thiserror::Error;
use uuid::Uuid;

use crate::appointment::state::OperationalStatus;
use crate::store::StoreError;

/// Transport-level classification of a [`BookingError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The referenced entity does not exist.
    NotFound,
    /// The operation conflicts with current state (including calendar
    /// conflicts and illegal state-machine transitions).
    Conflict,
    /// The input is malformed or violates a validation rule.
    Validation,
    /// The actor's role or ownership does not permit the operation.
    Forbidden,
    /// The persistence layer failed.
    Storage,
}

/// Errors surfaced by appointment, availability, completion, and queue
/// operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BookingError {
    /// Service request not found in the request directory.
    #[error("service request not found: {request_id}")]
    RequestNotFound {
        /// The request id that failed to resolve.
        request_id: Uuid,
    },

    /// Provider not found or not assignable.
    #[error("provider not found: {provider_id}")]
    ProviderNotFound {
        /// The provider id that failed to resolve.
        provider_id: Uuid,
    },

    /// The provider has no accepted proposal on the request.
    #[error("provider {provider_id} has no accepted proposal on request {request_id}")]
    ProviderNotAssigned {
        /// Request the booking was attempted against.
        request_id: Uuid,
        /// Provider without an accepted proposal.
        provider_id: Uuid,
    },

    /// Appointment not found.
    #[error("appointment not found: {appointment_id}")]
    AppointmentNotFound {
        /// The appointment id that failed to resolve.
        appointment_id: Uuid,
    },

    /// No completion term exists for the appointment.
    #[error("completion term not found for appointment {appointment_id}")]
    CompletionTermNotFound {
        /// The appointment whose term was requested.
        appointment_id: Uuid,
    },

    /// Availability rule not found (or owned by another provider).
    #[error("availability rule not found: {rule_id}")]
    RuleNotFound {
        /// The rule id that failed to resolve.
        rule_id: Uuid,
    },

    /// Availability exception not found (or owned by another provider).
    #[error("availability exception not found: {exception_id}")]
    ExceptionNotFound {
        /// The exception id that failed to resolve.
        exception_id: Uuid,
    },

    /// No-show queue item not found.
    #[error("queue item not found: {item_id}")]
    QueueItemNotFound {
        /// The queue item id that failed to resolve.
        item_id: Uuid,
    },

    /// A non-terminal appointment already exists for the request.
    #[error("request {request_id} already has an active appointment")]
    AppointmentAlreadyExists {
        /// The request that is already booked.
        request_id: Uuid,
    },

    /// The window is not bookable for the provider (outside availability or
    /// overlapping another active appointment).
    #[error("requested window is not available for the provider")]
    SlotUnavailable,

    /// The operation is not legal from the entity's current state
    /// (booking status or completion-term status).
    #[error("operation {operation} is not legal from state {state}")]
    InvalidState {
        /// Current state, in its storage representation.
        state: String,
        /// The attempted operation, for diagnostics.
        operation: &'static str,
    },

    /// Operational status update skips a stage of the in-visit chain.
    #[error("operational transition to {to} is not allowed from the current stage")]
    InvalidOperationalTransition {
        /// Current operational status, if any.
        from: Option<OperationalStatus>,
        /// The requested operational status.
        to: OperationalStatus,
    },

    /// The completion PIN is locked after too many failed attempts.
    #[error("completion pin locked after {attempts} failed attempts")]
    PinLocked {
        /// Consecutive failed attempts recorded on the term.
        attempts: u32,
    },

    /// The completion PIN expired before validation.
    #[error("completion pin expired")]
    PinExpired,

    /// The supplied PIN does not match the stored hash.
    #[error("completion pin does not match")]
    InvalidPin,

    /// The supplied PIN is not a well-formed numeric code.
    #[error("completion pin is malformed")]
    InvalidPinFormat,

    /// Unsupported completion acceptance method.
    #[error("unsupported acceptance method: {method}")]
    InvalidAcceptanceMethod {
        /// The method string supplied by the caller.
        method: String,
    },

    /// Signature acceptance requires a non-empty signer name.
    #[error("signature acceptance requires a signer name")]
    SignatureRequired,

    /// Contesting a completion requires a non-empty reason.
    #[error("contesting a completion requires a reason")]
    ContestReasonRequired,

    /// The appointment window fails a structural validation rule.
    #[error("invalid appointment window: {detail}")]
    InvalidWindow {
        /// Which rule was violated.
        detail: &'static str,
    },

    /// Slot query range is empty or inverted.
    #[error("slot query range is invalid")]
    InvalidRange,

    /// Slot query range exceeds the configured maximum.
    #[error("slot query range exceeds {max_days} days")]
    RangeTooLarge {
        /// Maximum permitted range in days.
        max_days: u32,
    },

    /// Requested slot duration is outside the permitted bounds.
    #[error("slot duration must be between {min_minutes} and {max_minutes} minutes")]
    InvalidSlotDuration {
        /// Minimum permitted duration.
        min_minutes: u32,
        /// Maximum permitted duration.
        max_minutes: u32,
    },

    /// A mandatory free-text reason is missing or empty.
    #[error("a non-empty reason is required for this operation")]
    InvalidReason,

    /// The actor's role or ownership does not permit the operation.
    #[error("forbidden: {detail}")]
    Forbidden {
        /// Why the actor was refused.
        detail: &'static str,
    },

    /// Persistence failure.
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl BookingError {
    /// Stable wire code for this error.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::RequestNotFound { .. } => "request_not_found",
            Self::ProviderNotFound { .. } => "provider_not_found",
            Self::ProviderNotAssigned { .. } => "provider_not_assigned",
            Self::AppointmentNotFound { .. } => "appointment_not_found",
            Self::CompletionTermNotFound { .. } => "completion_term_not_found",
            Self::RuleNotFound { .. } => "rule_not_found",
            Self::ExceptionNotFound { .. } => "exception_not_found",
            Self::QueueItemNotFound { .. } => "queue_item_not_found",
            Self::AppointmentAlreadyExists { .. } => "appointment_already_exists",
            Self::SlotUnavailable => "slot_unavailable",
            Self::InvalidState { .. } => "invalid_state",
            Self::InvalidOperationalTransition { .. } => "invalid_operational_transition",
            Self::PinLocked { .. } => "pin_locked",
            Self::PinExpired => "pin_expired",
            Self::InvalidPin => "invalid_pin",
            Self::InvalidPinFormat => "invalid_pin_format",
            Self::InvalidAcceptanceMethod { .. } => "invalid_acceptance_method",
            Self::SignatureRequired => "signature_required",
            Self::ContestReasonRequired => "contest_reason_required",
            Self::InvalidWindow { .. } => "invalid_window",
            Self::InvalidRange => "invalid_range",
            Self::RangeTooLarge { .. } => "range_too_large",
            Self::InvalidSlotDuration { .. } => "invalid_slot_duration",
            Self::InvalidReason => "invalid_reason",
            Self::Forbidden { .. } => "forbidden",
            Self::Storage(_) => "storage",
        }
    }

    /// Transport class for this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RequestNotFound { .. }
            | Self::ProviderNotFound { .. }
            | Self::AppointmentNotFound { .. }
            | Self::CompletionTermNotFound { .. }
            | Self::RuleNotFound { .. }
            | Self::ExceptionNotFound { .. }
            | Self::QueueItemNotFound { .. } => ErrorKind::NotFound,

            Self::AppointmentAlreadyExists { .. }
            | Self::SlotUnavailable
            | Self::InvalidState { .. }
            | Self::InvalidOperationalTransition { .. }
            | Self::PinLocked { .. }
            | Self::PinExpired
            | Self::InvalidPin => ErrorKind::Conflict,

            Self::ProviderNotAssigned { .. }
            | Self::InvalidPinFormat
            | Self::InvalidAcceptanceMethod { .. }
            | Self::SignatureRequired
            | Self::ContestReasonRequired
            | Self::InvalidWindow { .. }
            | Self::InvalidRange
            | Self::RangeTooLarge { .. }
            | Self::InvalidSlotDuration { .. }
            | Self::InvalidReason => ErrorKind::Validation,

            Self::Forbidden { .. } => ErrorKind::Forbidden,

            Self::Storage(_) => ErrorKind::Storage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_transport_classes() {
        let cases: Vec<(BookingError, &str, ErrorKind)> = vec![
            (
                BookingError::AppointmentNotFound { appointment_id: Uuid::nil() },
                "appointment_not_found",
                ErrorKind::NotFound,
            ),
            (BookingError::SlotUnavailable, "slot_unavailable", ErrorKind::Conflict),
            (
                BookingError::InvalidState { state: "completed".to_owned(), operation: "cancel" },
                "invalid_state",
                ErrorKind::Conflict,
            ),
            (BookingError::PinLocked { attempts: 5 }, "pin_locked", ErrorKind::Conflict),
            (BookingError::SignatureRequired, "signature_required", ErrorKind::Validation),
            (BookingError::InvalidReason, "invalid_reason", ErrorKind::Validation),
            (
                BookingError::Forbidden { detail: "role not permitted" },
                "forbidden",
                ErrorKind::Forbidden,
            ),
        ];
        for (error, code, kind) in cases {
            assert_eq!(error.error_code(), code);
            assert_eq!(error.kind(), kind);
        }
    }
}
