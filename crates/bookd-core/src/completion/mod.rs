//! Completion confirmation protocol: PIN- or signature-based client
//! acceptance of the provider's completion claim, with a contest path.
//!
//! A [`CompletionTerm`] is created when the provider requests a completion
//! PIN on an in-progress visit. Only the SHA-256 hash of the PIN is stored;
//! the clear PIN is returned to the provider exactly once. Validation is
//! single-use (the hash is cleared on acceptance), expires after a short
//! window, and locks after too many consecutive mismatches. Accepted and
//! Escalated terms are immutable.

#[cfg(test)]
mod tests;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::BookingError;

/// Number of digits in a completion PIN.
pub const PIN_DIGITS: usize = 6;

/// Lifecycle of a completion term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermStatus {
    /// Waiting for the client to accept or contest.
    PendingClientAcceptance,
    /// Client accepted; terminal.
    AcceptedByClient,
    /// Client contested; an operator may escalate.
    Contested,
    /// Escalated by an operator; terminal.
    Escalated,
}

impl TermStatus {
    /// Whether the term can no longer change.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::AcceptedByClient | Self::Escalated)
    }

    /// Stable storage / wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PendingClientAcceptance => "pending_client_acceptance",
            Self::AcceptedByClient => "accepted_by_client",
            Self::Contested => "contested",
            Self::Escalated => "escalated",
        }
    }

    /// Parse the storage representation back into a status.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "pending_client_acceptance" => Self::PendingClientAcceptance,
            "accepted_by_client" => Self::AcceptedByClient,
            "contested" => Self::Contested,
            "escalated" => Self::Escalated,
            _ => return None,
        })
    }
}

/// How the client accepted completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptanceMethod {
    /// Typed the one-time PIN.
    Pin,
    /// Signed with their name.
    Signature,
}

impl AcceptanceMethod {
    /// Stable storage / wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pin => "pin",
            Self::Signature => "signature",
        }
    }

    /// Parse the storage representation back into a method.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "pin" => Self::Pin,
            "signature" => Self::Signature,
            _ => return None,
        })
    }
}

/// Record of client acceptance (or contest) of a completion claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionTerm {
    /// Term id.
    pub id: Uuid,
    /// The underlying service request.
    pub service_request_id: Uuid,
    /// The appointment being completed.
    pub appointment_id: Uuid,
    /// Provider claiming completion.
    pub provider_id: Uuid,
    /// Client expected to accept.
    pub client_id: Uuid,
    /// Term status.
    pub status: TermStatus,
    /// How the term was accepted, once accepted.
    pub accepted_with: Option<AcceptanceMethod>,
    /// SHA-256 hex of the active PIN; cleared on acceptance (single-use).
    pub pin_hash: Option<String>,
    /// PIN expiry deadline.
    pub pin_expires_at_utc: Option<DateTime<Utc>>,
    /// Consecutive failed PIN attempts.
    pub pin_failed_attempts: u32,
    /// When the client accepted.
    pub accepted_at_utc: Option<DateTime<Utc>>,
    /// Signer name for signature acceptance.
    pub accepted_signature_name: Option<String>,
    /// When the client contested.
    pub contested_at_utc: Option<DateTime<Utc>>,
    /// Why the client contested.
    pub contest_reason: Option<String>,
    /// When an operator escalated.
    pub escalated_at_utc: Option<DateTime<Utc>>,
    /// Short description of the work being accepted.
    pub summary: String,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: Option<DateTime<Utc>>,
}

/// Generate a fresh numeric PIN.
#[must_use]
pub fn generate_pin<R: Rng>(rng: &mut R) -> String {
    (0..PIN_DIGITS)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

/// SHA-256 hex digest of a PIN, the only form stored at rest.
#[must_use]
pub fn hash_pin(pin: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(pin.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Whether a submitted PIN is structurally well-formed.
#[must_use]
pub fn pin_is_well_formed(pin: &str) -> bool {
    pin.len() == PIN_DIGITS && pin.bytes().all(|b| b.is_ascii_digit())
}

impl CompletionTerm {
    /// Create a pending term with a freshly hashed PIN.
    #[must_use]
    pub fn new_pending(
        service_request_id: Uuid,
        appointment_id: Uuid,
        provider_id: Uuid,
        client_id: Uuid,
        summary: String,
        pin: &str,
        pin_ttl_minutes: u32,
        now_utc: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            service_request_id,
            appointment_id,
            provider_id,
            client_id,
            status: TermStatus::PendingClientAcceptance,
            accepted_with: None,
            pin_hash: Some(hash_pin(pin)),
            pin_expires_at_utc: Some(now_utc + Duration::minutes(i64::from(pin_ttl_minutes))),
            pin_failed_attempts: 0,
            accepted_at_utc: None,
            accepted_signature_name: None,
            contested_at_utc: None,
            contest_reason: None,
            escalated_at_utc: None,
            summary,
            created_at: now_utc,
            updated_at: None,
        }
    }

    /// Re-issue the PIN on a still-pending term, resetting expiry and the
    /// failed-attempt counter.
    pub fn reissue_pin(&mut self, pin: &str, pin_ttl_minutes: u32, now_utc: DateTime<Utc>) {
        self.pin_hash = Some(hash_pin(pin));
        self.pin_expires_at_utc = Some(now_utc + Duration::minutes(i64::from(pin_ttl_minutes)));
        self.pin_failed_attempts = 0;
        self.updated_at = Some(now_utc);
    }

    /// Validate a submitted PIN against this term.
    ///
    /// On success the term becomes Accepted and the hash is cleared so the
    /// PIN cannot be replayed. On mismatch the failed-attempt counter is
    /// incremented; the caller must persist the term in both cases.
    ///
    /// # Errors
    ///
    /// - [`BookingError::InvalidState`] when the term is not pending.
    /// - [`BookingError::InvalidPinFormat`] for malformed input.
    /// - [`BookingError::PinLocked`] at or beyond the attempt limit.
    /// - [`BookingError::PinExpired`] past the deadline, regardless of
    ///   correctness.
    /// - [`BookingError::InvalidPin`] on mismatch.
    pub fn validate_pin(
        &mut self,
        submitted: &str,
        max_failed_attempts: u32,
        now_utc: DateTime<Utc>,
    ) -> Result<(), BookingError> {
        if self.status != TermStatus::PendingClientAcceptance {
            return Err(BookingError::InvalidState {
                state: self.status.as_str().to_owned(),
                operation: "validate_completion_pin",
            });
        }
        if !pin_is_well_formed(submitted) {
            return Err(BookingError::InvalidPinFormat);
        }
        if self.pin_failed_attempts >= max_failed_attempts {
            return Err(BookingError::PinLocked { attempts: self.pin_failed_attempts });
        }
        let expired = self
            .pin_expires_at_utc
            .map_or(true, |deadline| now_utc > deadline);
        if expired {
            return Err(BookingError::PinExpired);
        }

        let matches = self
            .pin_hash
            .as_deref()
            .map_or(false, |stored| stored == hash_pin(submitted));
        if !matches {
            self.pin_failed_attempts += 1;
            self.updated_at = Some(now_utc);
            if self.pin_failed_attempts >= max_failed_attempts {
                return Err(BookingError::PinLocked { attempts: self.pin_failed_attempts });
            }
            return Err(BookingError::InvalidPin);
        }

        self.status = TermStatus::AcceptedByClient;
        self.accepted_with = Some(AcceptanceMethod::Pin);
        self.accepted_at_utc = Some(now_utc);
        self.pin_hash = None;
        self.pin_expires_at_utc = None;
        self.updated_at = Some(now_utc);
        Ok(())
    }

    /// Accept the term with a signature.
    ///
    /// # Errors
    ///
    /// - [`BookingError::InvalidState`] when the term is not pending.
    /// - [`BookingError::SignatureRequired`] for an empty signer name.
    pub fn accept_with_signature(
        &mut self,
        signature_name: &str,
        now_utc: DateTime<Utc>,
    ) -> Result<(), BookingError> {
        if self.status != TermStatus::PendingClientAcceptance {
            return Err(BookingError::InvalidState {
                state: self.status.as_str().to_owned(),
                operation: "confirm_completion",
            });
        }
        let name = signature_name.trim();
        if name.is_empty() {
            return Err(BookingError::SignatureRequired);
        }

        self.status = TermStatus::AcceptedByClient;
        self.accepted_with = Some(AcceptanceMethod::Signature);
        self.accepted_signature_name = Some(name.to_owned());
        self.accepted_at_utc = Some(now_utc);
        self.pin_hash = None;
        self.pin_expires_at_utc = None;
        self.updated_at = Some(now_utc);
        Ok(())
    }

    /// Contest the term.
    ///
    /// # Errors
    ///
    /// - [`BookingError::InvalidState`] when the term is not pending.
    /// - [`BookingError::ContestReasonRequired`] for an empty reason.
    pub fn contest(&mut self, reason: &str, now_utc: DateTime<Utc>) -> Result<(), BookingError> {
        if self.status != TermStatus::PendingClientAcceptance {
            return Err(BookingError::InvalidState {
                state: self.status.as_str().to_owned(),
                operation: "contest_completion",
            });
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(BookingError::ContestReasonRequired);
        }

        self.status = TermStatus::Contested;
        self.contest_reason = Some(reason.to_owned());
        self.contested_at_utc = Some(now_utc);
        self.updated_at = Some(now_utc);
        Ok(())
    }

    /// Escalate a contested term (operator action); terminal.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidState`] unless the term is Contested.
    pub fn escalate(&mut self, now_utc: DateTime<Utc>) -> Result<(), BookingError> {
        if self.status != TermStatus::Contested {
            return Err(BookingError::InvalidState {
                state: self.status.as_str().to_owned(),
                operation: "escalate_completion",
            });
        }
        self.status = TermStatus::Escalated;
        self.escalated_at_utc = Some(now_utc);
        self.updated_at = Some(now_utc);
        Ok(())
    }
}
