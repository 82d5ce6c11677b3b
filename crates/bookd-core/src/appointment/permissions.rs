//! Static role-permission table.
//!
//! Every externally reachable operation names itself here, and the table is
//! consulted before any transition logic runs. Ownership checks (is this
//! *your* appointment) happen afterwards, in the service.

use crate::appointment::state::ActorRole;
use crate::error::BookingError;

/// Externally reachable operations, as gated units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Query bookable slots.
    AvailableSlots,
    /// Manage availability rules and exceptions.
    ManageAvailability,
    /// Create an appointment.
    Create,
    /// Confirm a pending appointment.
    Confirm,
    /// Reject a pending appointment.
    Reject,
    /// Cancel a non-terminal appointment.
    Cancel,
    /// Open a reschedule negotiation.
    RequestReschedule,
    /// Answer an open reschedule negotiation.
    RespondReschedule,
    /// Register on-site arrival.
    MarkArrived,
    /// Register execution start.
    StartExecution,
    /// Answer a presence check.
    RespondPresence,
    /// Advance the in-visit operational status.
    UpdateOperationalStatus,
    /// Issue a completion PIN.
    GenerateCompletionPin,
    /// Accept completion by PIN or signature.
    ConfirmCompletion,
    /// Contest a pending completion term.
    ContestCompletion,
    /// Escalate a contested completion term.
    EscalateCompletion,
    /// Read an appointment or its completion term.
    Read,
    /// Claim a no-show queue item for triage.
    ClaimQueueItem,
    /// Resolve a no-show queue item.
    ResolveQueueItem,
    /// List the no-show triage queue.
    ListQueue,
    /// Run a batch job (expire, risk sweep).
    RunBatch,
}

impl Operation {
    /// Roles allowed to invoke this operation.
    #[must_use]
    pub const fn allowed_roles(self) -> &'static [ActorRole] {
        use ActorRole::{Admin, Client, Provider, System};
        match self {
            Self::AvailableSlots | Self::Read => &[Client, Provider, Admin],
            Self::ManageAvailability => &[Provider],
            Self::Create => &[Client],
            Self::Confirm | Self::Reject => &[Provider],
            Self::Cancel | Self::RequestReschedule | Self::RespondReschedule => {
                &[Client, Provider]
            }
            Self::MarkArrived | Self::StartExecution | Self::UpdateOperationalStatus => {
                &[Provider]
            }
            Self::RespondPresence => &[Client, Provider],
            Self::GenerateCompletionPin => &[Provider],
            Self::ConfirmCompletion | Self::ContestCompletion => &[Client],
            Self::EscalateCompletion | Self::ClaimQueueItem | Self::ResolveQueueItem
            | Self::ListQueue => &[Admin],
            Self::RunBatch => &[System, Admin],
        }
    }

    /// Check the table; `forbidden` when the role has no grant.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Forbidden`] when `role` is not listed for
    /// this operation.
    pub fn ensure_allowed(self, role: ActorRole) -> Result<(), BookingError> {
        if self.allowed_roles().contains(&role) {
            Ok(())
        } else {
            Err(BookingError::Forbidden { detail: "role not permitted for this operation" })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_is_client_only() {
        assert!(Operation::Create.ensure_allowed(ActorRole::Client).is_ok());
        assert!(Operation::Create.ensure_allowed(ActorRole::Provider).is_err());
        assert!(Operation::Create.ensure_allowed(ActorRole::Admin).is_err());
    }

    #[test]
    fn confirm_and_reject_are_provider_only() {
        for op in [Operation::Confirm, Operation::Reject] {
            assert!(op.ensure_allowed(ActorRole::Provider).is_ok());
            assert!(op.ensure_allowed(ActorRole::Client).is_err());
        }
    }

    #[test]
    fn triage_is_admin_only() {
        for op in [
            Operation::ClaimQueueItem,
            Operation::ResolveQueueItem,
            Operation::ListQueue,
            Operation::EscalateCompletion,
        ] {
            assert!(op.ensure_allowed(ActorRole::Admin).is_ok());
            assert!(op.ensure_allowed(ActorRole::Provider).is_err());
            assert!(op.ensure_allowed(ActorRole::Client).is_err());
        }
    }

    #[test]
    fn batch_jobs_accept_system_and_admin() {
        assert!(Operation::RunBatch.ensure_allowed(ActorRole::System).is_ok());
        assert!(Operation::RunBatch.ensure_allowed(ActorRole::Admin).is_ok());
        assert!(Operation::RunBatch.ensure_allowed(ActorRole::Client).is_err());
    }
}
