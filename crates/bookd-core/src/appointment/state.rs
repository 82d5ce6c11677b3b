//! Booking status, actor roles, and the in-visit operational status chain.
//!
//! # Booking state machine
//!
//! ```text
//!                         ┌──────────────────────────────┐
//!                         │ PendingProviderConfirmation  │
//!                         └──────┬────────┬──────────┬───┘
//!                    confirm    │        │reject    │expire
//!                               ▼        ▼          ▼
//!                        ┌───────────┐ Rejected  Expired
//!          ┌────────────►│ Confirmed │
//!          │             └─────┬─────┘
//!          │    request        │ mark_arrived
//!          │    reschedule     ▼
//!   ┌──────┴─────────┐   ┌─────────┐  start   ┌────────────┐ confirm ┌───────────┐
//!   │ RescheduleReq* │   │ Arrived │────────► │ InProgress │───────► │ Completed │
//!   └──────┬─────────┘   └─────────┘          └────────────┘ completion └─────────┘
//!          │ accept
//!          ▼
//!   RescheduleConfirmed (rejoins the Confirmed lane)
//! ```
//!
//! Cancellation (by either party) is legal from every non-terminal,
//! non-completed state. Rejected / Expired / Cancelled / Completed are
//! terminal. Any appointment in a non-terminal status blocks the provider's
//! calendar for its window.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Booking lifecycle status of an appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    /// Created by the client, waiting for the provider to confirm.
    PendingProviderConfirmation,
    /// Provider confirmed the visit.
    Confirmed,
    /// Client proposed a new window; provider must respond.
    RescheduleRequestedByClient,
    /// Provider proposed a new window; client must respond.
    RescheduleRequestedByProvider,
    /// A reschedule proposal was accepted; behaves like `Confirmed`.
    RescheduleConfirmed,
    /// Provider registered arrival on site.
    Arrived,
    /// Execution of the service started.
    InProgress,
    /// Client accepted the completion term.
    Completed,
    /// Provider rejected the pending appointment.
    RejectedByProvider,
    /// Pending confirmation deadline passed without provider action.
    ExpiredWithoutProviderAction,
    /// Cancelled by the client.
    CancelledByClient,
    /// Cancelled by the provider.
    CancelledByProvider,
}

impl AppointmentStatus {
    /// Whether this status ends the appointment lifecycle.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed
                | Self::RejectedByProvider
                | Self::ExpiredWithoutProviderAction
                | Self::CancelledByClient
                | Self::CancelledByProvider
        )
    }

    /// Whether an appointment in this status occupies the provider's
    /// calendar for conflict purposes.
    #[must_use]
    pub const fn blocks_calendar(self) -> bool {
        !self.is_terminal()
    }

    /// Whether the appointment is waiting on a reschedule response.
    #[must_use]
    pub const fn is_reschedule_pending(self) -> bool {
        matches!(
            self,
            Self::RescheduleRequestedByClient | Self::RescheduleRequestedByProvider
        )
    }

    /// Whether the visit has not started yet (presence responses are still
    /// meaningful).
    #[must_use]
    pub const fn is_pre_visit(self) -> bool {
        matches!(
            self,
            Self::PendingProviderConfirmation
                | Self::Confirmed
                | Self::RescheduleRequestedByClient
                | Self::RescheduleRequestedByProvider
                | Self::RescheduleConfirmed
        )
    }

    /// Whether the appointment can still be cancelled.
    #[must_use]
    pub const fn is_cancellable(self) -> bool {
        !self.is_terminal()
    }

    /// Stable storage / wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PendingProviderConfirmation => "pending_provider_confirmation",
            Self::Confirmed => "confirmed",
            Self::RescheduleRequestedByClient => "reschedule_requested_by_client",
            Self::RescheduleRequestedByProvider => "reschedule_requested_by_provider",
            Self::RescheduleConfirmed => "reschedule_confirmed",
            Self::Arrived => "arrived",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::RejectedByProvider => "rejected_by_provider",
            Self::ExpiredWithoutProviderAction => "expired_without_provider_action",
            Self::CancelledByClient => "cancelled_by_client",
            Self::CancelledByProvider => "cancelled_by_provider",
        }
    }

    /// Parse the storage representation back into a status.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "pending_provider_confirmation" => Self::PendingProviderConfirmation,
            "confirmed" => Self::Confirmed,
            "reschedule_requested_by_client" => Self::RescheduleRequestedByClient,
            "reschedule_requested_by_provider" => Self::RescheduleRequestedByProvider,
            "reschedule_confirmed" => Self::RescheduleConfirmed,
            "arrived" => Self::Arrived,
            "in_progress" => Self::InProgress,
            "completed" => Self::Completed,
            "rejected_by_provider" => Self::RejectedByProvider,
            "expired_without_provider_action" => Self::ExpiredWithoutProviderAction,
            "cancelled_by_client" => Self::CancelledByClient,
            "cancelled_by_provider" => Self::CancelledByProvider,
            _ => return None,
        })
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of the actor invoking an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    /// The client who owns the service request.
    Client,
    /// The provider assigned to the request.
    Provider,
    /// A platform operator.
    Admin,
    /// Batch jobs and internal machinery.
    System,
}

impl ActorRole {
    /// Stable storage / wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Provider => "provider",
            Self::Admin => "admin",
            Self::System => "system",
        }
    }

    /// Parse the storage representation back into a role.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "client" => Self::Client,
            "provider" => Self::Provider,
            "admin" => Self::Admin,
            "system" => Self::System,
            _ => return None,
        })
    }

    /// The negotiation counterparty of this role, where one exists.
    #[must_use]
    pub const fn counterparty(self) -> Option<Self> {
        match self {
            Self::Client => Some(Self::Provider),
            Self::Provider => Some(Self::Client),
            Self::Admin | Self::System => None,
        }
    }
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authenticated caller: identity plus role.
///
/// Authentication itself happens upstream; this crate only checks role and
/// ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    /// The caller's user id.
    pub user_id: uuid::Uuid,
    /// The caller's role.
    pub role: ActorRole,
}

impl Actor {
    /// Convenience constructor.
    #[must_use]
    pub const fn new(user_id: uuid::Uuid, role: ActorRole) -> Self {
        Self { user_id, role }
    }
}

/// In-visit operational status, orthogonal to the booking state machine.
///
/// The chain is strictly sequential, `OnTheWay → OnSite → InService`, with
/// `InService ⇄ WaitingParts` allowed in both directions. Updating it never
/// moves the booking status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationalStatus {
    /// Provider is travelling to the site.
    OnTheWay,
    /// Provider is on site.
    OnSite,
    /// Service work is underway.
    InService,
    /// Work paused waiting on parts; requires a reason.
    WaitingParts,
}

impl OperationalStatus {
    /// Whether `next` is a legal step from `current` (or from no status at
    /// all).
    #[must_use]
    pub fn step_allowed(current: Option<Self>, next: Self) -> bool {
        match (current, next) {
            (None, Self::OnTheWay) => true,
            (Some(Self::OnTheWay), Self::OnSite) => true,
            (Some(Self::OnSite), Self::InService) => true,
            (Some(Self::InService), Self::WaitingParts) => true,
            (Some(Self::WaitingParts), Self::InService) => true,
            _ => false,
        }
    }

    /// Whether this status requires a free-text reason on entry.
    #[must_use]
    pub const fn requires_reason(self) -> bool {
        matches!(self, Self::WaitingParts)
    }

    /// Stable storage / wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OnTheWay => "on_the_way",
            Self::OnSite => "on_site",
            Self::InService => "in_service",
            Self::WaitingParts => "waiting_parts",
        }
    }

    /// Parse the storage representation back into a status.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "on_the_way" => Self::OnTheWay,
            "on_site" => Self::OnSite,
            "in_service" => Self::InService,
            "waiting_parts" => Self::WaitingParts,
            _ => return None,
        })
    }
}

impl fmt::Display for OperationalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_do_not_block_the_calendar() {
        for status in [
            AppointmentStatus::Completed,
            AppointmentStatus::RejectedByProvider,
            AppointmentStatus::ExpiredWithoutProviderAction,
            AppointmentStatus::CancelledByClient,
            AppointmentStatus::CancelledByProvider,
        ] {
            assert!(status.is_terminal());
            assert!(!status.blocks_calendar());
            assert!(!status.is_cancellable());
        }
    }

    #[test]
    fn active_statuses_block_the_calendar() {
        for status in [
            AppointmentStatus::PendingProviderConfirmation,
            AppointmentStatus::Confirmed,
            AppointmentStatus::RescheduleRequestedByClient,
            AppointmentStatus::RescheduleRequestedByProvider,
            AppointmentStatus::RescheduleConfirmed,
            AppointmentStatus::Arrived,
            AppointmentStatus::InProgress,
        ] {
            assert!(!status.is_terminal());
            assert!(status.blocks_calendar());
        }
    }

    #[test]
    fn status_round_trips_through_storage_form() {
        for status in [
            AppointmentStatus::PendingProviderConfirmation,
            AppointmentStatus::Confirmed,
            AppointmentStatus::RescheduleRequestedByClient,
            AppointmentStatus::RescheduleRequestedByProvider,
            AppointmentStatus::RescheduleConfirmed,
            AppointmentStatus::Arrived,
            AppointmentStatus::InProgress,
            AppointmentStatus::Completed,
            AppointmentStatus::RejectedByProvider,
            AppointmentStatus::ExpiredWithoutProviderAction,
            AppointmentStatus::CancelledByClient,
            AppointmentStatus::CancelledByProvider,
        ] {
            assert_eq!(AppointmentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AppointmentStatus::parse("bogus"), None);
    }

    #[test]
    fn operational_chain_is_sequential() {
        use OperationalStatus::*;

        assert!(OperationalStatus::step_allowed(None, OnTheWay));
        assert!(OperationalStatus::step_allowed(Some(OnTheWay), OnSite));
        assert!(OperationalStatus::step_allowed(Some(OnSite), InService));
        assert!(OperationalStatus::step_allowed(Some(InService), WaitingParts));
        assert!(OperationalStatus::step_allowed(Some(WaitingParts), InService));

        // Skipping stages is refused.
        assert!(!OperationalStatus::step_allowed(None, InService));
        assert!(!OperationalStatus::step_allowed(None, OnSite));
        assert!(!OperationalStatus::step_allowed(Some(OnTheWay), InService));
        assert!(!OperationalStatus::step_allowed(Some(OnSite), WaitingParts));
        // Going backwards is refused.
        assert!(!OperationalStatus::step_allowed(Some(InService), OnSite));
    }

    #[test]
    fn waiting_parts_requires_a_reason() {
        assert!(OperationalStatus::WaitingParts.requires_reason());
        assert!(!OperationalStatus::InService.requires_reason());
    }

    #[test]
    fn counterparty_pairs() {
        assert_eq!(ActorRole::Client.counterparty(), Some(ActorRole::Provider));
        assert_eq!(ActorRole::Provider.counterparty(), Some(ActorRole::Client));
        assert_eq!(ActorRole::Admin.counterparty(), None);
    }
}
