//! The appointment aggregate: entity, state machine, permissions, and the
//! service that drives every operation.
//!
//! # Booking lifecycle
//!
//! | From | Operation | To |
//! |------|-----------|----|
//! | — | `create` | `PendingProviderConfirmation` |
//! | `PendingProviderConfirmation` | `confirm` | `Confirmed` |
//! | `PendingProviderConfirmation` | `reject` | `RejectedByProvider` |
//! | `PendingProviderConfirmation` | `expire_pending` | `ExpiredWithoutProviderAction` |
//! | `Confirmed` / `RescheduleConfirmed` | `request_reschedule` | `RescheduleRequestedBy*` |
//! | `RescheduleRequestedBy*` | `respond_reschedule(accept)` | `RescheduleConfirmed` |
//! | `RescheduleRequestedBy*` | `respond_reschedule(reject)` | pre-negotiation status |
//! | `Confirmed` / `RescheduleConfirmed` | `mark_arrived` | `Arrived` |
//! | `Arrived` | `start_execution` | `InProgress` |
//! | `InProgress` | `confirm_completion` | `Completed` |
//! | any non-terminal | `cancel` | `CancelledBy*` |
//!
//! Any other `(state, operation)` pair fails with `invalid_state`; a role
//! without a grant in the permission table fails with `forbidden` before
//! any of this runs.

pub mod entity;
pub mod permissions;
pub mod service;
pub mod state;


pub use entity::{Appointment, AppointmentHistory, HistoryMetadata, LedgerOutcome, RiskSnapshot};
pub use permissions::Operation;
pub use service::{
    AcceptanceInput, AppointmentService, ArrivalInput, CreateAppointmentRequest, IssuedPin,
    NewException, NewRule, SlotQuery,
};
pub use state::{Actor, ActorRole, AppointmentStatus, OperationalStatus};
