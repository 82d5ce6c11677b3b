//! bookd-core: coordination of scheduled in-person service visits.
//!
//! This crate owns the full appointment workflow between a client and a
//! service provider:
//!
//! - **Availability**: recurring weekly rules plus one-off exceptions,
//!   resolved into bookable slots ([`availability`]).
//! - **Booking state machine**: creation, provider confirmation, reschedule
//!   negotiation, arrival and execution tracking, cancellation, expiry
//!   ([`appointment`]).
//! - **No-show risk**: a deterministic scorer feeding an operational triage
//!   queue ([`risk`]).
//! - **Completion confirmation**: PIN- or signature-based client acceptance
//!   with a contest path ([`completion`]).
//! - **Financial policy**: table-driven penalty/compensation splits posted
//!   to an external credit wallet ([`financial`]).
//!
//! Persistence is SQLite ([`store`]); tunables are TOML configuration
//! ([`config`]); the marketplace, wallet, and notification systems are
//! reached through ports ([`external`]).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use bookd_core::appointment::AppointmentService;
//! use bookd_core::config::BookdConfig;
//! use bookd_core::external::{NullNotifier, RecordingWallet, StaticDirectory};
//! use bookd_core::store::Store;
//!
//! let store = Store::open("bookd.db").expect("open store");
//! let service = AppointmentService::new(
//!     store,
//!     BookdConfig::default(),
//!     Arc::new(StaticDirectory::new()),
//!     Arc::new(RecordingWallet::new()),
//!     Arc::new(NullNotifier),
//! )
//! .expect("service");
//! ```

pub mod appointment;
pub mod availability;
pub mod completion;
pub mod config;
pub mod error;
pub mod external;
pub mod financial;
pub mod risk;
pub mod store;

pub use appointment::{Actor, ActorRole, Appointment, AppointmentService, AppointmentStatus};
pub use error::{BookingError, ErrorKind};
