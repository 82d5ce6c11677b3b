//! Ports to the out-of-scope collaborators.
//!
//! Matching/proposals, notification delivery, and the provider credit
//! wallet live in other systems. The service talks to them through these
//! traits; tests and the CLI inject recording / no-op / fixture-backed
//! implementations.

use std::collections::HashMap;
use std::sync::Mutex;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Marketplace view of a service request, as far as booking cares.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSnapshot {
    /// Request id.
    pub id: Uuid,
    /// Client who owns the request.
    pub client_id: Uuid,
    /// Providers holding an accepted, non-invalidated proposal.
    pub accepted_provider_ids: Vec<Uuid>,
    /// Agreed commercial value, when negotiated.
    pub agreed_value: Option<Decimal>,
    /// City of the visit, for triage filtering.
    pub city: Option<String>,
    /// Service category, for triage filtering.
    pub category: Option<String>,
}

impl RequestSnapshot {
    /// Whether the provider holds an accepted proposal on this request.
    #[must_use]
    pub fn provider_accepted(&self, provider_id: Uuid) -> bool {
        self.accepted_provider_ids.contains(&provider_id)
    }
}

/// Read-only access to the marketplace's requests and providers.
pub trait RequestDirectory: Send + Sync {
    /// Resolve a request id, or `None` when unknown.
    fn find_request(&self, request_id: Uuid) -> Option<RequestSnapshot>;

    /// Whether the provider exists and is active on the platform.
    fn provider_exists(&self, provider_id: Uuid) -> bool;
}

/// Direction of a credit-wallet posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryType {
    /// Credit granted to the provider.
    Grant,
    /// Debit charged against the provider.
    Debit,
}

impl LedgerEntryType {
    /// Stable wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Grant => "grant",
            Self::Debit => "debit",
        }
    }
}

/// Failure from the external credit wallet.
#[derive(Debug, Error)]
#[error("credit wallet rejected the posting: {detail}")]
pub struct WalletError {
    /// Collaborator-supplied failure detail.
    pub detail: String,
}

/// External provider credit ledger.
pub trait CreditWallet: Send + Sync {
    /// Post one entry. Idempotency and settlement are the wallet's problem;
    /// the caller records success or failure and moves on.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError`] when the collaborator rejects the posting.
    fn append(
        &self,
        provider_id: Uuid,
        entry_type: LedgerEntryType,
        amount: Decimal,
        reason: &str,
    ) -> Result<(), WalletError>;
}

/// Notification delivery. Implementations must not block for long and must
/// not panic; the service ignores delivery failures.
pub trait Notifier: Send + Sync {
    /// Fire one notification at a user.
    fn notify(&self, recipient_id: Uuid, subject: &str, message: &str, action_url: &str);
}

/// Directory backed by an in-memory map; used by tests and by the CLI's
/// fixture loader. Registration takes `&self` so fixtures can be added
/// after the directory is shared.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    requests: Mutex<HashMap<Uuid, RequestSnapshot>>,
    providers: Mutex<Vec<Uuid>>,
}

impl StaticDirectory {
    /// Empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider id as existing.
    pub fn add_provider(&self, provider_id: Uuid) {
        let mut providers = self.providers.lock().expect("directory mutex poisoned");
        if !providers.contains(&provider_id) {
            providers.push(provider_id);
        }
    }

    /// Register a request snapshot.
    pub fn add_request(&self, snapshot: RequestSnapshot) {
        for provider in &snapshot.accepted_provider_ids {
            self.add_provider(*provider);
        }
        self.requests
            .lock()
            .expect("directory mutex poisoned")
            .insert(snapshot.id, snapshot);
    }
}

impl RequestDirectory for StaticDirectory {
    fn find_request(&self, request_id: Uuid) -> Option<RequestSnapshot> {
        self.requests
            .lock()
            .expect("directory mutex poisoned")
            .get(&request_id)
            .cloned()
    }

    fn provider_exists(&self, provider_id: Uuid) -> bool {
        self.providers
            .lock()
            .expect("directory mutex poisoned")
            .contains(&provider_id)
    }
}

/// Wallet that records postings in memory; used by tests and the CLI's dry
/// mode.
#[derive(Debug, Default)]
pub struct RecordingWallet {
    entries: Mutex<Vec<(Uuid, LedgerEntryType, Decimal, String)>>,
}

impl RecordingWallet {
    /// Empty wallet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything posted so far.
    #[must_use]
    pub fn entries(&self) -> Vec<(Uuid, LedgerEntryType, Decimal, String)> {
        self.entries.lock().expect("wallet mutex poisoned").clone()
    }
}

impl CreditWallet for RecordingWallet {
    fn append(
        &self,
        provider_id: Uuid,
        entry_type: LedgerEntryType,
        amount: Decimal,
        reason: &str,
    ) -> Result<(), WalletError> {
        self.entries
            .lock()
            .expect("wallet mutex poisoned")
            .push((provider_id, entry_type, amount, reason.to_owned()));
        Ok(())
    }
}

/// Notifier that drops everything on the floor.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _recipient_id: Uuid, _subject: &str, _message: &str, _action_url: &str) {}
}

/// Notifier that records notifications in memory, for assertions.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(Uuid, String, String)>>,
}

impl RecordingNotifier {
    /// Empty notifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `(recipient, subject, message)` triples sent so far.
    #[must_use]
    pub fn sent(&self) -> Vec<(Uuid, String, String)> {
        self.sent.lock().expect("notifier mutex poisoned").clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, recipient_id: Uuid, subject: &str, message: &str, _action_url: &str) {
        self.sent
            .lock()
            .expect("notifier mutex poisoned")
            .push((recipient_id, subject.to_owned(), message.to_owned()));
    }
}
