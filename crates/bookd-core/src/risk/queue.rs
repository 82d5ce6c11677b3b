//! No-show triage queue item and read-side filters.
//!
//! Queue items are a derived view over appointments the scorer flags at
//! Medium or High. One open item per appointment, upserted idempotently by
//! the scorer (find-open-else-insert inside the scorer's transaction) and
//! resolved either by an operator or implicitly when the appointment reaches
//! a terminal state, never by mere score decay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::RiskLevel;

/// Triage lifecycle of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Detected, nobody working on it.
    Open,
    /// Claimed by an operator.
    InProgress,
    /// Closed, by an operator or by a terminal appointment transition.
    Resolved,
}

impl QueueStatus {
    /// Whether the item still counts as active for dedup purposes.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Open | Self::InProgress)
    }

    /// Stable storage / wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
        }
    }

    /// Parse the storage representation back into a status.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "open" => Self::Open,
            "in_progress" => Self::InProgress,
            "resolved" => Self::Resolved,
            _ => return None,
        })
    }
}

/// One entry in the no-show triage worklist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoShowQueueItem {
    /// Queue item id.
    pub id: Uuid,
    /// The flagged appointment.
    pub appointment_id: Uuid,
    /// Risk level at last detection.
    pub risk_level: RiskLevel,
    /// Score at last detection.
    pub score: u8,
    /// Comma-separated reason codes at last detection.
    pub reasons_csv: String,
    /// Triage status.
    pub status: QueueStatus,
    /// City snapshot from the request directory, for filtering.
    pub city: Option<String>,
    /// Service category snapshot, for filtering.
    pub category: Option<String>,
    /// First time the scorer flagged this appointment.
    pub first_detected_at_utc: DateTime<Utc>,
    /// Most recent re-detection.
    pub last_detected_at_utc: DateTime<Utc>,
    /// When the item was resolved.
    pub resolved_at_utc: Option<DateTime<Utc>>,
    /// Operator who resolved it, when operator-resolved.
    pub resolved_by: Option<Uuid>,
    /// Free-text resolution note.
    pub resolution_note: Option<String>,
}

/// Read-side filter for [`crate::store::Store::list_queue_items`].
///
/// All fields are conjunctive; `None` means "don't filter".
#[derive(Debug, Clone, Default)]
pub struct QueueFilter {
    /// Filter by triage status.
    pub status: Option<QueueStatus>,
    /// Filter by risk level.
    pub risk_level: Option<RiskLevel>,
    /// Filter by snapshotted city (exact match).
    pub city: Option<String>,
    /// Filter by snapshotted category (exact match).
    pub category: Option<String>,
    /// Page size; defaults to 50, capped at 200.
    pub limit: Option<u32>,
    /// Page offset.
    pub offset: Option<u32>,
}

impl QueueFilter {
    /// Effective page size after defaulting and capping.
    #[must_use]
    pub fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or(50).min(200)
    }

    /// Effective page offset.
    #[must_use]
    pub fn effective_offset(&self) -> u32 {
        self.offset.unwrap_or(0)
    }
}

/// One page of queue items plus the total match count.
#[derive(Debug, Clone)]
pub struct QueuePage {
    /// Items in `last_detected_at_utc` descending order.
    pub items: Vec<NoShowQueueItem>,
    /// Total rows matching the filter, ignoring pagination.
    pub total: u64,
}
