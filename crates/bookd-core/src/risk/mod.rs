//! No-show risk scoring.
//!
//! The scorer is a pure function from declared inputs to an assessment:
//! presence-confirmation flags, time to the window, and recent
//! cancellation/no-show history for both parties. Every contributing signal
//! adds a fixed delta from the active [`RiskPolicy`] and emits a reason code
//! from a fixed vocabulary; the final score is clamped to `[0, 100]` and
//! bucketed into a [`RiskLevel`].
//!
//! All weights and thresholds are configuration data, never literals here.

mod queue;


pub use queue::{NoShowQueueItem, QueueFilter, QueuePage, QueueStatus};

use serde::{Deserialize, Serialize};

/// Discrete risk band derived from the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Below the medium threshold.
    Low,
    /// At or above the medium threshold, below the high threshold.
    Medium,
    /// At or above the high threshold.
    High,
}

impl RiskLevel {
    /// Whether this level feeds the operational triage queue.
    #[must_use]
    pub const fn is_actionable(self) -> bool {
        matches!(self, Self::Medium | Self::High)
    }

    /// Stable storage / wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Parse the storage representation back into a level.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "low" => Self::Low,
            "medium" => Self::Medium,
            "high" => Self::High,
            _ => return None,
        })
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed vocabulary of scoring reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskReason {
    /// The client has not confirmed presence.
    ClientPresenceNotConfirmed,
    /// The provider has not confirmed presence.
    ProviderPresenceNotConfirmed,
    /// Neither party has confirmed presence (bonus on top of the two
    /// individual signals).
    BothPresenceNotConfirmed,
    /// Window starts within 24 hours.
    WindowWithin24h,
    /// Window starts within 6 hours.
    WindowWithin6h,
    /// Window starts within 2 hours.
    WindowWithin2h,
    /// The client accumulated recent cancellations/no-shows.
    ClientHistoryRisk,
    /// The provider accumulated recent cancellations/expiries.
    ProviderHistoryRisk,
}

impl RiskReason {
    /// Stable reason code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClientPresenceNotConfirmed => "client_presence_not_confirmed",
            Self::ProviderPresenceNotConfirmed => "provider_presence_not_confirmed",
            Self::BothPresenceNotConfirmed => "both_presence_not_confirmed",
            Self::WindowWithin24h => "window_within_24h",
            Self::WindowWithin6h => "window_within_6h",
            Self::WindowWithin2h => "window_within_2h",
            Self::ClientHistoryRisk => "client_history_risk",
            Self::ProviderHistoryRisk => "provider_history_risk",
        }
    }
}

/// Scoring weights, history thresholds, and level bands.
///
/// Defaults mirror the platform's active operational policy; deployments
/// tune them via configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskPolicy {
    /// Delta when the client has not confirmed presence.
    pub weight_client_not_confirmed: u8,
    /// Delta when the provider has not confirmed presence.
    pub weight_provider_not_confirmed: u8,
    /// Additional delta when neither party confirmed.
    pub weight_both_not_confirmed_bonus: u8,
    /// Delta when the window starts within 24 hours.
    pub weight_window_within_24h: u8,
    /// Delta when the window starts within 6 hours.
    pub weight_window_within_6h: u8,
    /// Delta when the window starts within 2 hours.
    pub weight_window_within_2h: u8,
    /// Delta when the client's history crosses its threshold.
    pub weight_client_history: u8,
    /// Delta when the provider's history crosses its threshold.
    pub weight_provider_history: u8,
    /// Risk events needed before client history counts.
    pub min_client_history_events: u32,
    /// Risk events needed before provider history counts.
    pub min_provider_history_events: u32,
    /// How far back history events are counted, in days.
    pub lookback_days: u32,
    /// Scores at or above this are Medium.
    pub medium_threshold: u8,
    /// Scores at or above this are High.
    pub high_threshold: u8,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            weight_client_not_confirmed: 25,
            weight_provider_not_confirmed: 25,
            weight_both_not_confirmed_bonus: 10,
            weight_window_within_24h: 10,
            weight_window_within_6h: 15,
            weight_window_within_2h: 20,
            weight_client_history: 10,
            weight_provider_history: 10,
            min_client_history_events: 2,
            min_provider_history_events: 2,
            lookback_days: 90,
            medium_threshold: 40,
            high_threshold: 70,
        }
    }
}

/// Declared inputs of one scorer run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskInputs {
    /// Whether the client confirmed presence.
    pub client_presence_confirmed: bool,
    /// Whether the provider confirmed presence.
    pub provider_presence_confirmed: bool,
    /// Minutes until the window starts (negative once it has started).
    pub minutes_to_window: i64,
    /// Client risk events inside the lookback window.
    pub client_history_events: u32,
    /// Provider risk events inside the lookback window.
    pub provider_history_events: u32,
}

/// Output of one scorer run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskAssessment {
    /// Clamped score in `[0, 100]`.
    pub score: u8,
    /// Level derived from the score bands.
    pub level: RiskLevel,
    /// Contributing reasons, in evaluation order.
    pub reasons: Vec<RiskReason>,
}

impl RiskAssessment {
    /// Comma-separated reason codes, as persisted.
    #[must_use]
    pub fn reasons_csv(&self) -> String {
        self.reasons
            .iter()
            .map(|r| r.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Score one appointment. Deterministic: same inputs and policy always
/// produce the same assessment, independent of call order.
#[must_use]
pub fn assess(inputs: &RiskInputs, policy: &RiskPolicy) -> RiskAssessment {
    let mut score: u32 = 0;
    let mut reasons = Vec::new();

    if !inputs.client_presence_confirmed {
        score += u32::from(policy.weight_client_not_confirmed);
        reasons.push(RiskReason::ClientPresenceNotConfirmed);
    }
    if !inputs.provider_presence_confirmed {
        score += u32::from(policy.weight_provider_not_confirmed);
        reasons.push(RiskReason::ProviderPresenceNotConfirmed);
    }
    if !inputs.client_presence_confirmed && !inputs.provider_presence_confirmed {
        score += u32::from(policy.weight_both_not_confirmed_bonus);
        reasons.push(RiskReason::BothPresenceNotConfirmed);
    }

    // The tightest matching proximity band wins; bands are not cumulative.
    let minutes = inputs.minutes_to_window;
    if minutes <= 2 * 60 {
        score += u32::from(policy.weight_window_within_2h);
        reasons.push(RiskReason::WindowWithin2h);
    } else if minutes <= 6 * 60 {
        score += u32::from(policy.weight_window_within_6h);
        reasons.push(RiskReason::WindowWithin6h);
    } else if minutes <= 24 * 60 {
        score += u32::from(policy.weight_window_within_24h);
        reasons.push(RiskReason::WindowWithin24h);
    }

    if inputs.client_history_events >= policy.min_client_history_events {
        score += u32::from(policy.weight_client_history);
        reasons.push(RiskReason::ClientHistoryRisk);
    }
    if inputs.provider_history_events >= policy.min_provider_history_events {
        score += u32::from(policy.weight_provider_history);
        reasons.push(RiskReason::ProviderHistoryRisk);
    }

    let score = score.min(100) as u8;
    let level = if score >= policy.high_threshold {
        RiskLevel::High
    } else if score >= policy.medium_threshold {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    RiskAssessment { score, level, reasons }
}
