//! Data models for risk triage and escalation
//!
//! This module contains all data structures used throughout the application,
//! including risk assessments, crisis responses, alerts, and job payloads.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TriageError;

/// Ordinal severity class for self-harm/suicide risk
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// No distress markers matched
    Low,
    /// Generic distress phrasing without self-harm language
    Medium,
    /// Self-harm phrasing without explicit suicidal intent
    High,
    /// Explicit suicidal intent
    Critical,
}

impl RiskLevel {
    /// Canonical lowercase name, as used in job payloads and storage
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Queue dispatch priority. Higher values pop first.
    #[must_use]
    pub const fn queue_priority(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }

    /// True for the levels that trigger the escalation path
    #[must_use]
    pub const fn escalates(self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = TriageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(TriageError::Validation(format!(
                "Unknown risk level: {other}"
            ))),
        }
    }
}

/// Deterministic risk estimate for one piece of entry text.
///
/// Ephemeral: recomputed per job and never persisted as the record of truth.
/// Invariant: `risk_level == Critical` implies `risk_score == 100`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Profile the text belongs to
    pub profile_id: String,
    /// The raw text that was assessed
    pub entry_text: String,
    /// Ordinal severity class
    pub risk_level: RiskLevel,
    /// Normalized 0-100 severity estimate
    pub risk_score: u8,
    /// Matched-category descriptors, one per matched phrase
    pub risk_factors: Vec<String>,
    /// Level-keyed action string for downstream display
    pub recommended_action: String,
    /// True only for critical assessments
    pub requires_immediate_intervention: bool,
    /// Whether phase progression should be blocked for this profile
    pub should_block_phase_progression: bool,
    /// Whether emergency contact info was surfaced by the classifier
    pub emergency_contacts_shown: bool,
}

/// Presentation decisions derived from a [`RiskAssessment`].
///
/// The planner never overrides the classifier's blocking decision;
/// `block_phase_progression` is copied verbatim from the assessment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrisisResponse {
    /// Show the crisis support message to the user
    pub show_crisis_message: bool,
    /// Show emergency contact information to the user
    pub show_emergency_contacts: bool,
    /// Block phase progression (copied from the assessment)
    pub block_phase_progression: bool,
    /// Priority carried onto the escalation alert
    pub alert_priority: RiskLevel,
    /// User-facing message for this level
    pub message: String,
}

/// A user self-report entry owned by this subsystem.
///
/// Mutated once by the analysis worker when the interpretive payload lands;
/// never deleted here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    /// Entry identifier
    pub id: String,
    /// Owning profile identifier
    pub profile_id: String,
    /// Raw self-report text
    pub text: String,
    /// When the entry was recorded
    pub created_at: DateTime<Utc>,
    /// Interpretive payload from the external analyzer, if it has run
    pub analysis: Option<serde_json::Value>,
    /// When the interpretive payload was attached
    pub analyzed_at: Option<DateTime<Utc>>,
}

/// Data for recording a new entry
#[derive(Debug, Clone)]
pub struct NewEntry {
    /// Entry identifier
    pub id: String,
    /// Owning profile identifier
    pub profile_id: String,
    /// Raw self-report text
    pub text: String,
}

/// Kind of escalation record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    /// Self-harm/suicide risk escalation
    Crisis,
    /// Sustained-resistance escalation
    HighResistance,
}

impl AlertType {
    /// Canonical storage name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Crisis => "crisis",
            Self::HighResistance => "high_resistance",
        }
    }
}

impl FromStr for AlertType {
    type Err = TriageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "crisis" => Ok(Self::Crisis),
            "high_resistance" => Ok(Self::HighResistance),
            other => Err(TriageError::Validation(format!(
                "Unknown alert type: {other}"
            ))),
        }
    }
}

/// A persisted escalation record requiring human follow-up.
///
/// Created once per (profile, entry, alert type); terminal when
/// `notified_at` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Database primary key
    pub id: i64,
    /// Owning profile identifier
    pub profile_id: String,
    /// Entry that triggered the escalation
    pub entry_id: String,
    /// Kind of escalation
    pub alert_type: AlertType,
    /// Dispatch priority, from the planner's `alert_priority`
    pub priority: RiskLevel,
    /// Operator-facing summary
    pub message: String,
    /// Risk score at escalation time
    pub risk_score: u8,
    /// Matched risk factors at escalation time
    pub risk_factors: Vec<String>,
    /// When the alert was first created
    pub created_at: DateTime<Utc>,
    /// When the outward notification succeeded, if it has
    pub notified_at: Option<DateTime<Utc>>,
}

/// Data for upserting an alert
#[derive(Debug, Clone)]
pub struct NewAlert {
    /// Owning profile identifier
    pub profile_id: String,
    /// Entry that triggered the escalation
    pub entry_id: String,
    /// Kind of escalation
    pub alert_type: AlertType,
    /// Dispatch priority
    pub priority: RiskLevel,
    /// Operator-facing summary
    pub message: String,
    /// Risk score at escalation time
    pub risk_score: u8,
    /// Matched risk factors at escalation time
    pub risk_factors: Vec<String>,
}

/// Contact data for a profile, used for notification dispatch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactInfo {
    /// Profile identifier
    pub profile_id: String,
    /// Display name
    pub name: String,
    /// Email address, if known
    pub email: Option<String>,
    /// Phone number, if known
    pub phone: Option<String>,
}

/// Per-entry analysis job payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisJob {
    /// Entry to analyze
    pub entry_id: String,
    /// Owning user/profile
    pub user_id: String,
    /// Raw entry text
    pub text: String,
    /// Token forwarded to the external analyzer
    pub access_token: String,
}

/// Escalation job payload carried on the crisis queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrisisJob {
    /// Owning user/profile
    pub user_id: String,
    /// Entry that triggered the escalation
    pub entry_id: String,
    /// Risk level at escalation time
    pub risk_level: RiskLevel,
    /// Risk score at escalation time
    pub risk_score: u8,
}
