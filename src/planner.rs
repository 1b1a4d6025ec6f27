//! Crisis response planning.
//!
//! Pure mapping from a [`RiskAssessment`] to the presentation decisions in a
//! [`CrisisResponse`]. The planner only adds presentation semantics; the
//! single source of truth for blocking lives in the classifier, so
//! `block_phase_progression` is copied verbatim from the assessment.

use crate::models::{CrisisResponse, RiskAssessment, RiskLevel};

/// Derive the crisis response for an assessment.
#[must_use]
pub fn generate_crisis_response(assessment: &RiskAssessment) -> CrisisResponse {
    let (show_crisis_message, show_emergency_contacts) = match assessment.risk_level {
        RiskLevel::Critical => (true, true),
        // High shows contacts only when the classifier explicitly surfaced them.
        RiskLevel::High => (true, assessment.emergency_contacts_shown),
        RiskLevel::Medium | RiskLevel::Low => (false, false),
    };

    CrisisResponse {
        show_crisis_message,
        show_emergency_contacts,
        block_phase_progression: assessment.should_block_phase_progression,
        alert_priority: assessment.risk_level,
        message: level_message(assessment.risk_level).to_string(),
    }
}

const fn level_message(level: RiskLevel) -> &'static str {
    match level {
        RiskLevel::Critical => {
            "You matter, and help is available right now. Please reach out to a crisis line \
             or someone you trust before continuing."
        }
        RiskLevel::High => {
            "It sounds like you are carrying something heavy. Support resources are \
             available whenever you are ready."
        }
        RiskLevel::Medium => "Thank you for sharing. Be gentle with yourself today.",
        RiskLevel::Low => "Thank you for sharing.",
    }
}
