//! Deterministic risk classification.
//!
//! The classifier is a pure function from raw text to a [`RiskAssessment`]:
//! no I/O, no network, no database. Detection must keep working when every
//! other service is down.
//!
//! Scoring uses floor scores per phrase category rather than additive
//! weights, so one strong signal dominates and repeated weak signals cannot
//! inflate past a real critical marker. The final score is the maximum of
//! the matched floors.

use regex::Regex;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::error::{Result, TriageError};
use crate::models::{RiskAssessment, RiskLevel};

/// One category of the declarative rule table.
///
/// Phrases are stored pre-normalized (lowercase, no apostrophes, single
/// spaces) so they can be matched by substring against normalized input.
#[derive(Debug, Clone, Copy)]
pub struct PhraseRule {
    /// Category descriptor used in `risk_factors`
    pub category: &'static str,
    /// Level assigned when this category is the strongest match
    pub level: RiskLevel,
    /// Floor score this category forces
    pub floor: u8,
    /// Normalized trigger phrases
    pub phrases: &'static [&'static str],
}

/// Score assigned when no category matches. Must stay below 30 so that
/// excluded hyperbole and neutral text both land firmly in `low`.
const BASELINE_SCORE: u8 = 10;

/// Ordered strongest-first so the first matching category also names the
/// level of the final score.
const RULES: &[PhraseRule] = &[
    PhraseRule {
        category: "suicidal intent",
        level: RiskLevel::Critical,
        floor: 100,
        phrases: &[
            "kill myself",
            "killing myself",
            "end my life",
            "ending my life",
            "take my own life",
            "suicide",
            "suicidal",
            "want to die",
            "wish i was dead",
            "wish i were dead",
            "better off dead",
            "dont want to live",
            "no reason to live",
            "not worth living",
            "end it all",
        ],
    },
    PhraseRule {
        category: "self-harm",
        level: RiskLevel::High,
        floor: 70,
        phrases: &[
            "hurt myself",
            "hurting myself",
            "harm myself",
            "harming myself",
            "self harm",
            "cut myself",
            "cutting myself",
            "burn myself",
            "punish myself",
            "make myself bleed",
            "starve myself",
        ],
    },
    PhraseRule {
        category: "acute distress",
        level: RiskLevel::Medium,
        floor: 45,
        phrases: &[
            "hopeless",
            "no way out",
            "cant take it anymore",
            "cant go on",
            "cant do this anymore",
            "give up on everything",
            "giving up on everything",
            "nothing matters anymore",
            "no point anymore",
            "empty inside",
            "completely alone",
        ],
    },
];

/// Idiomatic hyperbole masked out of the text before category matching.
/// Literal substring matching alone is insufficient: "dying to see you" and
/// "die of embarrassment" must never read as intent.
const EXCLUSIONS: &[&str] = &[
    "dying to",
    "to die for",
    "die of embarrassment",
    "dying of laughter",
    "dying of embarrassment",
    "dead tired",
    "drop dead",
    "killing it",
    "killing me",
    "love you to death",
    "sick to death of",
    "crazy about you",
];

/// Pure, deterministic risk classifier over a declarative rule table
pub struct RiskClassifier {
    apostrophe_regex: Regex,
    special_chars_regex: Regex,
    extra_spaces_regex: Regex,
}

impl RiskClassifier {
    /// Create a classifier. Fails only if a normalization regex does not
    /// compile, which a unit test pins down; assessment itself cannot fail.
    pub fn new() -> Result<Self> {
        let apostrophe_regex = Regex::new(r"['\u{2019}`]")
            .map_err(|e| TriageError::Other(format!("Failed to compile apostrophe regex: {e}")))?;
        let special_chars_regex = Regex::new(r"[^a-z0-9\s]")
            .map_err(|e| TriageError::Other(format!("Failed to compile special chars regex: {e}")))?;
        let extra_spaces_regex = Regex::new(r"\s+")
            .map_err(|e| TriageError::Other(format!("Failed to compile spaces regex: {e}")))?;

        Ok(Self {
            apostrophe_regex,
            special_chars_regex,
            extra_spaces_regex,
        })
    }

    /// Assess the risk conveyed by `text` for `profile_id`.
    ///
    /// Synchronous and side-effect free. Identical text always yields an
    /// identical assessment.
    #[must_use]
    pub fn assess_risk(&self, profile_id: &str, text: &str) -> RiskAssessment {
        let normalized = self.normalize(text);
        let masked = mask_exclusions(&normalized);

        let mut risk_factors = Vec::new();
        let mut score = BASELINE_SCORE;
        let mut level = RiskLevel::Low;

        for rule in RULES {
            let mut matched = false;
            for phrase in rule.phrases {
                if masked.contains(phrase) {
                    matched = true;
                    risk_factors.push(format!("{}: \"{}\"", rule.category, phrase));
                }
            }
            // Floor semantics: take the strongest matched category, never sum.
            if matched && rule.floor > score {
                score = rule.floor;
                level = rule.level;
            }
        }

        let critical = level == RiskLevel::Critical;
        if critical {
            score = 100;
        }

        RiskAssessment {
            profile_id: profile_id.to_string(),
            entry_text: text.to_string(),
            risk_level: level,
            risk_score: score,
            risk_factors,
            recommended_action: recommended_action(level).to_string(),
            requires_immediate_intervention: critical,
            should_block_phase_progression: level >= RiskLevel::High,
            emergency_contacts_shown: critical,
        }
    }

    /// Normalize text for phrase matching: strip diacritics, lowercase,
    /// drop apostrophes, replace other punctuation with spaces, collapse
    /// whitespace.
    #[must_use]
    pub fn normalize(&self, text: &str) -> String {
        let stripped: String = text.nfd().filter(|c| !is_combining_mark(*c)).collect();
        let lowered = stripped.to_lowercase();
        let no_apostrophes = self.apostrophe_regex.replace_all(&lowered, "");
        let no_special = self.special_chars_regex.replace_all(&no_apostrophes, " ");
        self.extra_spaces_regex
            .replace_all(&no_special, " ")
            .trim()
            .to_string()
    }
}

/// Replace colloquial-exclusion phrases with a space so that the trigger
/// phrases they overlap can no longer match.
fn mask_exclusions(normalized: &str) -> String {
    let mut masked = normalized.to_string();
    for exclusion in EXCLUSIONS {
        while let Some(pos) = masked.find(exclusion) {
            masked.replace_range(pos..pos + exclusion.len(), " ");
        }
    }
    masked
}

/// Level-keyed action string for downstream display
const fn recommended_action(level: RiskLevel) -> &'static str {
    match level {
        RiskLevel::Critical => {
            "Immediate intervention required. Surface crisis resources and emergency contacts now."
        }
        RiskLevel::High => {
            "Escalate for human follow-up within 24 hours and show crisis support resources."
        }
        RiskLevel::Medium => "Monitor closely and offer a supportive check-in.",
        RiskLevel::Low => "No action required.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> RiskClassifier {
        RiskClassifier::new().expect("Failed to create classifier")
    }

    #[test]
    fn test_normalize() {
        let c = classifier();

        assert_eq!(c.normalize("  I   CAN'T   go on!  "), "i cant go on");
        // Diacritics are stripped so accented text still matches
        assert_eq!(c.normalize("suicídio"), "suicidio");
        // Curly apostrophes collapse like straight ones
        assert_eq!(c.normalize("can\u{2019}t"), "cant");
    }

    #[test]
    fn test_explicit_intent_is_critical_100() {
        let c = classifier();
        let a = c.assess_risk("p1", "I want to kill myself, I can't go on");

        assert_eq!(a.risk_level, RiskLevel::Critical);
        assert_eq!(a.risk_score, 100);
        assert!(a.requires_immediate_intervention);
        assert!(a.should_block_phase_progression);
        assert!(a.emergency_contacts_shown);
        assert!(a
            .risk_factors
            .iter()
            .any(|f| f.contains("suicidal intent")));
    }

    #[test]
    fn test_self_harm_without_intent_is_high() {
        let c = classifier();
        let a = c.assess_risk("p1", "Sometimes I cut myself to feel something");

        assert_eq!(a.risk_level, RiskLevel::High);
        assert!(a.risk_score >= 70);
        assert!(!a.requires_immediate_intervention);
        assert!(a.should_block_phase_progression);
    }

    #[test]
    fn test_distress_is_medium() {
        let c = classifier();
        let a = c.assess_risk("p1", "Everything feels hopeless lately");

        assert_eq!(a.risk_level, RiskLevel::Medium);
        assert!(a.risk_score >= 40 && a.risk_score < 70);
        assert!(!a.should_block_phase_progression);
    }

    #[test]
    fn test_neutral_text_is_low() {
        let c = classifier();
        let a = c.assess_risk("p1", "I feel a little sad today but I'm okay");

        assert_eq!(a.risk_level, RiskLevel::Low);
        assert!(a.risk_score < 40);
        assert!(a.risk_factors.is_empty());
    }

    #[test]
    fn test_hyperbole_is_excluded() {
        let c = classifier();

        for text in [
            "I'm absolutely crazy about you",
            "I'm dying to see you this weekend",
            "That cake is to die for",
            "I could die of embarrassment",
            "I want to die of embarrassment every time I see that photo",
        ] {
            let a = c.assess_risk("p1", text);
            assert_eq!(a.risk_level, RiskLevel::Low, "text: {text}");
            assert!(a.risk_score < 30, "text: {text}");
        }
    }

    #[test]
    fn test_exclusion_does_not_mask_real_signal() {
        let c = classifier();
        let a = c.assess_risk("p1", "I'm dying to disappear, I want to kill myself");

        assert_eq!(a.risk_level, RiskLevel::Critical);
        assert_eq!(a.risk_score, 100);
    }

    #[test]
    fn test_floors_do_not_sum() {
        let c = classifier();
        // Two medium signals and one high signal: score stays at the high floor.
        let a = c.assess_risk("p1", "hopeless, no way out, I keep hurting myself");

        assert_eq!(a.risk_level, RiskLevel::High);
        assert_eq!(a.risk_score, 70);
        assert!(a.risk_factors.len() >= 3);
    }

    #[test]
    fn test_assessment_is_deterministic() {
        let c = classifier();
        let text = "I feel empty inside and hopeless";
        assert_eq!(c.assess_risk("p1", text), c.assess_risk("p1", text));
    }
}
