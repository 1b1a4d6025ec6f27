//! Job payload validation and input sanitization.
//!
//! A payload that fails here is fatally malformed: the worker buries it
//! without retrying, per the error taxonomy in [`crate::error`].

use crate::error::{Result, TriageError};
use crate::models::{AnalysisJob, CrisisJob};

/// Maximum accepted entry text length, in characters
pub const MAX_TEXT_LENGTH: usize = 10_000;

/// Maximum accepted identifier length
const MAX_ID_LENGTH: usize = 128;

/// Validation utilities for job payloads
#[derive(Debug, Copy, Clone)]
pub struct JobValidator;

impl JobValidator {
    /// Validate an analysis job payload
    pub fn validate_analysis_job(job: &AnalysisJob) -> Result<()> {
        Self::validate_id("entryId", &job.entry_id)?;
        Self::validate_id("userId", &job.user_id)?;

        if job.text.trim().is_empty() {
            return Err(TriageError::Validation(
                "Entry text cannot be empty".into(),
            ));
        }

        if job.text.chars().count() > MAX_TEXT_LENGTH {
            return Err(TriageError::Validation(format!(
                "Entry text too long (max {MAX_TEXT_LENGTH} characters)"
            )));
        }

        if job.access_token.trim().is_empty() {
            return Err(TriageError::Validation(
                "Access token cannot be empty".into(),
            ));
        }

        Ok(())
    }

    /// Validate a crisis job payload
    pub fn validate_crisis_job(job: &CrisisJob) -> Result<()> {
        Self::validate_id("userId", &job.user_id)?;
        Self::validate_id("entryId", &job.entry_id)?;

        if job.risk_score > 100 {
            return Err(TriageError::Validation(format!(
                "Risk score out of range: {}",
                job.risk_score
            )));
        }

        Ok(())
    }

    /// Validate an identifier field
    pub fn validate_id(field: &str, value: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(TriageError::Validation(format!("{field} cannot be empty")));
        }

        if value.len() > MAX_ID_LENGTH {
            return Err(TriageError::Validation(format!(
                "{field} too long (max {MAX_ID_LENGTH} characters)"
            )));
        }

        if value.contains('\0') || value.contains('\r') || value.contains('\n') {
            return Err(TriageError::Validation(format!(
                "{field} contains invalid characters"
            )));
        }

        Ok(())
    }

    /// Sanitize free text: drop control characters except common whitespace
    #[must_use]
    pub fn sanitize_text(text: &str) -> String {
        text.chars()
            .filter(|c| !c.is_control() || *c == '\n' || *c == '\t' || *c == '\r')
            .collect::<String>()
            .trim()
            .to_string()
    }
}
