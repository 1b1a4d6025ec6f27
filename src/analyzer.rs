//! External text-interpretation port.
//!
//! The interpretive payload is display glue produced by an external
//! collaborator; the risk classifier deliberately does not depend on it.
//! Failures here are transient and drive the retry policy.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::error::Result;

/// Port for the external text-interpretation service
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TextAnalyzer: Send + Sync {
    /// Produce interpretive content for a piece of entry text.
    ///
    /// `access_token` authenticates the calling user with the external
    /// service.
    async fn interpret(&self, text: &str, access_token: &str) -> Result<serde_json::Value>;
}

/// Analyzer used when the external service is disabled.
///
/// Returns an empty payload so entries simply lack interpretive commentary,
/// which must never suppress risk detection.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAnalyzer;

#[async_trait]
impl TextAnalyzer for NoopAnalyzer {
    async fn interpret(&self, _text: &str, _access_token: &str) -> Result<serde_json::Value> {
        Ok(serde_json::json!({ "interpretation": null }))
    }
}
