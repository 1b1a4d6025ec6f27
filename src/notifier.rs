//! Notification dispatch port.
//!
//! Real email/SMS channels are external collaborators bound at startup; no
//! response contract beyond success/failure is assumed. Duplicate dispatch
//! protection lives at the alert store's `notified_at` boundary, not here.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::warn;

use crate::error::Result;
use crate::models::{Alert, ContactInfo};

/// Port for outward crisis notification
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Dispatch a notification for an alert.
    ///
    /// `contact` is the profile's resolved contact data, when known.
    async fn notify(&self, alert: &Alert, contact: &Option<ContactInfo>) -> Result<()>;
}

/// Notifier that writes to the operator log.
///
/// The default binding when no external channel is configured; a crisis
/// alert is never silently dropped, so at minimum it lands here.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: &Alert, contact: &Option<ContactInfo>) -> Result<()> {
        warn!(
            profile_id = %alert.profile_id,
            entry_id = %alert.entry_id,
            alert_type = alert.alert_type.as_str(),
            priority = alert.priority.as_str(),
            risk_score = alert.risk_score,
            contact_known = contact.is_some(),
            "CRISIS ALERT requires human follow-up: {}",
            alert.message
        );
        Ok(())
    }
}
