//! Repository ports for entry and alert storage.
//!
//! Workers depend only on these narrow traits; the sqlite implementations
//! delegate to [`Database`] on the blocking thread pool. Tests substitute
//! mocks or in-memory databases.

use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::db::Database;
use crate::error::{Result, TriageError};
use crate::models::{Alert, AlertType, ContactInfo, Entry, NewAlert, NewEntry};

/// Storage port for entries and profile contact data
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EntryRepository: Send + Sync {
    /// Record a new entry (idempotent on entry id)
    async fn record_entry(&self, entry: NewEntry) -> Result<Entry>;

    /// Persist the interpretive payload onto an entry
    async fn attach_analysis(&self, entry_id: &str, analysis: serde_json::Value) -> Result<()>;

    /// Resolve contact data for a profile
    async fn contact_for(&self, profile_id: &str) -> Result<Option<ContactInfo>>;
}

/// Storage port for escalation alerts
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AlertRepository: Send + Sync {
    /// Idempotent upsert keyed by (profile_id, entry_id, alert_type)
    async fn upsert(&self, alert: NewAlert) -> Result<Alert>;

    /// Look up an alert by its upsert key
    async fn find(
        &self,
        profile_id: &str,
        entry_id: &str,
        alert_type: AlertType,
    ) -> Result<Option<Alert>>;

    /// Conditionally mark an alert notified; true only for the first caller
    async fn mark_notified(
        &self,
        profile_id: &str,
        entry_id: &str,
        alert_type: AlertType,
    ) -> Result<bool>;
}

/// Sqlite-backed entry repository
pub struct SqliteEntryRepository {
    db: Arc<Database>,
}

impl SqliteEntryRepository {
    /// Wrap a shared database handle
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl EntryRepository for SqliteEntryRepository {
    async fn record_entry(&self, entry: NewEntry) -> Result<Entry> {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || db.insert_entry(entry))
            .await
            .map_err(|e| TriageError::Other(format!("Blocking task failed: {e}")))?
    }

    async fn attach_analysis(&self, entry_id: &str, analysis: serde_json::Value) -> Result<()> {
        let db = Arc::clone(&self.db);
        let entry_id = entry_id.to_string();

        let updated = tokio::task::spawn_blocking(move || db.attach_analysis(&entry_id, &analysis))
            .await
            .map_err(|e| TriageError::Other(format!("Blocking task failed: {e}")))??;

        if updated {
            Ok(())
        } else {
            // Transient by taxonomy: the entry may not have landed yet.
            Err(TriageError::Other("Entry not found for analysis".into()))
        }
    }

    async fn contact_for(&self, profile_id: &str) -> Result<Option<ContactInfo>> {
        let db = Arc::clone(&self.db);
        let profile_id = profile_id.to_string();

        tokio::task::spawn_blocking(move || db.get_contact(&profile_id))
            .await
            .map_err(|e| TriageError::Other(format!("Blocking task failed: {e}")))?
    }
}

/// Sqlite-backed alert repository
pub struct SqliteAlertRepository {
    db: Arc<Database>,
}

impl SqliteAlertRepository {
    /// Wrap a shared database handle
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AlertRepository for SqliteAlertRepository {
    async fn upsert(&self, alert: NewAlert) -> Result<Alert> {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || db.upsert_alert(&alert))
            .await
            .map_err(|e| TriageError::Other(format!("Blocking task failed: {e}")))?
    }

    async fn find(
        &self,
        profile_id: &str,
        entry_id: &str,
        alert_type: AlertType,
    ) -> Result<Option<Alert>> {
        let db = Arc::clone(&self.db);
        let profile_id = profile_id.to_string();
        let entry_id = entry_id.to_string();

        tokio::task::spawn_blocking(move || db.get_alert(&profile_id, &entry_id, alert_type))
            .await
            .map_err(|e| TriageError::Other(format!("Blocking task failed: {e}")))?
    }

    async fn mark_notified(
        &self,
        profile_id: &str,
        entry_id: &str,
        alert_type: AlertType,
    ) -> Result<bool> {
        let db = Arc::clone(&self.db);
        let profile_id = profile_id.to_string();
        let entry_id = entry_id.to_string();

        tokio::task::spawn_blocking(move || {
            db.mark_alert_notified(&profile_id, &entry_id, alert_type)
        })
        .await
        .map_err(|e| TriageError::Other(format!("Blocking task failed: {e}")))?
    }
}
