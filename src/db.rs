//! SQLite storage for entries, contacts, and alerts.
//!
//! All alert writes are idempotent upserts keyed by
//! (profile_id, entry_id, alert_type); the pipeline relies on that to
//! tolerate at-least-once job delivery. `notified_at` is only ever set by a
//! conditional update so a redelivered crisis job cannot record a second
//! notification.

use std::fs;
use std::path::Path;

use chrono::Utc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::Result;
use crate::models::{Alert, AlertType, ContactInfo, Entry, NewAlert, NewEntry};
use crate::schema::{alerts, contacts, entries};

/// Type alias for the database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;
/// Type alias for a pooled connection
pub type DbConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Database manager for handling connections and operations
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Create a new database connection pool and run migrations
    pub fn new(database_path: &str, max_connections: u32) -> Result<Self> {
        if let Some(parent) = Path::new(database_path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let manager = SqliteConnectionManager::file(database_path);
        let pool = Pool::builder().max_size(max_connections).build(manager)?;

        let conn = pool.get()?;
        Self::run_migrations(&conn)?;

        Ok(Self { pool })
    }

    /// Create an in-memory database, for tests
    pub fn in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();
        // A single connection so every caller sees the same in-memory db.
        let pool = Pool::builder().max_size(1).build(manager)?;

        let conn = pool.get()?;
        Self::run_migrations(&conn)?;

        Ok(Self { pool })
    }

    /// Run database migrations
    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(include_str!(
            "../migrations/2026-08-01-000000_create_tables/up.sql"
        ))?;
        Ok(())
    }

    /// Get a connection from the pool
    pub fn get_connection(&self) -> Result<DbConnection> {
        Ok(self.pool.get()?)
    }

    /// Record a new entry if it does not already exist, and return it.
    ///
    /// Idempotent on entry id; re-submitting the same entry is a no-op.
    pub fn insert_entry(&self, new_entry: NewEntry) -> Result<Entry> {
        let conn = self.get_connection()?;

        conn.execute(
            &format!(
                "INSERT INTO {} ({}, {}, {}, {}) VALUES (?, ?, ?, ?)
                 ON CONFLICT({}) DO NOTHING",
                entries::TABLE,
                entries::ID,
                entries::PROFILE_ID,
                entries::TEXT,
                entries::CREATED_AT,
                entries::ID,
            ),
            params![new_entry.id, new_entry.profile_id, new_entry.text, Utc::now()],
        )?;

        // Return the connection before the read-back checks out its own;
        // holding both would exhaust a single-connection pool.
        drop(conn);

        self.get_entry(&new_entry.id)?
            .ok_or_else(|| crate::error::TriageError::Other("Failed to retrieve entry".into()))
    }

    /// Get an entry by id
    pub fn get_entry(&self, entry_id: &str) -> Result<Option<Entry>> {
        let conn = self.get_connection()?;

        let entry = conn
            .query_row(
                &format!(
                    "SELECT * FROM {} WHERE {} = ?",
                    entries::TABLE,
                    entries::ID
                ),
                params![entry_id],
                Self::map_entry,
            )
            .optional()?;

        Ok(entry)
    }

    /// Attach the interpretive payload to an entry.
    ///
    /// Returns false when the entry does not exist.
    pub fn attach_analysis(&self, entry_id: &str, analysis: &serde_json::Value) -> Result<bool> {
        let conn = self.get_connection()?;

        let updated = conn.execute(
            &format!(
                "UPDATE {} SET {} = ?, {} = ? WHERE {} = ?",
                entries::TABLE,
                entries::ANALYSIS,
                entries::ANALYZED_AT,
                entries::ID,
            ),
            params![serde_json::to_string(analysis)?, Utc::now(), entry_id],
        )?;

        Ok(updated > 0)
    }

    /// Insert or update contact data for a profile
    pub fn upsert_contact(&self, contact: &ContactInfo) -> Result<()> {
        let conn = self.get_connection()?;

        conn.execute(
            &format!(
                "INSERT INTO {} ({}, {}, {}, {}) VALUES (?, ?, ?, ?)
                 ON CONFLICT({}) DO UPDATE SET
                     {} = excluded.{},
                     {} = excluded.{},
                     {} = excluded.{}",
                contacts::TABLE,
                contacts::PROFILE_ID,
                contacts::NAME,
                contacts::EMAIL,
                contacts::PHONE,
                contacts::PROFILE_ID,
                contacts::NAME,
                contacts::NAME,
                contacts::EMAIL,
                contacts::EMAIL,
                contacts::PHONE,
                contacts::PHONE,
            ),
            params![contact.profile_id, contact.name, contact.email, contact.phone],
        )?;

        Ok(())
    }

    /// Get contact data for a profile
    pub fn get_contact(&self, profile_id: &str) -> Result<Option<ContactInfo>> {
        let conn = self.get_connection()?;

        let contact = conn
            .query_row(
                &format!(
                    "SELECT * FROM {} WHERE {} = ?",
                    contacts::TABLE,
                    contacts::PROFILE_ID
                ),
                params![profile_id],
                Self::map_contact,
            )
            .optional()?;

        Ok(contact)
    }

    /// Upsert an alert keyed by (profile_id, entry_id, alert_type).
    ///
    /// A redelivered job updates the severity fields of the existing record;
    /// `created_at` and `notified_at` are untouched.
    pub fn upsert_alert(&self, new_alert: &NewAlert) -> Result<Alert> {
        let conn = self.get_connection()?;

        conn.execute(
            &format!(
                "INSERT INTO {} ({}, {}, {}, {}, {}, {}, {}, {}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT({}, {}, {}) DO UPDATE SET
                     {} = excluded.{},
                     {} = excluded.{},
                     {} = excluded.{},
                     {} = excluded.{}",
                alerts::TABLE,
                alerts::PROFILE_ID,
                alerts::ENTRY_ID,
                alerts::ALERT_TYPE,
                alerts::PRIORITY,
                alerts::MESSAGE,
                alerts::RISK_SCORE,
                alerts::RISK_FACTORS,
                alerts::CREATED_AT,
                alerts::PROFILE_ID,
                alerts::ENTRY_ID,
                alerts::ALERT_TYPE,
                alerts::PRIORITY,
                alerts::PRIORITY,
                alerts::MESSAGE,
                alerts::MESSAGE,
                alerts::RISK_SCORE,
                alerts::RISK_SCORE,
                alerts::RISK_FACTORS,
                alerts::RISK_FACTORS,
            ),
            params![
                new_alert.profile_id,
                new_alert.entry_id,
                new_alert.alert_type.as_str(),
                new_alert.priority.as_str(),
                new_alert.message,
                new_alert.risk_score,
                serde_json::to_string(&new_alert.risk_factors)?,
                Utc::now(),
            ],
        )?;

        // Same as insert_entry: release before the read-back checkout.
        drop(conn);

        self.get_alert(&new_alert.profile_id, &new_alert.entry_id, new_alert.alert_type)?
            .ok_or_else(|| crate::error::TriageError::Other("Failed to retrieve alert".into()))
    }

    /// Get an alert by its upsert key
    pub fn get_alert(
        &self,
        profile_id: &str,
        entry_id: &str,
        alert_type: AlertType,
    ) -> Result<Option<Alert>> {
        let conn = self.get_connection()?;

        let alert = conn
            .query_row(
                &format!(
                    "SELECT * FROM {} WHERE {} = ? AND {} = ? AND {} = ?",
                    alerts::TABLE,
                    alerts::PROFILE_ID,
                    alerts::ENTRY_ID,
                    alerts::ALERT_TYPE
                ),
                params![profile_id, entry_id, alert_type.as_str()],
                Self::map_alert,
            )
            .optional()?;

        Ok(alert)
    }

    /// List alerts for a profile, newest first
    pub fn list_alerts(&self, profile_id: &str) -> Result<Vec<Alert>> {
        let conn = self.get_connection()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM {} WHERE {} = ? ORDER BY {} DESC",
            alerts::TABLE,
            alerts::PROFILE_ID,
            alerts::CREATED_AT
        ))?;

        let alert_iter = stmt.query_map(params![profile_id], Self::map_alert)?;

        let mut results = Vec::new();
        for alert in alert_iter {
            results.push(alert?);
        }

        Ok(results)
    }

    /// Mark an alert notified, conditionally.
    ///
    /// Returns true only if this call performed the transition; a second
    /// call for the same alert is a no-op, which is what makes duplicate
    /// crisis-job delivery safe.
    pub fn mark_alert_notified(
        &self,
        profile_id: &str,
        entry_id: &str,
        alert_type: AlertType,
    ) -> Result<bool> {
        let conn = self.get_connection()?;

        let updated = conn.execute(
            &format!(
                "UPDATE {} SET {} = ? WHERE {} = ? AND {} = ? AND {} = ? AND {} IS NULL",
                alerts::TABLE,
                alerts::NOTIFIED_AT,
                alerts::PROFILE_ID,
                alerts::ENTRY_ID,
                alerts::ALERT_TYPE,
                alerts::NOTIFIED_AT,
            ),
            params![Utc::now(), profile_id, entry_id, alert_type.as_str()],
        )?;

        Ok(updated > 0)
    }

    /// Map a database row to an Entry
    fn map_entry(row: &Row) -> rusqlite::Result<Entry> {
        let analysis: Option<String> = row.get(entries::ANALYSIS)?;

        Ok(Entry {
            id: row.get(entries::ID)?,
            profile_id: row.get(entries::PROFILE_ID)?,
            text: row.get(entries::TEXT)?,
            created_at: row.get(entries::CREATED_AT)?,
            analysis: analysis.and_then(|raw| serde_json::from_str(&raw).ok()),
            analyzed_at: row.get(entries::ANALYZED_AT)?,
        })
    }

    /// Map a database row to a ContactInfo
    fn map_contact(row: &Row) -> rusqlite::Result<ContactInfo> {
        Ok(ContactInfo {
            profile_id: row.get(contacts::PROFILE_ID)?,
            name: row.get(contacts::NAME)?,
            email: row.get(contacts::EMAIL)?,
            phone: row.get(contacts::PHONE)?,
        })
    }

    /// Map a database row to an Alert
    fn map_alert(row: &Row) -> rusqlite::Result<Alert> {
        let alert_type: String = row.get(alerts::ALERT_TYPE)?;
        let priority: String = row.get(alerts::PRIORITY)?;
        let factors_json: String = row.get(alerts::RISK_FACTORS)?;

        Ok(Alert {
            id: row.get(alerts::ID)?,
            profile_id: row.get(alerts::PROFILE_ID)?,
            entry_id: row.get(alerts::ENTRY_ID)?,
            alert_type: alert_type.parse().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?,
            priority: priority.parse().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?,
            message: row.get(alerts::MESSAGE)?,
            risk_score: row.get(alerts::RISK_SCORE)?,
            risk_factors: serde_json::from_str(&factors_json).unwrap_or_default(),
            created_at: row.get(alerts::CREATED_AT)?,
            notified_at: row.get(alerts::NOTIFIED_AT)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RiskLevel;

    fn new_alert(profile: &str, entry: &str) -> NewAlert {
        NewAlert {
            profile_id: profile.into(),
            entry_id: entry.into(),
            alert_type: AlertType::Crisis,
            priority: RiskLevel::Critical,
            message: "Crisis risk detected".into(),
            risk_score: 100,
            risk_factors: vec!["suicidal intent: \"kill myself\"".into()],
        }
    }

    #[test]
    fn write_paths_do_not_hold_the_connection_across_their_read_back() {
        // in_memory() pools exactly one connection, so a write that still
        // holds it while reading back would block on its own checkout.
        let db = Database::in_memory().expect("db");

        let stored = db
            .insert_entry(NewEntry {
                id: "e1".into(),
                profile_id: "p1".into(),
                text: "today was hard".into(),
            })
            .expect("insert");
        assert_eq!(stored.id, "e1");

        let alert = db.upsert_alert(&new_alert("p1", "e1")).expect("upsert");
        assert_eq!(alert.entry_id, "e1");
    }

    #[test]
    fn upsert_alert_is_idempotent() {
        let db = Database::in_memory().expect("db");

        let first = db.upsert_alert(&new_alert("p1", "e1")).expect("upsert");
        let second = db.upsert_alert(&new_alert("p1", "e1")).expect("upsert");

        assert_eq!(first.id, second.id);
        assert_eq!(db.list_alerts("p1").expect("list").len(), 1);
    }

    #[test]
    fn distinct_entries_create_distinct_alerts() {
        let db = Database::in_memory().expect("db");

        db.upsert_alert(&new_alert("p1", "e1")).expect("upsert");
        db.upsert_alert(&new_alert("p1", "e2")).expect("upsert");

        assert_eq!(db.list_alerts("p1").expect("list").len(), 2);
    }

    #[test]
    fn mark_notified_happens_once() {
        let db = Database::in_memory().expect("db");
        db.upsert_alert(&new_alert("p1", "e1")).expect("upsert");

        assert!(db
            .mark_alert_notified("p1", "e1", AlertType::Crisis)
            .expect("mark"));
        // Duplicate delivery: the conditional update refuses the transition.
        assert!(!db
            .mark_alert_notified("p1", "e1", AlertType::Crisis)
            .expect("mark"));

        let alert = db
            .get_alert("p1", "e1", AlertType::Crisis)
            .expect("get")
            .expect("alert exists");
        assert!(alert.notified_at.is_some());
    }

    #[test]
    fn insert_entry_is_idempotent_and_analysis_attaches_once() {
        let db = Database::in_memory().expect("db");

        let entry = NewEntry {
            id: "e1".into(),
            profile_id: "p1".into(),
            text: "today was hard".into(),
        };
        db.insert_entry(entry.clone()).expect("insert");
        db.insert_entry(entry).expect("insert again");

        let payload = serde_json::json!({"themes": ["fatigue"]});
        assert!(db.attach_analysis("e1", &payload).expect("attach"));
        assert!(!db.attach_analysis("missing", &payload).expect("attach"));

        let stored = db.get_entry("e1").expect("get").expect("entry exists");
        assert_eq!(stored.analysis, Some(payload));
        assert!(stored.analyzed_at.is_some());
    }

    #[test]
    fn contacts_round_trip() {
        let db = Database::in_memory().expect("db");

        let contact = ContactInfo {
            profile_id: "p1".into(),
            name: "Alex".into(),
            email: Some("alex@example.com".into()),
            phone: None,
        };
        db.upsert_contact(&contact).expect("upsert");

        let stored = db.get_contact("p1").expect("get").expect("contact exists");
        assert_eq!(stored.name, "Alex");
        assert!(db.get_contact("p2").expect("get").is_none());
    }
}
