//! Database schema definitions
//!
//! This module provides constants for table and column names used with rusqlite.

/// Entries table schema
pub mod entries {
    /// Table name
    pub const TABLE: &str = "entries";
    /// Primary key column (entry identifier)
    pub const ID: &str = "id";
    /// Owning profile column
    pub const PROFILE_ID: &str = "profile_id";
    /// Raw text column
    pub const TEXT: &str = "text";
    /// Creation timestamp column
    pub const CREATED_AT: &str = "created_at";
    /// Interpretive payload column (JSON)
    pub const ANALYSIS: &str = "analysis";
    /// Analysis timestamp column
    pub const ANALYZED_AT: &str = "analyzed_at";
}

/// Contacts table schema
pub mod contacts {
    /// Table name
    pub const TABLE: &str = "contacts";
    /// Primary key column (profile identifier)
    pub const PROFILE_ID: &str = "profile_id";
    /// Display name column
    pub const NAME: &str = "name";
    /// Email address column
    pub const EMAIL: &str = "email";
    /// Phone number column
    pub const PHONE: &str = "phone";
}

/// Alerts table schema
pub mod alerts {
    /// Table name
    pub const TABLE: &str = "alerts";
    /// Primary key column
    pub const ID: &str = "id";
    /// Owning profile column
    pub const PROFILE_ID: &str = "profile_id";
    /// Triggering entry column
    pub const ENTRY_ID: &str = "entry_id";
    /// Alert type column (crisis, high_resistance)
    pub const ALERT_TYPE: &str = "alert_type";
    /// Dispatch priority column
    pub const PRIORITY: &str = "priority";
    /// Operator-facing message column
    pub const MESSAGE: &str = "message";
    /// Risk score column
    pub const RISK_SCORE: &str = "risk_score";
    /// Risk factors column (JSON array)
    pub const RISK_FACTORS: &str = "risk_factors";
    /// Creation timestamp column
    pub const CREATED_AT: &str = "created_at";
    /// Notification timestamp column (NULL until notified)
    pub const NOTIFIED_AT: &str = "notified_at";
}
