//! Risk Triage - Self-Harm Risk Classification and Escalation
//!
//! A Rust library for deterministically classifying self-report text for
//! self-harm and suicide risk and driving a durable, idempotent escalation
//! pipeline over the results.
//!
//! # Features
//!
//! - Deterministic keyword/phrase risk classifier with normalization
//! - Crisis response planning from assessments
//! - Durable at-least-once job queues backed by sled
//! - Bounded retry with exponential backoff and dead-lettering
//! - Idempotent crisis alerts and exactly-once-effect notification

/// Pluggable external text analyzer
pub mod analyzer;
/// Deterministic risk classification
pub mod classifier;
/// Configuration management
pub mod config;
/// Database operations and connection pooling
pub mod db;
/// Error types
pub mod error;
/// Logging setup and utilities
pub mod logging;
/// Metrics collection
pub mod metrics;
/// Data models and structures
pub mod models;
/// Crisis notification dispatch
pub mod notifier;
/// Crisis response planning
pub mod planner;
/// Durable job queues
pub mod queue;
/// Repository pattern for data access
pub mod repository;
/// Database schema definitions
pub mod schema;
/// Service wiring and lifecycle
pub mod service;
/// Input validation and sanitization
pub mod validation;
/// Queue consumers and worker pools
pub mod worker;

// Re-export key components for easier access
pub use classifier::RiskClassifier;
pub use config::AppConfig;
pub use db::Database;
pub use error::{Result, TriageError};
pub use models::{Alert, AlertType, CrisisResponse, RiskAssessment, RiskLevel};
pub use notifier::Notifier;
pub use planner::generate_crisis_response;
pub use service::TriageService;
