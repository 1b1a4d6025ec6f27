use std::time::Duration;

use metrics::{counter, gauge, histogram};

use crate::models::RiskLevel;

// Metric names, kept in one place so dashboards and tests agree.
pub const ASSESSMENTS_TOTAL: &str = "triage_assessments_total";
pub const ALERTS_UPSERTED_TOTAL: &str = "triage_alerts_upserted_total";
pub const NOTIFICATIONS_SENT_TOTAL: &str = "triage_notifications_sent_total";
pub const JOBS_PROCESSED_TOTAL: &str = "triage_jobs_processed_total";
pub const JOB_DURATION_SECONDS: &str = "triage_job_duration_seconds";
pub const DEAD_LETTERS_TOTAL: &str = "triage_dead_letters_total";
pub const QUEUE_DEPTH: &str = "triage_queue_depth";

/// Count one classifier run, labelled by the resulting level
pub fn record_assessment(level: RiskLevel) {
    counter!(ASSESSMENTS_TOTAL, "level" => level.as_str()).increment(1);
}

/// Count one alert write (insert or severity refresh)
pub fn record_alert_upserted() {
    counter!(ALERTS_UPSERTED_TOTAL).increment(1);
}

/// Count one delivered crisis notification
pub fn record_notification_sent() {
    counter!(NOTIFICATIONS_SENT_TOTAL).increment(1);
}

/// Count one finished job, labelled by queue and outcome
pub fn record_job_outcome(queue: &'static str, outcome: &'static str) {
    counter!(JOBS_PROCESSED_TOTAL, "queue" => queue, "outcome" => outcome).increment(1);
}

/// Record wall time spent handling one job
pub fn record_job_duration(queue: &'static str, duration: Duration) {
    histogram!(JOB_DURATION_SECONDS, "queue" => queue).record(duration.as_secs_f64());
}

/// Count one job moved to the dead-letter region
pub fn record_dead_letter(queue: &'static str) {
    counter!(DEAD_LETTERS_TOTAL, "queue" => queue).increment(1);
}

/// Report current backlog for a queue
pub fn set_queue_depth(queue: &'static str, depth: usize) {
    gauge!(QUEUE_DEPTH, "queue" => queue).set(depth as f64);
}
