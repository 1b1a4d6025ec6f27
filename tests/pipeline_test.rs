//! End-to-end pipeline tests: real sqlite storage, in-memory queues, and
//! both worker pools running against fake analyzer/notifier ports.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use risk_triage::analyzer::TextAnalyzer;
use risk_triage::db::Database;
use risk_triage::error::{Result, TriageError};
use risk_triage::models::{Alert, AlertType, AnalysisJob, ContactInfo, CrisisJob, RiskLevel};
use risk_triage::notifier::Notifier;
use risk_triage::queue::{InMemoryQueue, JobQueue};
use risk_triage::repository::{
    AlertRepository, EntryRepository, SqliteAlertRepository, SqliteEntryRepository,
};
use risk_triage::worker::{AnalysisPipeline, CrisisPipeline, JobHandler, RetryPolicy, WorkerPool};
use risk_triage::RiskClassifier;

/// Analyzer that fails its first `failures` calls, then succeeds.
struct FlakyAnalyzer {
    failures: AtomicU32,
    calls: AtomicU32,
}

impl FlakyAnalyzer {
    fn reliable() -> Self {
        Self::failing(0)
    }

    fn failing(failures: u32) -> Self {
        Self {
            failures: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl TextAnalyzer for FlakyAnalyzer {
    async fn interpret(&self, _text: &str, _access_token: &str) -> Result<serde_json::Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(TriageError::Analyzer("analyzer unavailable".into()));
        }
        Ok(serde_json::json!({"summary": "interpreted"}))
    }
}

struct CountingNotifier {
    sent: AtomicU32,
}

impl CountingNotifier {
    fn new() -> Self {
        Self {
            sent: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Notifier for CountingNotifier {
    async fn notify(&self, _alert: &Alert, _contact: &Option<ContactInfo>) -> Result<()> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    database: Arc<Database>,
    analyzer: Arc<FlakyAnalyzer>,
    notifier: Arc<CountingNotifier>,
    analysis_queue: Arc<InMemoryQueue<AnalysisJob>>,
    crisis_queue: Arc<InMemoryQueue<CrisisJob>>,
    entries: Arc<dyn EntryRepository>,
    analysis_pool: WorkerPool,
    crisis_pool: WorkerPool,
}

impl Harness {
    fn start(analyzer: FlakyAnalyzer) -> Self {
        let database = Arc::new(Database::in_memory().expect("database"));
        let analyzer = Arc::new(analyzer);
        let notifier = Arc::new(CountingNotifier::new());

        let analysis_queue = Arc::new(InMemoryQueue::new());
        let crisis_queue = Arc::new(InMemoryQueue::new());

        let entries: Arc<dyn EntryRepository> =
            Arc::new(SqliteEntryRepository::new(Arc::clone(&database)));
        let alerts: Arc<dyn AlertRepository> =
            Arc::new(SqliteAlertRepository::new(Arc::clone(&database)));

        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
        };

        let analysis_pipeline = Arc::new(AnalysisPipeline::new(
            Arc::new(RiskClassifier::new().expect("classifier")),
            Arc::clone(&analyzer) as Arc<dyn TextAnalyzer>,
            Arc::clone(&entries),
            Arc::clone(&alerts),
            Arc::clone(&crisis_queue) as Arc<dyn JobQueue<CrisisJob>>,
        ));
        let analysis_pool = WorkerPool::start(
            "analysis",
            2,
            Arc::clone(&analysis_queue) as Arc<dyn JobQueue<AnalysisJob>>,
            analysis_pipeline as Arc<dyn JobHandler<AnalysisJob>>,
            policy,
        );

        let crisis_pipeline = Arc::new(CrisisPipeline::new(
            Arc::clone(&entries),
            Arc::clone(&alerts),
            Arc::clone(&notifier) as Arc<dyn Notifier>,
        ));
        let crisis_pool = WorkerPool::start(
            "crisis",
            1,
            Arc::clone(&crisis_queue) as Arc<dyn JobQueue<CrisisJob>>,
            crisis_pipeline as Arc<dyn JobHandler<CrisisJob>>,
            policy,
        );

        Self {
            database,
            analyzer,
            notifier,
            analysis_queue,
            crisis_queue,
            entries,
            analysis_pool,
            crisis_pool,
        }
    }

    async fn submit(&self, entry_id: &str, user_id: &str, text: &str) {
        let job = AnalysisJob {
            entry_id: entry_id.to_string(),
            user_id: user_id.to_string(),
            text: text.to_string(),
            access_token: "token".to_string(),
        };
        self.entries
            .record_entry(risk_triage::models::NewEntry {
                id: job.entry_id.clone(),
                profile_id: job.user_id.clone(),
                text: job.text.clone(),
            })
            .await
            .expect("record entry");
        self.analysis_queue.push(job, 0).await.expect("push");
    }

    /// Redeliver an analysis job without re-recording the entry, as a
    /// crashed-before-ack consumer would see it.
    async fn redeliver(&self, entry_id: &str, user_id: &str, text: &str) {
        self.analysis_queue
            .push(
                AnalysisJob {
                    entry_id: entry_id.to_string(),
                    user_id: user_id.to_string(),
                    text: text.to_string(),
                    access_token: "token".to_string(),
                },
                0,
            )
            .await
            .expect("push");
    }

    async fn wait_until<F>(&self, what: &str, mut condition: F)
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn shutdown(self) {
        self.analysis_pool.shutdown().await;
        self.crisis_pool.shutdown().await;
    }
}

#[tokio::test]
async fn test_critical_entry_is_escalated_and_notified_once() {
    let harness = Harness::start(FlakyAnalyzer::reliable());
    harness
        .submit("e1", "p1", "I want to kill myself, I can't go on")
        .await;

    let database = Arc::clone(&harness.database);
    harness
        .wait_until("alert to be notified", move || {
            database
                .get_alert("p1", "e1", AlertType::Crisis)
                .expect("get alert")
                .is_some_and(|alert| alert.notified_at.is_some())
        })
        .await;

    let alert = harness
        .database
        .get_alert("p1", "e1", AlertType::Crisis)
        .expect("get alert")
        .expect("alert exists");
    assert_eq!(alert.priority, RiskLevel::Critical);
    assert_eq!(alert.risk_score, 100);
    assert_eq!(harness.notifier.sent.load(Ordering::SeqCst), 1);

    let database = Arc::clone(&harness.database);
    harness
        .wait_until("analysis to attach", move || {
            database
                .get_entry("e1")
                .expect("get entry")
                .is_some_and(|entry| entry.analysis.is_some())
        })
        .await;

    harness.shutdown().await;
}

#[tokio::test]
async fn test_low_risk_entry_creates_no_alert() {
    let harness = Harness::start(FlakyAnalyzer::reliable());
    harness
        .submit("e1", "p1", "Had a quiet day, feeling fine overall")
        .await;

    let database = Arc::clone(&harness.database);
    harness
        .wait_until("analysis to attach", move || {
            database
                .get_entry("e1")
                .expect("get entry")
                .is_some_and(|entry| entry.analysis.is_some())
        })
        .await;

    assert!(harness
        .database
        .get_alert("p1", "e1", AlertType::Crisis)
        .expect("get alert")
        .is_none());
    assert_eq!(harness.notifier.sent.load(Ordering::SeqCst), 0);
    assert!(harness.crisis_queue.dead_letters().await.expect("dead").is_empty());

    harness.shutdown().await;
}

#[tokio::test]
async fn test_redelivered_critical_job_notifies_only_once() {
    let text = "I want to kill myself, I can't go on";
    let harness = Harness::start(FlakyAnalyzer::reliable());
    harness.submit("e1", "p1", text).await;

    let database = Arc::clone(&harness.database);
    harness
        .wait_until("alert to be notified", move || {
            database
                .get_alert("p1", "e1", AlertType::Crisis)
                .expect("get alert")
                .is_some_and(|alert| alert.notified_at.is_some())
        })
        .await;
    let first_notified_at = harness
        .database
        .get_alert("p1", "e1", AlertType::Crisis)
        .expect("get alert")
        .expect("alert")
        .notified_at;

    // The same payload arrives again.
    harness.redeliver("e1", "p1", text).await;

    let analyzer = Arc::clone(&harness.analyzer);
    harness
        .wait_until("redelivery to be processed", move || {
            analyzer.calls.load(Ordering::SeqCst) >= 2
        })
        .await;
    // Give the crisis worker a moment in case it was wrongly re-enqueued.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let alert = harness
        .database
        .get_alert("p1", "e1", AlertType::Crisis)
        .expect("get alert")
        .expect("alert");
    assert_eq!(alert.notified_at, first_notified_at);
    assert_eq!(harness.notifier.sent.load(Ordering::SeqCst), 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_transient_analyzer_failures_recover_within_budget() {
    let harness = Harness::start(FlakyAnalyzer::failing(2));
    harness
        .submit("e1", "p1", "I want to kill myself, I can't go on")
        .await;

    let database = Arc::clone(&harness.database);
    harness
        .wait_until("analysis to attach after retries", move || {
            database
                .get_entry("e1")
                .expect("get entry")
                .is_some_and(|entry| entry.analysis.is_some())
        })
        .await;

    // Two failures plus the success.
    assert_eq!(harness.analyzer.calls.load(Ordering::SeqCst), 3);
    assert!(harness
        .analysis_queue
        .dead_letters()
        .await
        .expect("dead")
        .is_empty());

    // Escalation happened despite the analyzer being down at first.
    assert_eq!(harness.notifier.sent.load(Ordering::SeqCst), 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_analyzer_outage_dead_letters_but_still_escalates() {
    // More failures than the attempt budget allows.
    let harness = Harness::start(FlakyAnalyzer::failing(10));
    harness
        .submit("e1", "p1", "I want to kill myself, I can't go on")
        .await;

    let analysis_queue = Arc::clone(&harness.analysis_queue);
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if !analysis_queue.dead_letters().await.expect("dead").is_empty() {
            break;
        }
        assert!(Instant::now() < deadline, "job never dead-lettered");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let dead = harness.analysis_queue.dead_letters().await.expect("dead");
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].attempt, 3);

    // Detection and notification were never gated on the analyzer.
    let database = Arc::clone(&harness.database);
    harness
        .wait_until("alert to be notified", move || {
            database
                .get_alert("p1", "e1", AlertType::Crisis)
                .expect("get alert")
                .is_some_and(|alert| alert.notified_at.is_some())
        })
        .await;
    assert_eq!(harness.notifier.sent.load(Ordering::SeqCst), 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_invalid_job_is_buried_not_retried() {
    let harness = Harness::start(FlakyAnalyzer::reliable());

    // Empty entry id fails validation before any side effect.
    harness
        .analysis_queue
        .push(
            AnalysisJob {
                entry_id: String::new(),
                user_id: "p1".to_string(),
                text: "some text".to_string(),
                access_token: "token".to_string(),
            },
            0,
        )
        .await
        .expect("push");

    let analysis_queue = Arc::clone(&harness.analysis_queue);
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if !analysis_queue.dead_letters().await.expect("dead").is_empty() {
            break;
        }
        assert!(Instant::now() < deadline, "job never dead-lettered");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let dead = harness.analysis_queue.dead_letters().await.expect("dead");
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].attempt, 1);
    assert!(dead[0].reason.starts_with("validation"));
    assert_eq!(harness.analyzer.calls.load(Ordering::SeqCst), 0);

    harness.shutdown().await;
}
