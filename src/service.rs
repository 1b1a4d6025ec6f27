//! Service wiring: owns the database, the durable queues, and the worker
//! pools, and exposes the entry-submission front door.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::analyzer::{NoopAnalyzer, TextAnalyzer};
use crate::classifier::RiskClassifier;
use crate::config::{AnalyzerConfig, AppConfig};
use crate::db::Database;
use crate::error::{Result, TriageError};
use crate::models::{AnalysisJob, CrisisJob, NewEntry, RiskAssessment};
use crate::notifier::{LogNotifier, Notifier};
use crate::queue::{open_queue_db, DeadLetter, JobQueue, SledJobQueue};
use crate::repository::{EntryRepository, SqliteAlertRepository, SqliteEntryRepository};
use crate::validation::JobValidator;
use crate::worker::{AnalysisPipeline, CrisisPipeline, RetryPolicy, WorkerPool};

/// The assembled triage application
pub struct TriageService {
    classifier: Arc<RiskClassifier>,
    entries: Arc<dyn EntryRepository>,
    analysis_queue: Arc<dyn JobQueue<AnalysisJob>>,
    crisis_queue: Arc<dyn JobQueue<CrisisJob>>,
    analysis_pool: WorkerPool,
    crisis_pool: WorkerPool,
}

impl TriageService {
    /// Open storage, recover queued work, and start both worker pools
    pub async fn start(config: &AppConfig) -> Result<Self> {
        let analyzer = bind_analyzer(&config.analyzer)?;

        let database = Arc::new(Database::new(
            &config.database.path,
            config.database.max_connections,
        )?);

        let queue_db = open_queue_db(&config.queue.data_dir)?;
        let analysis_queue: Arc<dyn JobQueue<AnalysisJob>> =
            Arc::new(SledJobQueue::open(&queue_db, "analysis")?);
        let crisis_queue: Arc<dyn JobQueue<CrisisJob>> =
            Arc::new(SledJobQueue::open(&queue_db, "crisis")?);

        let classifier = Arc::new(RiskClassifier::new()?);
        let entries: Arc<dyn EntryRepository> =
            Arc::new(SqliteEntryRepository::new(Arc::clone(&database)));
        let alerts = Arc::new(SqliteAlertRepository::new(Arc::clone(&database)));

        let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);

        let policy = RetryPolicy {
            max_attempts: config.workers.max_attempts,
            base_delay: Duration::from_millis(config.workers.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.workers.retry_max_delay_ms),
        };

        let analysis_pipeline = Arc::new(AnalysisPipeline::new(
            Arc::clone(&classifier),
            analyzer,
            Arc::clone(&entries),
            Arc::clone(&alerts) as _,
            Arc::clone(&crisis_queue),
        ));
        let analysis_pool = WorkerPool::start(
            "analysis",
            config.workers.analysis_concurrency,
            Arc::clone(&analysis_queue),
            analysis_pipeline,
            policy,
        );

        let crisis_pipeline = Arc::new(CrisisPipeline::new(
            Arc::clone(&entries),
            alerts,
            notifier,
        ));
        let crisis_pool = WorkerPool::start(
            "crisis",
            config.workers.crisis_concurrency,
            Arc::clone(&crisis_queue),
            crisis_pipeline,
            policy,
        );

        info!(
            database = %config.database.path,
            queues = %config.queue.data_dir,
            "Triage service started"
        );

        Ok(Self {
            classifier,
            entries,
            analysis_queue,
            crisis_queue,
            analysis_pool,
            crisis_pool,
        })
    }

    /// Accept one entry: validate, persist it, and enqueue analysis.
    ///
    /// Once this returns Ok the job is durable and will survive a restart.
    pub async fn submit(
        &self,
        entry_id: &str,
        user_id: &str,
        text: &str,
        access_token: &str,
    ) -> Result<()> {
        let job = AnalysisJob {
            entry_id: entry_id.to_string(),
            user_id: user_id.to_string(),
            text: JobValidator::sanitize_text(text),
            access_token: access_token.to_string(),
        };
        JobValidator::validate_analysis_job(&job)?;

        self.entries
            .record_entry(NewEntry {
                id: job.entry_id.clone(),
                profile_id: job.user_id.clone(),
                text: job.text.clone(),
            })
            .await?;

        self.analysis_queue.push(job, 0).await?;
        Ok(())
    }

    /// Run the classifier directly, without touching storage or queues
    #[must_use]
    pub fn assess(&self, profile_id: &str, text: &str) -> RiskAssessment {
        self.classifier.assess_risk(profile_id, text)
    }

    /// Analysis jobs waiting to run
    pub async fn analysis_backlog(&self) -> Result<usize> {
        self.analysis_queue.pending_count().await
    }

    /// Crisis jobs waiting to run
    pub async fn crisis_backlog(&self) -> Result<usize> {
        self.crisis_queue.pending_count().await
    }

    /// Analysis jobs that exhausted their attempts or failed validation
    pub async fn analysis_dead_letters(&self) -> Result<Vec<DeadLetter<AnalysisJob>>> {
        self.analysis_queue.dead_letters().await
    }

    /// Crisis jobs that exhausted their attempts or failed validation
    pub async fn crisis_dead_letters(&self) -> Result<Vec<DeadLetter<CrisisJob>>> {
        self.crisis_queue.dead_letters().await
    }

    /// Stop both pools, letting in-flight jobs finish
    pub async fn shutdown(self) {
        self.analysis_pool.shutdown().await;
        self.crisis_pool.shutdown().await;
        info!("Triage service stopped");
    }
}

/// Resolve the analyzer binding from configuration.
///
/// No external analyzer implementation ships in this build, so an operator
/// who enables one gets a startup error instead of silently running with
/// interpretive commentary disabled.
fn bind_analyzer(config: &AnalyzerConfig) -> Result<Arc<dyn TextAnalyzer>> {
    if config.enabled {
        return Err(TriageError::InvalidConfig(format!(
            "analyzer.enabled is set (endpoint: {:?}) but no external analyzer \
             binding is available in this build; unset analyzer.enabled to run \
             without interpretive commentary",
            config.endpoint
        )));
    }
    Ok(Arc::new(NoopAnalyzer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enabled_analyzer_without_a_binding_is_rejected_at_startup() {
        let config = AnalyzerConfig {
            enabled: true,
            endpoint: Some("http://localhost:8080".to_string()),
        };

        let err = bind_analyzer(&config).err().expect("no binding available");
        assert!(matches!(err, TriageError::InvalidConfig(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn disabled_analyzer_binds_the_noop_implementation() {
        let config = AnalyzerConfig {
            enabled: false,
            endpoint: None,
        };

        assert!(bind_analyzer(&config).is_ok());
    }
}
