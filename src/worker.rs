//! Queue consumers: the per-entry analysis pipeline, the crisis escalation
//! pipeline, and the bounded worker pools that drive them.
//!
//! A failure inside one job never affects other in-flight jobs. Transient
//! errors are retried with exponential backoff up to the attempt budget;
//! validation errors are buried immediately. Exhausting the budget on a
//! crisis job is logged at error level; a crisis alert must never
//! disappear without trace.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::analyzer::TextAnalyzer;
use crate::classifier::RiskClassifier;
use crate::error::{Result, TriageError};
use crate::metrics;
use crate::models::{AlertType, AnalysisJob, CrisisJob, NewAlert};
use crate::notifier::Notifier;
use crate::planner::generate_crisis_response;
use crate::queue::JobQueue;
use crate::repository::{AlertRepository, EntryRepository};
use crate::validation::JobValidator;

/// Bounded retry with exponential backoff and jitter
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts a job may consume, including the first
    pub max_attempts: u32,
    /// Backoff before the second attempt
    pub base_delay: Duration,
    /// Cap on the computed backoff
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Backoff to wait after the given (1-based) failed attempt
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2_u32.saturating_pow(attempt.saturating_sub(1)))
            .min(self.max_delay);

        // Up to 50% jitter to spread retries from concurrent failures.
        let jitter_ms = exp.as_millis() as u64 / 2;
        if jitter_ms == 0 {
            return exp;
        }
        exp + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

/// Handler for one kind of job
#[async_trait]
pub trait JobHandler<J>: Send + Sync {
    /// Queue label used in logs and metrics
    fn queue_name(&self) -> &'static str;

    /// Process one job to completion
    async fn handle(&self, job: &J) -> Result<()>;
}

/// The per-entry analysis pipeline (consumer of the analysis queue).
///
/// Classification runs first: it is pure and cannot fail, so an outage in
/// the external analyzer can never suppress risk detection. Alert creation
/// happens-before the crisis enqueue; both are idempotent against
/// redelivery.
pub struct AnalysisPipeline {
    classifier: Arc<RiskClassifier>,
    analyzer: Arc<dyn TextAnalyzer>,
    entries: Arc<dyn EntryRepository>,
    alerts: Arc<dyn AlertRepository>,
    crisis_queue: Arc<dyn JobQueue<CrisisJob>>,
}

impl AnalysisPipeline {
    /// Wire the pipeline to its ports
    pub fn new(
        classifier: Arc<RiskClassifier>,
        analyzer: Arc<dyn TextAnalyzer>,
        entries: Arc<dyn EntryRepository>,
        alerts: Arc<dyn AlertRepository>,
        crisis_queue: Arc<dyn JobQueue<CrisisJob>>,
    ) -> Self {
        Self {
            classifier,
            analyzer,
            entries,
            alerts,
            crisis_queue,
        }
    }

    async fn escalate(&self, job: &AnalysisJob) -> Result<()> {
        let assessment = self.classifier.assess_risk(&job.user_id, &job.text);
        metrics::record_assessment(assessment.risk_level);

        if !assessment.risk_level.escalates() {
            debug!(
                entry_id = %job.entry_id,
                level = assessment.risk_level.as_str(),
                "No escalation needed"
            );
            return Ok(());
        }

        let response = generate_crisis_response(&assessment);
        let alert = self
            .alerts
            .upsert(NewAlert {
                profile_id: job.user_id.clone(),
                entry_id: job.entry_id.clone(),
                alert_type: AlertType::Crisis,
                priority: response.alert_priority,
                message: assessment.recommended_action.clone(),
                risk_score: assessment.risk_score,
                risk_factors: assessment.risk_factors.clone(),
            })
            .await?;
        metrics::record_alert_upserted();

        // Redelivered job for an already-notified alert: nothing left to do.
        if alert.notified_at.is_some() {
            debug!(entry_id = %job.entry_id, "Alert already notified, skipping enqueue");
            return Ok(());
        }

        self.crisis_queue
            .push(
                CrisisJob {
                    user_id: job.user_id.clone(),
                    entry_id: job.entry_id.clone(),
                    risk_level: assessment.risk_level,
                    risk_score: assessment.risk_score,
                },
                response.alert_priority.queue_priority(),
            )
            .await?;

        info!(
            profile_id = %job.user_id,
            entry_id = %job.entry_id,
            level = assessment.risk_level.as_str(),
            score = assessment.risk_score,
            "Escalated entry to crisis queue"
        );
        Ok(())
    }
}

#[async_trait]
impl JobHandler<AnalysisJob> for AnalysisPipeline {
    fn queue_name(&self) -> &'static str {
        "analysis"
    }

    async fn handle(&self, job: &AnalysisJob) -> Result<()> {
        JobValidator::validate_analysis_job(job)?;

        // Detection and escalation first; neither depends on the external
        // analyzer being up.
        self.escalate(job).await?;

        // Interpretive commentary is best-effort glue: a failure here is
        // transient and requeues the job, but the escalation above already
        // happened and is idempotent on redelivery.
        let payload = self.analyzer.interpret(&job.text, &job.access_token).await?;
        self.entries.attach_analysis(&job.entry_id, payload).await?;

        Ok(())
    }
}

/// The escalation pipeline (consumer of the crisis queue).
pub struct CrisisPipeline {
    entries: Arc<dyn EntryRepository>,
    alerts: Arc<dyn AlertRepository>,
    notifier: Arc<dyn Notifier>,
}

impl CrisisPipeline {
    /// Wire the pipeline to its ports
    pub fn new(
        entries: Arc<dyn EntryRepository>,
        alerts: Arc<dyn AlertRepository>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            entries,
            alerts,
            notifier,
        }
    }
}

#[async_trait]
impl JobHandler<CrisisJob> for CrisisPipeline {
    fn queue_name(&self) -> &'static str {
        "crisis"
    }

    async fn handle(&self, job: &CrisisJob) -> Result<()> {
        JobValidator::validate_crisis_job(job)?;

        let Some(alert) = self
            .alerts
            .find(&job.user_id, &job.entry_id, AlertType::Crisis)
            .await?
        else {
            // The alert write happens-before the enqueue, so a missing
            // record means the payload is bogus, not that we are early.
            return Err(TriageError::Validation(format!(
                "No crisis alert on record for profile {} entry {}",
                job.user_id, job.entry_id
            )));
        };

        if alert.notified_at.is_some() {
            debug!(
                profile_id = %job.user_id,
                entry_id = %job.entry_id,
                "Alert already notified, dropping duplicate delivery"
            );
            return Ok(());
        }

        let contact = self.entries.contact_for(&job.user_id).await?;
        self.notifier.notify(&alert, &contact).await?;

        if self
            .alerts
            .mark_notified(&job.user_id, &job.entry_id, AlertType::Crisis)
            .await?
        {
            metrics::record_notification_sent();
            info!(
                profile_id = %job.user_id,
                entry_id = %job.entry_id,
                "Crisis alert notified"
            );
        } else {
            // A concurrent delivery won the conditional update.
            debug!(
                profile_id = %job.user_id,
                entry_id = %job.entry_id,
                "Alert was marked notified concurrently"
            );
        }

        Ok(())
    }
}

/// A bounded set of workers draining one queue, with an explicit stop
pub struct WorkerPool {
    name: &'static str,
    handles: Vec<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
}

impl WorkerPool {
    /// Spawn `concurrency` workers over the queue
    pub fn start<J>(
        name: &'static str,
        concurrency: usize,
        queue: Arc<dyn JobQueue<J>>,
        handler: Arc<dyn JobHandler<J>>,
        policy: RetryPolicy,
    ) -> Self
    where
        J: Send + Sync + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handles = (0..concurrency)
            .map(|index| {
                let queue = Arc::clone(&queue);
                let handler = Arc::clone(&handler);
                let shutdown_rx = shutdown_rx.clone();
                tokio::spawn(run_worker(
                    format!("{name}-{index}"),
                    queue,
                    handler,
                    policy,
                    shutdown_rx,
                ))
            })
            .collect();

        info!(pool = name, concurrency, "Worker pool started");
        Self {
            name,
            handles,
            shutdown_tx,
        }
    }

    /// Signal all workers to stop and wait for them to finish their
    /// current job.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(pool = self.name, error = %e, "Worker ended abnormally");
                }
            }
        }
        info!(pool = self.name, "Worker pool stopped");
    }
}

/// One worker: pop, process, settle. Runs until shutdown is signalled.
async fn run_worker<J>(
    worker: String,
    queue: Arc<dyn JobQueue<J>>,
    handler: Arc<dyn JobHandler<J>>,
    policy: RetryPolicy,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    J: Send + Sync + 'static,
{
    let queue_name = handler.queue_name();

    loop {
        let delivery = tokio::select! {
            delivery = queue.pop() => match delivery {
                Ok(delivery) => delivery,
                Err(e) => {
                    error!(worker = %worker, error = %e, "Failed to pop job");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            },
            _ = shutdown_rx.changed() => return,
        };

        let start = Instant::now();
        let outcome = handler.handle(&delivery.job).await;
        metrics::record_job_duration(queue_name, start.elapsed());

        let settle = match outcome {
            Ok(()) => {
                metrics::record_job_outcome(queue_name, "success");
                queue.ack(delivery).await
            }
            Err(e) if !e.is_transient() => {
                warn!(worker = %worker, error = %e, "Burying invalid job");
                metrics::record_job_outcome(queue_name, "invalid");
                metrics::record_dead_letter(queue_name);
                queue.bury(delivery, &format!("validation: {e}")).await
            }
            Err(e) if delivery.attempt >= policy.max_attempts => {
                // Operator-visible fault: the job is out of attempts and
                // will not be retried automatically.
                error!(
                    worker = %worker,
                    queue = queue_name,
                    attempt = delivery.attempt,
                    error = %e,
                    "Job exhausted its attempt budget; dead-lettering"
                );
                metrics::record_job_outcome(queue_name, "exhausted");
                metrics::record_dead_letter(queue_name);
                queue
                    .bury(delivery, &format!("retries exhausted: {e}"))
                    .await
            }
            Err(e) => {
                let delay = policy.backoff(delivery.attempt);
                warn!(
                    worker = %worker,
                    attempt = delivery.attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, requeueing"
                );
                metrics::record_job_outcome(queue_name, "retried");
                tokio::time::sleep(delay).await;
                queue.retry(delivery).await
            }
        };

        if let Err(e) = settle {
            error!(worker = %worker, error = %e, "Failed to settle delivery");
        }

        if let Ok(depth) = queue.pending_count().await {
            metrics::set_queue_depth(queue_name, depth);
        }
    }
}
