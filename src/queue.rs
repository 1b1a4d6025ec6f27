//! Durable job queues with at-least-once delivery.
//!
//! Jobs live in a sled tree in one of three key regions: pending (ordered by
//! priority, then arrival), inflight (popped but not yet acknowledged), and
//! dead (exhausted or fatally invalid, kept for operator inspection).
//! A delivery that is never acknowledged survives a process crash: on reopen
//! every inflight envelope is moved back to pending, which is where the
//! at-least-once guarantee comes from. Every consumer-side write must
//! therefore be idempotent.

use std::collections::HashSet;
use std::marker::PhantomData;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};

use crate::error::{Result, TriageError};

/// Key prefix for jobs awaiting delivery
const PENDING_PREFIX: u8 = b'p';
/// Key prefix for delivered, unacknowledged jobs
const INFLIGHT_PREFIX: u8 = b'i';
/// Key prefix for dead-lettered jobs
const DEAD_PREFIX: u8 = b'd';

/// A job handed to a consumer. Must be settled with `ack`, `retry`, or
/// `bury` exactly once.
#[derive(Debug, Clone)]
pub struct Delivery<J> {
    /// Queue-assigned job identifier
    pub id: u64,
    /// Delivery attempt, starting at 1
    pub attempt: u32,
    /// Dispatch priority; higher pops first
    pub priority: u8,
    /// The job payload
    pub job: J,
}

/// Terminal record of a job that exhausted its attempt budget or carried a
/// fatally invalid payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter<J> {
    /// Queue-assigned job identifier
    pub id: u64,
    /// Attempt count at burial
    pub attempt: u32,
    /// The job payload
    pub job: J,
    /// Why the job was buried
    pub reason: String,
    /// When the job was buried
    pub failed_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct Envelope<J> {
    id: u64,
    attempt: u32,
    priority: u8,
    job: J,
}

/// Queue port the workers consume.
///
/// Delivery guarantees come from the queue implementation, not from
/// in-process coordination between workers.
#[async_trait]
pub trait JobQueue<J>: Send + Sync
where
    J: Send + 'static,
{
    /// Enqueue a job at the given priority
    async fn push(&self, job: J, priority: u8) -> Result<()>;

    /// Wait for and take the next job. Highest priority first, FIFO within
    /// a priority.
    async fn pop(&self) -> Result<Delivery<J>>;

    /// Acknowledge successful processing; the job is gone for good
    async fn ack(&self, delivery: Delivery<J>) -> Result<()>;

    /// Return a delivery to the queue with its attempt counter incremented
    async fn retry(&self, delivery: Delivery<J>) -> Result<()>;

    /// Move a delivery to the dead-letter region. Terminal.
    async fn bury(&self, delivery: Delivery<J>, reason: &str) -> Result<()>;

    /// Number of jobs awaiting delivery
    async fn pending_count(&self) -> Result<usize>;

    /// Snapshot of the dead-letter region, for operator inspection
    async fn dead_letters(&self) -> Result<Vec<DeadLetter<J>>>;
}

/// Durable sled-backed queue
pub struct SledJobQueue<J> {
    db: sled::Db,
    tree: sled::Tree,
    notify: Notify,
    pop_lock: Mutex<()>,
    _marker: PhantomData<fn(J) -> J>,
}

impl<J> SledJobQueue<J>
where
    J: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Open (or create) the named queue inside `db`, recovering any
    /// deliveries a crashed consumer left inflight.
    pub fn open(db: &sled::Db, name: &str) -> Result<Self> {
        let tree = db.open_tree(name)?;

        // Redeliver whatever a previous process never acknowledged.
        let mut batch = sled::Batch::default();
        let mut recovered = 0_usize;
        for item in tree.scan_prefix([INFLIGHT_PREFIX]) {
            let (key, value) = item?;
            let envelope: Envelope<J> = bincode::deserialize(&value)?;
            batch.remove(key);
            batch.insert(pending_key(envelope.priority, envelope.id).to_vec(), value);
            recovered += 1;
        }
        if recovered > 0 {
            tree.apply_batch(batch)?;
            tracing::info!(queue = name, recovered, "Recovered inflight jobs to pending");
        }

        Ok(Self {
            db: db.clone(),
            tree,
            notify: Notify::new(),
            pop_lock: Mutex::new(()),
            _marker: PhantomData,
        })
    }

    async fn try_pop(&self) -> Result<Option<Delivery<J>>> {
        let _guard = self.pop_lock.lock().await;

        let Some(item) = self.tree.scan_prefix([PENDING_PREFIX]).next() else {
            return Ok(None);
        };
        let (key, value) = item?;
        let envelope: Envelope<J> = bincode::deserialize(&value)?;

        // Atomic move from pending to inflight, so a crash in between
        // cannot lose the job.
        let mut batch = sled::Batch::default();
        batch.remove(key);
        batch.insert(inflight_key(envelope.id).to_vec(), value);
        self.tree.apply_batch(batch)?;

        Ok(Some(Delivery {
            id: envelope.id,
            attempt: envelope.attempt,
            priority: envelope.priority,
            job: envelope.job,
        }))
    }

    /// Number of delivered-but-unsettled jobs
    pub fn inflight_count(&self) -> usize {
        self.tree.scan_prefix([INFLIGHT_PREFIX]).count()
    }
}

#[async_trait]
impl<J> JobQueue<J> for SledJobQueue<J>
where
    J: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn push(&self, job: J, priority: u8) -> Result<()> {
        let id = self.db.generate_id()?;
        let envelope = Envelope {
            id,
            attempt: 1,
            priority,
            job,
        };

        self.tree
            .insert(pending_key(priority, id), bincode::serialize(&envelope)?)?;
        self.tree.flush_async().await?;
        self.notify.notify_one();

        Ok(())
    }

    async fn pop(&self) -> Result<Delivery<J>> {
        loop {
            let notified = self.notify.notified();
            if let Some(delivery) = self.try_pop().await? {
                return Ok(delivery);
            }
            notified.await;
        }
    }

    async fn ack(&self, delivery: Delivery<J>) -> Result<()> {
        self.tree.remove(inflight_key(delivery.id))?;
        self.tree.flush_async().await?;
        Ok(())
    }

    async fn retry(&self, delivery: Delivery<J>) -> Result<()> {
        let envelope = Envelope {
            id: delivery.id,
            attempt: delivery.attempt + 1,
            priority: delivery.priority,
            job: delivery.job,
        };

        let mut batch = sled::Batch::default();
        batch.remove(inflight_key(envelope.id).to_vec());
        batch.insert(
            pending_key(envelope.priority, envelope.id).to_vec(),
            bincode::serialize(&envelope)?,
        );
        self.tree.apply_batch(batch)?;
        self.tree.flush_async().await?;
        self.notify.notify_one();

        Ok(())
    }

    async fn bury(&self, delivery: Delivery<J>, reason: &str) -> Result<()> {
        let dead = DeadLetter {
            id: delivery.id,
            attempt: delivery.attempt,
            job: delivery.job,
            reason: reason.to_string(),
            failed_at: Utc::now(),
        };

        let mut batch = sled::Batch::default();
        batch.remove(inflight_key(dead.id).to_vec());
        batch.insert(dead_key(dead.id).to_vec(), bincode::serialize(&dead)?);
        self.tree.apply_batch(batch)?;
        self.tree.flush_async().await?;

        Ok(())
    }

    async fn pending_count(&self) -> Result<usize> {
        Ok(self.tree.scan_prefix([PENDING_PREFIX]).count())
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter<J>>> {
        let mut dead = Vec::new();
        for item in self.tree.scan_prefix([DEAD_PREFIX]) {
            let (_, value) = item?;
            dead.push(bincode::deserialize(&value)?);
        }
        Ok(dead)
    }
}

/// Pending keys sort by inverted priority so higher priorities pop first,
/// then by id for FIFO within a priority.
fn pending_key(priority: u8, id: u64) -> [u8; 10] {
    let mut key = [0_u8; 10];
    key[0] = PENDING_PREFIX;
    key[1] = u8::MAX - priority;
    key[2..].copy_from_slice(&id.to_be_bytes());
    key
}

fn inflight_key(id: u64) -> [u8; 9] {
    let mut key = [0_u8; 9];
    key[0] = INFLIGHT_PREFIX;
    key[1..].copy_from_slice(&id.to_be_bytes());
    key
}

fn dead_key(id: u64) -> [u8; 9] {
    let mut key = [0_u8; 9];
    key[0] = DEAD_PREFIX;
    key[1..].copy_from_slice(&id.to_be_bytes());
    key
}

/// In-memory queue with the same delivery semantics, minus durability.
/// Used by tests in place of a real broker.
pub struct InMemoryQueue<J> {
    state: Mutex<InMemoryState<J>>,
    notify: Notify,
}

struct InMemoryState<J> {
    next_id: u64,
    pending: Vec<Envelope<J>>,
    inflight: HashSet<u64>,
    dead: Vec<DeadLetter<J>>,
}

impl<J> InMemoryQueue<J> {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(InMemoryState {
                next_id: 0,
                pending: Vec::new(),
                inflight: HashSet::new(),
                dead: Vec::new(),
            }),
            notify: Notify::new(),
        }
    }
}

impl<J> Default for InMemoryQueue<J> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<J> JobQueue<J> for InMemoryQueue<J>
where
    J: Clone + Send + Sync + 'static,
{
    async fn push(&self, job: J, priority: u8) -> Result<()> {
        let mut state = self.state.lock().await;
        let id = state.next_id;
        state.next_id += 1;
        state.pending.push(Envelope {
            id,
            attempt: 1,
            priority,
            job,
        });
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    async fn pop(&self) -> Result<Delivery<J>> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().await;
                // Highest priority first, FIFO (lowest id) within a priority.
                let best = state
                    .pending
                    .iter()
                    .enumerate()
                    .max_by_key(|(_, e)| (e.priority, u64::MAX - e.id))
                    .map(|(i, _)| i);
                if let Some(index) = best {
                    let envelope = state.pending.remove(index);
                    state.inflight.insert(envelope.id);
                    return Ok(Delivery {
                        id: envelope.id,
                        attempt: envelope.attempt,
                        priority: envelope.priority,
                        job: envelope.job,
                    });
                }
            }
            notified.await;
        }
    }

    async fn ack(&self, delivery: Delivery<J>) -> Result<()> {
        let mut state = self.state.lock().await;
        state.inflight.remove(&delivery.id);
        Ok(())
    }

    async fn retry(&self, delivery: Delivery<J>) -> Result<()> {
        let mut state = self.state.lock().await;
        state.inflight.remove(&delivery.id);
        state.pending.push(Envelope {
            id: delivery.id,
            attempt: delivery.attempt + 1,
            priority: delivery.priority,
            job: delivery.job,
        });
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    async fn bury(&self, delivery: Delivery<J>, reason: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.inflight.remove(&delivery.id);
        state.dead.push(DeadLetter {
            id: delivery.id,
            attempt: delivery.attempt,
            job: delivery.job,
            reason: reason.to_string(),
            failed_at: Utc::now(),
        });
        Ok(())
    }

    async fn pending_count(&self) -> Result<usize> {
        Ok(self.state.lock().await.pending.len())
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter<J>>> {
        Ok(self.state.lock().await.dead.clone())
    }
}

/// Open the sled database that backs the durable queues
pub fn open_queue_db(path: &str) -> Result<sled::Db> {
    sled::open(path).map_err(|e| TriageError::Queue(format!("Failed to open queue db: {e}")))
}
