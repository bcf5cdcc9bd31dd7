//! Bounded job queue with a worker pool.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{JobError, QueueError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Jobs buffered before `enqueue` waits (and `try_enqueue` fails).
    pub capacity: usize,
    /// Number of worker tasks.
    pub concurrency: usize,
    /// Attempts per job, the first one included.
    pub max_attempts: u32,
    /// A retried job waits `retry_delay * attempt` before it is re-enqueued.
    pub retry_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            concurrency: 8,
            max_attempts: 5,
            retry_delay: Duration::from_millis(250),
        }
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job<T> {
    pub id: Uuid,
    /// 1 on the first delivery.
    pub attempt: u32,
    pub payload: T,
}

/// A job that ran out of attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter<T> {
    pub job: Job<T>,
    pub reason: String,
}

#[async_trait]
pub trait JobHandler<T>: Send + Sync + 'static {
    async fn handle(&self, job: &Job<T>) -> Result<(), JobError>;
}

// ---------------------------------------------------------------------------
// Producer side
// ---------------------------------------------------------------------------

/// Cloneable producer handle.
#[derive(Debug)]
pub struct QueueHandle<T> {
    tx: mpsc::Sender<Job<T>>,
}

impl<T> Clone for QueueHandle<T> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<T: Send + 'static> QueueHandle<T> {
    /// Enqueue `payload`, waiting for room if the queue is full.
    ///
    /// # Errors
    /// `QueueError::Closed` once the queue has shut down.
    pub async fn enqueue(&self, payload: T) -> Result<Uuid, QueueError> {
        let job = Job { id: Uuid::new_v4(), attempt: 1, payload };
        let id = job.id;
        self.tx.send(job).await.map_err(|_| QueueError::Closed)?;
        Ok(id)
    }

    /// Enqueue without waiting.
    ///
    /// # Errors
    /// `QueueError::Full` when the buffer is at capacity, `Closed` after shutdown.
    pub fn try_enqueue(&self, payload: T) -> Result<Uuid, QueueError> {
        let job = Job { id: Uuid::new_v4(), attempt: 1, payload };
        let id = job.id;
        self.tx.try_send(job).map_err(|err| match err {
            TrySendError::Full(_) => QueueError::Full,
            TrySendError::Closed(_) => QueueError::Closed,
        })?;
        Ok(id)
    }
}

// ---------------------------------------------------------------------------
// JobQueue
// ---------------------------------------------------------------------------

type DeadLetters<T> = Arc<Mutex<Vec<DeadLetter<T>>>>;

/// Owns the worker pool. Dropping every [`QueueHandle`] and calling
/// [`JobQueue::shutdown`] drains the buffered jobs and stops the workers.
pub struct JobQueue<T> {
    handle: QueueHandle<T>,
    workers: Vec<JoinHandle<()>>,
    dead_letters: DeadLetters<T>,
}

impl<T: Send + 'static> JobQueue<T> {
    /// Spawn `config.concurrency` workers feeding `handler`.
    pub fn start<H: JobHandler<T>>(handler: Arc<H>, config: QueueConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let dead_letters: DeadLetters<T> = Arc::default();

        let workers = (0..config.concurrency.max(1))
            .map(|worker| {
                let worker = Worker {
                    id: worker,
                    rx: rx.clone(),
                    retry_tx: tx.downgrade(),
                    handler: handler.clone(),
                    config: config.clone(),
                    dead_letters: dead_letters.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        info!(concurrency = config.concurrency, capacity = config.capacity, "job queue started");
        Self {
            handle: QueueHandle { tx },
            workers,
            dead_letters,
        }
    }

    pub fn handle(&self) -> QueueHandle<T> {
        self.handle.clone()
    }

    /// Remove and return the dead-lettered jobs collected so far.
    pub fn take_dead_letters(&self) -> Vec<DeadLetter<T>> {
        std::mem::take(&mut *self.dead_letters.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Stop accepting work from this queue's own handle and wait for the
    /// workers to drain the channel. Other live handles keep it open.
    /// Retries still waiting out their delay are dropped.
    pub async fn shutdown(self) -> Vec<DeadLetter<T>> {
        let Self { handle, workers, dead_letters } = self;
        drop(handle);
        for worker in workers {
            if let Err(err) = worker.await {
                error!(error = %err, "queue worker panicked");
            }
        }
        let remaining = std::mem::take(&mut *dead_letters.lock().unwrap_or_else(PoisonError::into_inner));
        info!("job queue stopped");
        remaining
    }
}

struct Worker<T, H> {
    id: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Job<T>>>>,
    retry_tx: mpsc::WeakSender<Job<T>>,
    handler: Arc<H>,
    config: QueueConfig,
    dead_letters: DeadLetters<T>,
}

impl<T: Send + 'static, H: JobHandler<T>> Worker<T, H> {
    async fn run(self) {
        loop {
            let job = self.rx.lock().await.recv().await;
            let Some(job) = job else {
                debug!(worker = self.id, "channel closed, worker exiting");
                return;
            };

            match self.handler.handle(&job).await {
                Ok(()) => debug!(worker = self.id, job_id = %job.id, attempt = job.attempt, "job done"),

                Err(JobError::Discard(reason)) => {
                    warn!(job_id = %job.id, attempt = job.attempt, %reason, "job discarded");
                }

                Err(JobError::Retry(reason)) if job.attempt >= self.config.max_attempts => {
                    error!(job_id = %job.id, attempts = job.attempt, %reason, "job dead-lettered");
                    self.dead_letters
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(DeadLetter { job, reason });
                }

                Err(JobError::Retry(reason)) => {
                    let delay = self.config.retry_delay.saturating_mul(job.attempt);
                    warn!(job_id = %job.id, attempt = job.attempt, ?delay, %reason, "job will be retried");
                    self.schedule_retry(Job { attempt: job.attempt + 1, ..job }, delay);
                }
            }
        }
    }

    fn schedule_retry(&self, job: Job<T>, delay: Duration) {
        let retry_tx = self.retry_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(tx) = retry_tx.upgrade() else {
                warn!(job_id = %job.id, "queue closed, dropping retry");
                return;
            };
            let job_id = job.id;
            if tx.send(job).await.is_err() {
                warn!(%job_id, "queue closed, dropping retry");
            }
        });
    }
}
