//! Bounded task executor with overflow fallback
//!
//! N workers drain one bounded queue. When the queue is full the pool stays
//! responsive instead of blocking: plain submissions run on an ephemeral
//! spawned task, scoped submissions run directly on the caller.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as SyncMutex};
use std::time::Instant;

use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
type Job = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>>;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker pool not started")]
    NotStarted,
    #[error("worker pool already started")]
    AlreadyStarted,
    #[error("worker pool stopped")]
    Stopped,
    #[error("task cancelled")]
    Cancelled,
    #[error("worker dropped the task result")]
    ResultDropped,
    #[error("{0}")]
    Task(BoxError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Created,
    Started,
    Stopped,
}

/// Counter snapshot for the health endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkerPoolStats {
    pub max_workers: usize,
    pub active_workers: usize,
    pub total_tasks: u64,
    pub failed_tasks: u64,
    pub avg_exec_time_ms: f64,
    pub queue_depth: usize,
    pub queue_capacity: usize,
}

struct Shared {
    quit: CancellationToken,
    active: AtomicUsize,
    total: AtomicU64,
    failed: AtomicU64,
    avg_exec_nanos: AtomicU64,
}

impl Shared {
    async fn execute(&self, job: Job) {
        self.active.fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();

        if job.await.is_err() {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }

        // smoothed average over (old, new) with weights (9, 1)
        let sample = start.elapsed().as_nanos() as u64;
        let old = self.avg_exec_nanos.load(Ordering::Relaxed);
        let smoothed = old
            .saturating_mul(9)
            .saturating_add(sample)
            / 10;
        self.avg_exec_nanos.store(smoothed, Ordering::Relaxed);

        self.active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Fixed-size worker pool over a bounded queue of depth
/// `max_workers × queue_multiplier`.
pub struct WorkerPool {
    max_workers: usize,
    queue_capacity: usize,
    tx: mpsc::Sender<Job>,
    rx_slot: SyncMutex<Option<mpsc::Receiver<Job>>>,
    state: SyncMutex<State>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    shared: Arc<Shared>,
}

impl WorkerPool {
    pub fn new(max_workers: usize, queue_multiplier: usize) -> Self {
        let max_workers = max_workers.max(1);
        let queue_capacity = max_workers * queue_multiplier.max(1);
        let (tx, rx) = mpsc::channel(queue_capacity);

        Self {
            max_workers,
            queue_capacity,
            tx,
            rx_slot: SyncMutex::new(Some(rx)),
            state: SyncMutex::new(State::Created),
            handles: Mutex::new(Vec::new()),
            shared: Arc::new(Shared {
                quit: CancellationToken::new(),
                active: AtomicUsize::new(0),
                total: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                avg_exec_nanos: AtomicU64::new(0),
            }),
        }
    }

    /// Spawn the workers. Fails if called twice or after `stop`.
    pub async fn start(&self) -> Result<(), PoolError> {
        {
            let mut state = self.state.lock().expect("pool state lock poisoned");
            match *state {
                State::Created => *state = State::Started,
                State::Started => return Err(PoolError::AlreadyStarted),
                State::Stopped => return Err(PoolError::Stopped),
            }
        }

        let rx = self
            .rx_slot
            .lock()
            .expect("pool receiver lock poisoned")
            .take()
            .ok_or(PoolError::Stopped)?;
        let rx = Arc::new(Mutex::new(rx));

        let mut handles = self.handles.lock().await;
        for id in 0..self.max_workers {
            let rx = rx.clone();
            let shared = self.shared.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let job = tokio::select! {
                        _ = shared.quit.cancelled() => break,
                        job = async { rx.lock().await.recv().await } => match job {
                            Some(job) => job,
                            None => break,
                        },
                    };
                    shared.execute(job).await;
                }
                debug!(worker = id, "worker exited");
            }));
        }
        Ok(())
    }

    /// Enqueue a fire-and-forget task. A full queue falls back to an
    /// ephemeral spawned worker rather than blocking or failing.
    pub fn submit<F>(&self, fut: F) -> Result<(), PoolError>
    where
        F: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.ensure_started()?;

        match self.tx.try_send(Box::pin(fut)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job)) => {
                let shared = self.shared.clone();
                tokio::spawn(async move {
                    shared.execute(job).await;
                });
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(PoolError::Stopped),
        }
    }

    /// Run a task through the pool and wait for its result, bounded by the
    /// token. Cancellation unblocks the caller immediately; the worker
    /// still finishes the task and its result is dropped. A full queue
    /// runs the task synchronously on the caller.
    pub async fn submit_scoped<T, F>(
        &self,
        token: CancellationToken,
        fut: F,
    ) -> Result<T, PoolError>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, BoxError>> + Send + 'static,
    {
        self.ensure_started()?;

        let (out_tx, out_rx) = oneshot::channel::<Result<T, BoxError>>();
        let job: Job = Box::pin(async move {
            let result = fut.await;
            let status = if result.is_err() {
                Err("task failed".into())
            } else {
                Ok(())
            };
            let _ = out_tx.send(result);
            status
        });

        match self.tx.try_send(job) {
            Ok(()) => {
                tokio::select! {
                    _ = token.cancelled() => Err(PoolError::Cancelled),
                    out = out_rx => match out {
                        Ok(result) => result.map_err(PoolError::Task),
                        Err(_) => Err(PoolError::ResultDropped),
                    },
                }
            }
            Err(TrySendError::Full(job)) => {
                self.shared.execute(job).await;
                match out_rx.await {
                    Ok(result) => result.map_err(PoolError::Task),
                    Err(_) => Err(PoolError::ResultDropped),
                }
            }
            Err(TrySendError::Closed(_)) => Err(PoolError::Stopped),
        }
    }

    /// Cancel the quit signal and join all workers. Idempotent.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock().expect("pool state lock poisoned");
            if *state != State::Started {
                *state = State::Stopped;
                return;
            }
            *state = State::Stopped;
        }

        self.shared.quit.cancel();
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
    }

    pub fn stats(&self) -> WorkerPoolStats {
        WorkerPoolStats {
            max_workers: self.max_workers,
            active_workers: self.shared.active.load(Ordering::Relaxed),
            total_tasks: self.shared.total.load(Ordering::Relaxed),
            failed_tasks: self.shared.failed.load(Ordering::Relaxed),
            avg_exec_time_ms: self.shared.avg_exec_nanos.load(Ordering::Relaxed) as f64 / 1e6,
            queue_depth: self.queue_capacity - self.tx.capacity(),
            queue_capacity: self.queue_capacity,
        }
    }

    fn ensure_started(&self) -> Result<(), PoolError> {
        match *self.state.lock().expect("pool state lock poisoned") {
            State::Created => Err(PoolError::NotStarted),
            State::Started => Ok(()),
            State::Stopped => Err(PoolError::Stopped),
        }
    }
}
