//! Time-windowed batching of admission requests.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{oneshot, watch, Notify};
use tokio::task::JoinHandle;

use crate::error::{ControllerError, Result};
use crate::model::RoutingDeclaration;
use crate::observability::metrics;

/// Validates a whole batch of declarations at once.
#[async_trait]
pub trait BatchValidator: Send + Sync {
    async fn validate_batch(&self, batch: &[RoutingDeclaration]) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct BatcherOptions {
    /// Minimum spacing between two consumed batches.
    pub window: Duration,
    pub workers: usize,
    /// Per-call wait budget.
    pub deadline: Duration,
}

impl Default for BatcherOptions {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(3),
            workers: 10,
            deadline: Duration::from_secs(30),
        }
    }
}

type Verdict = oneshot::Sender<Result<()>>;

#[derive(Default)]
struct Batch {
    declarations: Vec<RoutingDeclaration>,
    waiters: Vec<Verdict>,
}

impl Batch {
    fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}

struct State {
    pending: Batch,
    last_consumed: Option<Instant>,
    running: bool,
}

struct Inner {
    state: Mutex<State>,
    work: Notify,
    stop: watch::Sender<bool>,
    validator: Arc<dyn BatchValidator>,
    options: BatcherOptions,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        // Nothing panics while holding the lock, but stay usable if it ever does.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Collects concurrent admission requests and validates them together.
pub struct AdmissionBatcher {
    inner: Arc<Inner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl AdmissionBatcher {
    /// Create a stopped batcher; call [`start`](Self::start) to accept work.
    pub fn new(validator: Arc<dyn BatchValidator>, options: BatcherOptions) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    pending: Batch::default(),
                    last_consumed: None,
                    running: false,
                }),
                work: Notify::new(),
                stop,
                validator,
                options,
            }),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the worker tasks. Must be called inside a Tokio runtime.
    pub fn start(&self) {
        {
            let mut state = self.inner.lock();
            if state.running {
                return;
            }
            state.running = true;
        }
        self.inner.stop.send_replace(false);

        let mut workers = self.workers.lock().unwrap_or_else(|p| p.into_inner());
        for id in 0..self.inner.options.workers {
            let inner = Arc::clone(&self.inner);
            workers.push(tokio::spawn(worker_loop(inner, id)));
        }
        tracing::info!(
            workers = self.inner.options.workers,
            window = ?self.inner.options.window,
            "Admission batcher started"
        );
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }

    /// Number of requests waiting for the next batch.
    pub fn pending(&self) -> usize {
        self.inner.lock().pending.waiters.len()
    }

    /// Submit one declaration and wait for its batch verdict.
    pub async fn validate(&self, declaration: RoutingDeclaration) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.inner.lock();
            if !state.running {
                return Err(ControllerError::AdmissionUnavailable);
            }
            state.pending.declarations.push(declaration);
            state.pending.waiters.push(tx);
        }
        self.inner.work.notify_one();

        let deadline = self.inner.options.deadline;
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(verdict)) => verdict,
            // Sender dropped without an answer.
            Ok(Err(_)) => Err(ControllerError::AdmissionUnavailable),
            Err(_) => Err(ControllerError::AdmissionTimeout(deadline)),
        }
    }

    /// Stop accepting work, answer pending callers, and wait for workers.
    ///
    /// Batches already being validated finish and deliver their verdict.
    pub async fn stop(&self) {
        let abandoned = {
            let mut state = self.inner.lock();
            state.running = false;
            std::mem::take(&mut state.pending)
        };
        for waiter in abandoned.waiters {
            let _ = waiter.send(Err(ControllerError::AdmissionUnavailable));
        }
        self.inner.stop.send_replace(true);

        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|p| p.into_inner()));
        for worker in workers {
            let _ = worker.await;
        }
        tracing::info!("Admission batcher stopped");
    }
}

async fn worker_loop(inner: Arc<Inner>, id: usize) {
    let window = inner.options.window;
    let mut stop = inner.stop.subscribe();

    loop {
        let wait = {
            let state = inner.lock();
            if !state.running {
                break;
            }
            state
                .last_consumed
                .map(|t| t.elapsed())
                .filter(|since| *since < window)
                .map(|since| window - since)
        };
        if let Some(wait) = wait {
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = stop.changed() => {}
            }
            continue;
        }

        let batch = {
            let mut state = inner.lock();
            if state.pending.is_empty() {
                None
            } else {
                state.last_consumed = Some(Instant::now());
                Some(std::mem::take(&mut state.pending))
            }
        };

        match batch {
            Some(batch) => process(&inner, id, batch).await,
            None => {
                tokio::select! {
                    _ = inner.work.notified() => {}
                    _ = stop.changed() => {}
                }
            }
        }
    }
    tracing::debug!(worker = id, "Admission worker exiting");
}

async fn process(inner: &Inner, worker: usize, batch: Batch) {
    let size = batch.declarations.len();
    let started = Instant::now();
    let verdict = inner.validator.validate_batch(&batch.declarations).await;
    metrics::record_admission_batch(size, started.elapsed());

    match &verdict {
        Ok(()) => tracing::info!(worker, size, elapsed = ?started.elapsed(), "Admission batch accepted"),
        Err(e) => tracing::warn!(worker, size, error = %e, "Admission batch rejected"),
    }
    for waiter in batch.waiters {
        let _ = waiter.send(verdict.clone());
    }
}
