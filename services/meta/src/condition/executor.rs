//! Single worker delay executor.
//!
//! Items scheduled on the executor are handed to its handler, one at a
//! time, once their delay has elapsed. The handler decides whether an item
//! is finished or should run again; re-submission is done by the worker
//! loop, never by the item itself.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::delay_queue::{DelayQueue, QueueFull};

/// Errors that can occur when starting the executor.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// There is no tokio runtime to spawn the worker on.
    #[error("no runtime available to start worker {0}")]
    NoRuntime(String),
}

/// What the worker should do with an item after handling it.
#[derive(Debug)]
pub enum Disposition<T> {
    /// The item is done and is dropped.
    Finished,

    /// Run the item again after the given delay.
    Reschedule(Duration, T),
}

/// Processes items as they become ready.
#[async_trait]
pub trait DelayedHandler<T>: Send + Sync + 'static {
    async fn handle(&self, item: T) -> Disposition<T>;
}

struct Shared<T> {
    queue: Mutex<DelayQueue<T>>,
    wake: Notify,
}

impl<T> Shared<T> {
    fn lock_queue(&self) -> MutexGuard<'_, DelayQueue<T>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }
}

struct Worker {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Delay executor backed by a bounded [`DelayQueue`].
pub struct DelayExecutor<T, H> {
    name: String,
    shared: Arc<Shared<T>>,
    handler: Arc<H>,
    worker: Mutex<Option<Worker>>,
}

impl<T, H> DelayExecutor<T, H>
where
    T: Send + 'static,
    H: DelayedHandler<T>,
{
    /// Create a stopped executor holding at most `capacity` pending items.
    pub fn new(name: impl Into<String>, capacity: usize, handler: H) -> Self {
        Self {
            name: name.into(),
            shared: Arc::new(Shared {
                queue: Mutex::new(DelayQueue::new(capacity)),
                wake: Notify::new(),
            }),
            handler: Arc::new(handler),
            worker: Mutex::new(None),
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Queue `item` to be handled after `delay`.
    ///
    /// Items may be scheduled while the worker is stopped; they run once it
    /// starts.
    pub fn schedule(&self, delay: Duration, item: T) -> Result<(), QueueFull<T>> {
        self.shared.lock_queue().push(delay, item)?;
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Spawn the worker on the current runtime.
    ///
    /// Starting a running executor is a no-op.
    pub fn start(&self) -> Result<(), ExecutorError> {
        let mut worker = self.lock_worker();
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            debug!(worker = %self.name, "Delay executor already running");
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| ExecutorError::NoRuntime(self.name.clone()))?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = runtime.spawn(run_worker(
            self.name.clone(),
            self.shared.clone(),
            self.handler.clone(),
            shutdown_rx,
        ));
        *worker = Some(Worker {
            shutdown_tx,
            handle,
        });

        info!(worker = %self.name, "Delay executor started");
        Ok(())
    }

    /// Stop the worker, letting an in-flight item finish first.
    ///
    /// Pending items stay queued; see [`DelayExecutor::clear`].
    pub async fn stop(&self) {
        let worker = self.lock_worker().take();
        let Some(worker) = worker else {
            return;
        };

        let _ = worker.shutdown_tx.send(true);
        if let Err(e) = worker.handle.await {
            warn!(worker = %self.name, error = %e, "Delay executor worker did not exit cleanly");
        }
        info!(worker = %self.name, "Delay executor stopped");
    }

    /// Drop every pending item without handling it.
    pub fn clear(&self) -> usize {
        self.shared.lock_queue().clear()
    }

    pub fn is_running(&self) -> bool {
        self.lock_worker()
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    /// Number of items waiting in the queue.
    pub fn pending(&self) -> usize {
        self.shared.lock_queue().len()
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<T, H> Drop for DelayExecutor<T, H> {
    fn drop(&mut self) {
        let worker = self
            .worker
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(worker) = worker {
            let _ = worker.shutdown_tx.send(true);
        }
        self.shared.lock_queue().clear();
    }
}

#[instrument(skip_all, fields(worker = %name))]
async fn run_worker<T, H>(
    name: String,
    shared: Arc<Shared<T>>,
    handler: Arc<H>,
    mut shutdown: watch::Receiver<bool>,
) where
    T: Send + 'static,
    H: DelayedHandler<T>,
{
    debug!("Delay executor worker running");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let next = shared.lock_queue().next_deadline();
        let sleep = async move {
            match next {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = shared.wake.notified() => {
                // Queue changed; recompute the next deadline.
            }
            _ = sleep => {
                let ready = shared.lock_queue().pop_ready(Instant::now());
                let Some(item) = ready else {
                    continue;
                };

                match handler.handle(item).await {
                    Disposition::Finished => shared.lock_queue().release(),
                    Disposition::Reschedule(delay, item) => {
                        shared.lock_queue().requeue(delay, item);
                    }
                }
            }
        }
    }

    debug!("Delay executor worker exiting");
}
