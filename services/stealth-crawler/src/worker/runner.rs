//! Worker loop - feeds work items to an engine and routes completions back
//! to the slot registry

use crate::engine::Engine;
use crate::error::{SlotError, SubmitError};
use crate::worker::registry::{RequestId, SlotRegistry, SlotValue};
use crate::worker::WorkerConfig;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A unit of work tagged with the id of the slot waiting for it
#[derive(Debug, Clone)]
pub struct WorkItem<P> {
    pub id: RequestId,
    pub payload: P,
}

/// Long-lived background worker around a single engine
///
/// The run loop stays alive while the queue is empty and only ends when
/// `shutdown` is called (or the worker is dropped).
pub struct Worker<E: Engine> {
    tx: mpsc::Sender<WorkItem<E::Payload>>,
    registry: Arc<SlotRegistry<E::Output>>,
    shutdown: CancellationToken,
    run_task: Mutex<Option<JoinHandle<()>>>,
    engine_name: String,
}

impl<E: Engine> Worker<E> {
    /// Spawn the run loop for `engine` on the current tokio runtime
    pub fn start(engine: E, registry: Arc<SlotRegistry<E::Output>>, config: WorkerConfig) -> Self {
        let engine_name = engine.name().to_string();
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let shutdown = CancellationToken::new();

        info!(
            engine = %engine_name,
            max_concurrency = config.max_concurrency,
            queue_capacity = config.queue_capacity,
            "Starting worker"
        );

        let run_task = tokio::spawn(run_loop(
            Arc::new(engine),
            rx,
            Arc::clone(&registry),
            shutdown.clone(),
            config,
        ));

        Self {
            tx,
            registry,
            shutdown,
            run_task: Mutex::new(Some(run_task)),
            engine_name,
        }
    }

    /// Enqueue an item without waiting
    pub fn submit(&self, item: WorkItem<E::Payload>) -> Result<(), SubmitError> {
        if self.shutdown.is_cancelled() {
            return Err(SubmitError::QueueClosed);
        }

        self.tx.try_send(item).map_err(|e| match e {
            TrySendError::Full(_) => SubmitError::QueueFull,
            TrySendError::Closed(_) => SubmitError::QueueClosed,
        })
    }

    pub fn registry(&self) -> &Arc<SlotRegistry<E::Output>> {
        &self.registry
    }

    pub fn engine_name(&self) -> &str {
        &self.engine_name
    }

    /// Whether `submit` can still accept work
    pub fn is_accepting(&self) -> bool {
        !self.shutdown.is_cancelled() && !self.tx.is_closed()
    }

    /// Items waiting in the queue, not yet picked up by the engine
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Stop the worker
    ///
    /// Stops accepting submissions, cancels queued items, gives in-flight
    /// items the configured grace period, waits for the run loop to exit and
    /// finally cancels every slot still pending. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let handle = self.run_task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(engine = %self.engine_name, "Worker loop ended abnormally: {}", e);
            }
        }

        let cancelled = self.registry.cancel_all();
        if cancelled > 0 {
            warn!(
                engine = %self.engine_name,
                "Cancelled {} pending requests on shutdown", cancelled
            );
        }
        info!(engine = %self.engine_name, "Worker stopped");
    }
}

impl<E: Engine> Drop for Worker<E> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run_loop<E: Engine>(
    engine: Arc<E>,
    mut rx: mpsc::Receiver<WorkItem<E::Payload>>,
    registry: Arc<SlotRegistry<E::Output>>,
    shutdown: CancellationToken,
    config: WorkerConfig,
) {
    let permits = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
    let mut in_flight = JoinSet::new();

    loop {
        // Take a permit before pulling from the queue so backlog stays in
        // the bounded channel instead of piling up as parked tasks.
        let permit = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let item = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            item = rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };

        while let Some(joined) = in_flight.try_join_next() {
            log_join(joined, engine.name());
        }

        // The caller gave up while the item sat in the queue
        if !registry.contains(item.id) {
            debug!(engine = engine.name(), request_id = %item.id, "Skipping abandoned work item");
            continue;
        }

        debug!(engine = engine.name(), request_id = %item.id, "Dispatching work item");
        in_flight.spawn(process_item(
            Arc::clone(&engine),
            Arc::clone(&registry),
            item,
            permit,
        ));
    }

    info!(engine = engine.name(), "Worker loop stopping");

    rx.close();
    let mut dropped = 0usize;
    while let Ok(item) = rx.try_recv() {
        registry.cancel(item.id);
        dropped += 1;
    }
    if dropped > 0 {
        info!(engine = engine.name(), "Dropped {} queued items", dropped);
    }

    let drained = tokio::time::timeout(config.shutdown_grace, async {
        while let Some(joined) = in_flight.join_next().await {
            log_join(joined, engine.name());
        }
    })
    .await;

    if drained.is_err() {
        warn!(
            engine = engine.name(),
            "Aborting {} in-flight items after {:?} grace period",
            in_flight.len(),
            config.shutdown_grace
        );
        in_flight.shutdown().await;
    }
}

async fn process_item<E: Engine>(
    engine: Arc<E>,
    registry: Arc<SlotRegistry<E::Output>>,
    item: WorkItem<E::Payload>,
    _permit: OwnedSemaphorePermit,
) {
    let WorkItem { id, payload } = item;

    let outcome = match AssertUnwindSafe(engine.process(payload)).catch_unwind().await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => {
            warn!(engine = engine.name(), request_id = %id, "Processing failed: {}", e);
            Err(e.to_string())
        }
        Err(_) => {
            error!(engine = engine.name(), request_id = %id, "Engine panicked while processing");
            Err(format!("{} engine panicked", engine.name()))
        }
    };

    complete(&registry, id, outcome);
}

/// Route one completion to its slot. Registry violations are logged, never raised.
fn complete<T>(registry: &SlotRegistry<T>, id: RequestId, outcome: SlotValue<T>) {
    match registry.resolve(id, outcome) {
        Ok(()) => debug!(request_id = %id, "Resolved"),
        Err(SlotError::UnknownIdentifier(_)) => {
            debug!(request_id = %id, "Completion for abandoned request ignored")
        }
        Err(e) => warn!(request_id = %id, "Ignoring completion: {}", e),
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>, engine: &str) {
    if let Err(e) = joined {
        if !e.is_cancelled() {
            error!(engine, "Work item task failed: {}", e);
        }
    }
}
