//! Request gateway - the caller-facing side of the worker
//!
//! `fetch` looks synchronous to the caller: it registers a slot, submits the
//! payload to the worker and waits for that one slot, with a timeout. The
//! slot is gone from the registry on every exit path, including the caller's
//! future being dropped mid-wait.

use crate::engine::Engine;
use crate::error::FetchError;
use crate::worker::registry::{RequestId, SlotRegistry};
use crate::worker::runner::{WorkItem, Worker};
use crate::worker::WorkerConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Removes the slot when the fetch ends, however it ends.
struct SlotGuard<'a, T> {
    registry: &'a SlotRegistry<T>,
    id: RequestId,
}

impl<T> Drop for SlotGuard<'_, T> {
    fn drop(&mut self) {
        if self.registry.cancel(self.id) {
            debug!(request_id = %self.id, "Reclaimed abandoned slot");
        }
    }
}

/// Submits work to a [`Worker`] and waits for the matching result
pub struct Gateway<E: Engine> {
    worker: Arc<Worker<E>>,
    default_timeout: Duration,
}

impl<E: Engine> Clone for Gateway<E> {
    fn clone(&self) -> Self {
        Self {
            worker: Arc::clone(&self.worker),
            default_timeout: self.default_timeout,
        }
    }
}

impl<E: Engine> Gateway<E> {
    pub fn new(worker: Arc<Worker<E>>, default_timeout: Duration) -> Self {
        Self {
            worker,
            default_timeout,
        }
    }

    /// Start a worker for `engine` with a fresh registry and wrap it in a gateway
    pub fn start(engine: E, config: WorkerConfig, default_timeout: Duration) -> Self {
        let worker = Worker::start(engine, Arc::new(SlotRegistry::new()), config);
        Self::new(Arc::new(worker), default_timeout)
    }

    /// Process `payload` and wait at most `timeout` for its result
    pub async fn fetch(&self, payload: E::Payload, timeout: Duration) -> Result<E::Output, FetchError> {
        let id = Uuid::new_v4();
        let registry = self.registry();

        registry.create(id)?;
        let _guard = SlotGuard { registry, id };

        if let Err(e) = self.worker.submit(WorkItem { id, payload }) {
            warn!(engine = self.worker.engine_name(), request_id = %id, "Submission failed: {}", e);
            return Err(FetchError::SubmissionFailed(e));
        }

        let value = match tokio::time::timeout(timeout, registry.await_and_reclaim(id)).await {
            Ok(outcome) => outcome?,
            Err(_) => {
                warn!(
                    engine = self.worker.engine_name(),
                    request_id = %id,
                    "Request timed out after {:?}", timeout
                );
                return Err(FetchError::Timeout(timeout));
            }
        };

        value.map_err(FetchError::ProcessingFailed)
    }

    /// `fetch` with the gateway's default timeout
    pub async fn fetch_default(&self, payload: E::Payload) -> Result<E::Output, FetchError> {
        self.fetch(payload, self.default_timeout).await
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn registry(&self) -> &SlotRegistry<E::Output> {
        self.worker.registry()
    }

    pub fn worker(&self) -> &Arc<Worker<E>> {
        &self.worker
    }

    /// Shut the underlying worker down; pending fetches return `Cancelled`
    pub async fn shutdown(&self) {
        self.worker.shutdown().await;
    }
}
