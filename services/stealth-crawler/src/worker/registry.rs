//! Result slot registry
//!
//! Maps request identifiers to single-assignment result slots. The worker
//! resolves slots as the engine completes items; the gateway awaits and
//! reclaims them. Every mutation goes through one lock that is never held
//! across an await, so `resolve` is safe to call from any thread.

use crate::error::SlotError;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use uuid::Uuid;

/// Identifier tying a work item to its result slot
pub type RequestId = Uuid;

/// Value stored in a resolved slot: engine output or a processing error message
pub type SlotValue<T> = std::result::Result<T, String>;

struct Slot<T> {
    /// Present while pending; taken on resolution
    tx: Option<oneshot::Sender<SlotValue<T>>>,
    /// Present until a waiter claims it
    rx: Option<oneshot::Receiver<SlotValue<T>>>,
}

impl<T> Slot<T> {
    fn pending() -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            tx: Some(tx),
            rx: Some(rx),
        }
    }

    fn is_pending(&self) -> bool {
        self.tx.is_some()
    }
}

/// Registry of in-flight result slots
pub struct SlotRegistry<T> {
    slots: Mutex<HashMap<RequestId, Slot<T>>>,
}

impl<T> Default for SlotRegistry<T> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> std::fmt::Debug for SlotRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotRegistry")
            .field("slots", &self.len())
            .finish()
    }
}

impl<T> SlotRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave a slot half-written, so a
    // poisoned map is still consistent.
    fn lock(&self) -> MutexGuard<'_, HashMap<RequestId, Slot<T>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a pending slot for `id`
    pub fn create(&self, id: RequestId) -> Result<(), SlotError> {
        let mut slots = self.lock();
        if slots.contains_key(&id) {
            return Err(SlotError::DuplicateIdentifier(id));
        }
        slots.insert(id, Slot::pending());
        Ok(())
    }

    /// Store the result for `id` and wake its waiter
    ///
    /// A slot can be resolved once. Later attempts fail with
    /// `AlreadyResolved` and leave the first value in place.
    pub fn resolve(&self, id: RequestId, value: SlotValue<T>) -> Result<(), SlotError> {
        let tx = {
            let mut slots = self.lock();
            let slot = slots
                .get_mut(&id)
                .ok_or(SlotError::UnknownIdentifier(id))?;
            slot.tx.take().ok_or(SlotError::AlreadyResolved(id))?
        };

        // The waiter may have given up (timeout) before the gateway cancelled
        // the slot; the value is simply dropped then.
        if tx.send(value).is_err() {
            tracing::debug!(request_id = %id, "Result resolved after waiter left");
        }
        Ok(())
    }

    /// Wait until `id` is resolved, then remove the slot and return its value
    ///
    /// Fails with `UnknownIdentifier` for ids that were never created or are
    /// already reclaimed, `AlreadyAwaited` if another task is waiting on the
    /// same id, and `Cancelled` if the slot is cancelled while waiting.
    ///
    /// Dropping the returned future leaves the slot registered; callers that
    /// abandon the wait must `cancel` the id.
    pub async fn await_and_reclaim(&self, id: RequestId) -> Result<SlotValue<T>, SlotError> {
        let rx = {
            let mut slots = self.lock();
            let slot = slots
                .get_mut(&id)
                .ok_or(SlotError::UnknownIdentifier(id))?;
            slot.rx.take().ok_or(SlotError::AlreadyAwaited(id))?
        };

        let outcome = rx.await;
        self.lock().remove(&id);
        outcome.map_err(|_| SlotError::Cancelled(id))
    }

    /// Remove `id` regardless of state, releasing a pending waiter with `Cancelled`
    ///
    /// Returns whether a slot was removed. Cancelling an absent id is a no-op.
    pub fn cancel(&self, id: RequestId) -> bool {
        // The sender is dropped outside the lock; that is what wakes the waiter.
        let removed = self.lock().remove(&id);
        removed.is_some()
    }

    /// Cancel every registered slot, returning how many were still pending
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<Slot<T>> = self.lock().drain().map(|(_, slot)| slot).collect();
        drained.iter().filter(|slot| slot.is_pending()).count()
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Number of slots still waiting for a result
    pub fn pending_count(&self) -> usize {
        self.lock().values().filter(|slot| slot.is_pending()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn resolve_then_await_returns_value_and_reclaims() {
        let registry = SlotRegistry::<u32>::new();
        let id = Uuid::new_v4();

        registry.create(id).unwrap();
        registry.resolve(id, Ok(7)).unwrap();

        assert_eq!(registry.await_and_reclaim(id).await, Ok(Ok(7)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn second_resolve_is_rejected_and_keeps_first_value() {
        let registry = SlotRegistry::<&str>::new();
        let id = Uuid::new_v4();
        registry.create(id).unwrap();

        registry.resolve(id, Ok("first")).unwrap();
        assert_eq!(
            registry.resolve(id, Ok("second")),
            Err(SlotError::AlreadyResolved(id))
        );

        assert_eq!(registry.await_and_reclaim(id).await, Ok(Ok("first")));
    }

    #[test]
    fn waiter_stays_pending_until_resolved() {
        let registry = SlotRegistry::<u32>::new();
        let id = Uuid::new_v4();
        registry.create(id).unwrap();

        let mut waiter = tokio_test::task::spawn(registry.await_and_reclaim(id));
        tokio_test::assert_pending!(waiter.poll());
        assert_eq!(registry.pending_count(), 1);

        registry.resolve(id, Ok(3)).unwrap();
        assert!(waiter.is_woken());
        tokio_test::assert_ready_eq!(waiter.poll(), Ok(Ok(3)));
        drop(waiter);
        assert!(registry.is_empty());
    }

    #[test]
    fn duplicate_create_is_rejected() {
        let registry = SlotRegistry::<()>::new();
        let id = Uuid::new_v4();
        registry.create(id).unwrap();
        assert_eq!(registry.create(id), Err(SlotError::DuplicateIdentifier(id)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn resolve_unknown_id_fails() {
        let registry = SlotRegistry::<()>::new();
        let id = Uuid::new_v4();
        assert_eq!(registry.resolve(id, Ok(())), Err(SlotError::UnknownIdentifier(id)));
    }

    #[tokio::test]
    async fn await_after_reclaim_is_unknown() {
        let registry = SlotRegistry::<u8>::new();
        let id = Uuid::new_v4();
        registry.create(id).unwrap();
        registry.resolve(id, Ok(1)).unwrap();
        registry.await_and_reclaim(id).await.unwrap();

        assert_eq!(
            registry.await_and_reclaim(id).await,
            Err(SlotError::UnknownIdentifier(id))
        );
    }

    #[tokio::test]
    async fn await_never_created_is_unknown() {
        let registry = SlotRegistry::<u8>::new();
        let id = Uuid::new_v4();
        assert_eq!(
            registry.await_and_reclaim(id).await,
            Err(SlotError::UnknownIdentifier(id))
        );
    }

    #[tokio::test]
    async fn concurrent_second_waiter_is_rejected() {
        let registry = Arc::new(SlotRegistry::<u8>::new());
        let id = Uuid::new_v4();
        registry.create(id).unwrap();

        let first = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.await_and_reclaim(id).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(
            registry.await_and_reclaim(id).await,
            Err(SlotError::AlreadyAwaited(id))
        );

        registry.resolve(id, Ok(3)).unwrap();
        assert_eq!(first.await.unwrap(), Ok(Ok(3)));
    }

    #[tokio::test]
    async fn cancel_releases_waiter() {
        let registry = Arc::new(SlotRegistry::<u8>::new());
        let id = Uuid::new_v4();
        registry.create(id).unwrap();

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.await_and_reclaim(id).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(registry.cancel(id));
        assert_eq!(waiter.await.unwrap(), Err(SlotError::Cancelled(id)));
        assert!(registry.is_empty());
    }

    #[test]
    fn resolve_after_cancel_reports_unknown() {
        let registry = SlotRegistry::<u8>::new();
        let id = Uuid::new_v4();
        registry.create(id).unwrap();
        assert!(registry.cancel(id));
        assert!(!registry.cancel(id));
        assert_eq!(registry.resolve(id, Ok(1)), Err(SlotError::UnknownIdentifier(id)));
    }

    #[test]
    fn cancel_all_counts_pending_slots() {
        let registry = SlotRegistry::<u8>::new();
        let ids: Vec<_> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            registry.create(*id).unwrap();
        }
        registry.resolve(ids[0], Ok(0)).unwrap();

        assert_eq!(registry.pending_count(), 2);
        assert_eq!(registry.cancel_all(), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn concurrent_create_and_resolve_from_threads() {
        let registry = Arc::new(SlotRegistry::<usize>::new());
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let id = Uuid::new_v4();
                        registry.create(id).unwrap();
                        registry.resolve(id, Ok(n * 1000 + i)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.len(), 800);
        assert_eq!(registry.pending_count(), 0);
    }
}
