/// Integration tests for the request/result correlation path
///
/// Each test drives a real worker and gateway with an in-test engine, so
/// ordering and completion are fully controlled without network access.
use async_trait::async_trait;
use stealth_crawler::{
    CrawlerError, Engine, FetchError, Gateway, PageTitle, Result, SlotRegistry, WorkItem, Worker,
    WorkerConfig,
};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use uuid::Uuid;

/// Parks every item until the test releases it by hand
#[derive(Clone, Default)]
struct ManualEngine {
    parked: Arc<Mutex<Vec<(u32, oneshot::Sender<u32>)>>>,
}

impl ManualEngine {
    fn parked(&self) -> usize {
        self.parked.lock().unwrap().len()
    }

    fn take_parked(&self) -> Vec<(u32, oneshot::Sender<u32>)> {
        std::mem::take(&mut *self.parked.lock().unwrap())
    }
}

#[async_trait]
impl Engine for ManualEngine {
    type Payload = u32;
    type Output = u32;

    fn name(&self) -> &str {
        "manual"
    }

    async fn process(&self, n: u32) -> Result<u32> {
        let (tx, rx) = oneshot::channel();
        self.parked.lock().unwrap().push((n, tx));
        rx.await
            .map_err(|_| CrawlerError::ServerError(format!("item {} released without value", n)))
    }
}

/// Upper-cases the payload into a page title
struct UpperTitle;

#[async_trait]
impl Engine for UpperTitle {
    type Payload = String;
    type Output = PageTitle;

    fn name(&self) -> &str {
        "upper"
    }

    async fn process(&self, payload: String) -> Result<PageTitle> {
        Ok(PageTitle {
            title: payload.to_uppercase(),
        })
    }
}

/// Never completes an item
struct Stuck;

#[async_trait]
impl Engine for Stuck {
    type Payload = ();
    type Output = ();

    fn name(&self) -> &str {
        "stuck"
    }

    async fn process(&self, _: ()) -> Result<()> {
        std::future::pending().await
    }
}

async fn wait_until(mut ready: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !ready() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn reverse_order_completion_reaches_each_caller() {
    let engine = ManualEngine::default();
    let config = WorkerConfig::builder()
        .queue_capacity(128)
        .max_concurrency(128)
        .build();
    let gateway = Gateway::start(engine.clone(), config, Duration::from_secs(10));

    let callers: Vec<_> = (0..100u32)
        .map(|n| {
            let gateway = gateway.clone();
            tokio::spawn(async move { (n, gateway.fetch_default(n).await) })
        })
        .collect();

    wait_until(|| engine.parked() == 100).await;
    assert_eq!(gateway.registry().len(), 100);

    let mut parked = engine.take_parked();
    parked.sort_by_key(|(n, _)| *n);
    for (n, tx) in parked.into_iter().rev() {
        tx.send(n * 2).unwrap();
    }

    for caller in callers {
        let (n, result) = caller.await.unwrap();
        assert_eq!(result, Ok(n * 2), "caller {} got someone else's result", n);
    }
    assert!(gateway.registry().is_empty());

    gateway.shutdown().await;
}

#[tokio::test]
async fn single_item_resolves_and_registry_is_empty() {
    let registry = Arc::new(SlotRegistry::new());
    let worker = Worker::start(UpperTitle, Arc::clone(&registry), WorkerConfig::default());

    let id = Uuid::new_v4();
    registry.create(id).unwrap();
    worker
        .submit(WorkItem {
            id,
            payload: "x".to_string(),
        })
        .unwrap();

    let value = registry.await_and_reclaim(id).await.unwrap();
    assert_eq!(
        value,
        Ok(PageTitle {
            title: "X".to_string()
        })
    );
    assert!(registry.is_empty());
    assert!(!registry.contains(id));

    worker.shutdown().await;
}

#[tokio::test]
async fn gateway_fetch_leaves_no_slot_behind() {
    let gateway = Gateway::start(UpperTitle, WorkerConfig::default(), Duration::from_secs(5));

    let page = gateway.fetch_default("x".to_string()).await.unwrap();
    assert_eq!(page.title, "X");
    assert!(gateway.registry().is_empty());

    gateway.shutdown().await;
}

#[tokio::test]
async fn stuck_engine_times_out_within_bound() {
    let gateway = Gateway::start(Stuck, WorkerConfig::default(), Duration::from_secs(30));
    let timeout = Duration::from_millis(100);

    let started = Instant::now();
    let result = gateway.fetch((), timeout).await;
    let elapsed = started.elapsed();

    assert_eq!(result, Err(FetchError::Timeout(timeout)));
    assert!(result.unwrap_err().is_retryable());
    assert!(elapsed >= timeout);
    assert!(elapsed < timeout + Duration::from_millis(500), "took {:?}", elapsed);
    assert!(gateway.registry().is_empty());

    gateway.shutdown().await;
}

#[tokio::test]
async fn shutdown_cancels_pending_requests() {
    let grace = Duration::from_millis(100);
    let config = WorkerConfig::builder().shutdown_grace(grace).build();
    let gateway = Gateway::start(Stuck, config, Duration::from_secs(30));

    let pending: Vec<_> = (0..3)
        .map(|_| {
            let gateway = gateway.clone();
            tokio::spawn(async move { gateway.fetch_default(()).await })
        })
        .collect();

    wait_until(|| gateway.registry().len() == 3).await;

    let started = Instant::now();
    gateway.shutdown().await;

    for handle in pending {
        assert_eq!(handle.await.unwrap(), Err(FetchError::Cancelled));
    }
    assert!(started.elapsed() < grace + Duration::from_secs(1));
    assert!(gateway.registry().is_empty());
    assert!(!gateway.worker().is_accepting());
}

#[tokio::test]
async fn fetch_after_shutdown_is_rejected_without_leaking() {
    let gateway = Gateway::start(UpperTitle, WorkerConfig::default(), Duration::from_secs(5));
    gateway.shutdown().await;

    let result = gateway.fetch_default("x".to_string()).await;
    assert!(matches!(result, Err(FetchError::SubmissionFailed(_))));
    assert!(gateway.registry().is_empty());
}

#[tokio::test]
async fn late_completion_after_cancel_is_ignored() {
    let engine = ManualEngine::default();
    let registry = Arc::new(SlotRegistry::new());
    let worker = Worker::start(engine.clone(), Arc::clone(&registry), WorkerConfig::default());

    let id = Uuid::new_v4();
    registry.create(id).unwrap();
    worker.submit(WorkItem { id, payload: 7 }).unwrap();
    wait_until(|| engine.parked() == 1).await;

    assert!(registry.cancel(id));
    for (n, tx) in engine.take_parked() {
        tx.send(n).unwrap();
    }

    // the worker keeps serving after the orphaned completion
    let next = Uuid::new_v4();
    registry.create(next).unwrap();
    worker.submit(WorkItem { id: next, payload: 8 }).unwrap();
    wait_until(|| engine.parked() == 1).await;
    for (n, tx) in engine.take_parked() {
        tx.send(n + 1).unwrap();
    }
    assert_eq!(registry.await_and_reclaim(next).await, Ok(Ok(9)));
    assert!(registry.is_empty());

    worker.shutdown().await;
}

#[tokio::test]
async fn timed_out_queued_item_is_never_processed() {
    let engine = ManualEngine::default();
    let config = WorkerConfig::builder()
        .queue_capacity(4)
        .max_concurrency(1)
        .build();
    let gateway = Gateway::start(engine.clone(), config, Duration::from_secs(5));

    let first = {
        let gateway = gateway.clone();
        tokio::spawn(async move { gateway.fetch_default(1).await })
    };
    wait_until(|| engine.parked() == 1).await;

    // queued behind the busy engine until its caller gives up
    let abandoned = gateway.fetch(2, Duration::from_millis(50)).await;
    assert_eq!(abandoned, Err(FetchError::Timeout(Duration::from_millis(50))));

    for (n, tx) in engine.take_parked() {
        tx.send(n).unwrap();
    }
    assert_eq!(first.await.unwrap(), Ok(1));

    let next = {
        let gateway = gateway.clone();
        tokio::spawn(async move { gateway.fetch_default(3).await })
    };
    wait_until(|| engine.parked() == 1).await;
    let parked = engine.take_parked();
    assert_eq!(parked.iter().map(|(n, _)| *n).collect::<Vec<_>>(), vec![3]);
    for (n, tx) in parked {
        tx.send(n).unwrap();
    }
    assert_eq!(next.await.unwrap(), Ok(3));
    assert!(gateway.registry().is_empty());

    gateway.shutdown().await;
}
