//! Request batching for the inference endpoint.
//!
//! Callers submit individual requests and await their own response; the
//! processor accumulates requests and dispatches them as batches, flushing
//! when the queue reaches `batch_size` or when `batch_timeout` has elapsed
//! since the last flush, whichever comes first. A fixed-interval tick drives
//! both conditions and opportunistically drains whenever batch capacity and
//! queue depth allow. Requests that age past their individual timeout are
//! rejected in place rather than sent. Responses are matched back to callers
//! positionally.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::time::{sleep, Duration, Instant, MissedTickBehavior};
use tracing::{debug, warn};
use uuid::Uuid;

use sift_core::{defaults, Error, Result};

/// Executes one accepted batch. Implementations must return exactly one
/// response per request, in request order.
#[async_trait]
pub trait BatchExecutor<Req, Res>: Send + Sync {
    async fn execute(&self, batch: Vec<Req>) -> Result<Vec<Res>>;
}

/// Batch processor configuration options.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Queue depth that triggers a flush regardless of the timer.
    pub batch_size: usize,
    /// Maximum time a partial batch waits before flushing anyway.
    pub batch_timeout: Duration,
    /// Ceiling on batches in flight.
    pub max_concurrent_batches: usize,
    /// Default age-out for an individual queued request.
    pub request_timeout: Duration,
    /// Fixed interval of the drain tick.
    pub tick_interval: Duration,
    /// Drain higher-priority requests first; FIFO within a priority.
    pub priority_ordering: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: defaults::BATCH_SIZE,
            batch_timeout: Duration::from_millis(defaults::BATCH_TIMEOUT_MS),
            max_concurrent_batches: defaults::MAX_CONCURRENT_BATCHES,
            request_timeout: Duration::from_millis(defaults::BATCH_REQUEST_TIMEOUT_MS),
            tick_interval: Duration::from_millis(defaults::BATCH_TICK_MS),
            priority_ordering: true,
        }
    }
}

impl BatchConfig {
    pub fn with_batch_size(mut self, n: usize) -> Self {
        self.batch_size = n.max(1);
        self
    }

    pub fn with_batch_timeout(mut self, t: Duration) -> Self {
        self.batch_timeout = t;
        self
    }

    pub fn with_max_concurrent_batches(mut self, n: usize) -> Self {
        self.max_concurrent_batches = n.max(1);
        self
    }

    pub fn with_request_timeout(mut self, t: Duration) -> Self {
        self.request_timeout = t;
        self
    }

    pub fn with_tick_interval(mut self, t: Duration) -> Self {
        self.tick_interval = t;
        self
    }
}

/// One queued request with its completion handle.
struct BatchTask<Req, Res> {
    #[allow(dead_code)]
    id: Uuid,
    payload: Req,
    priority: i32,
    enqueued_at: Instant,
    deadline: Instant,
    done_tx: oneshot::Sender<Result<Res>>,
}

struct BatchShared<Req, Res> {
    config: BatchConfig,
    queue: Mutex<Vec<BatchTask<Req, Res>>>,
    last_flush: Mutex<Instant>,
    active_batches: AtomicUsize,
    executor: Arc<dyn BatchExecutor<Req, Res>>,
    stopping: AtomicBool,
    submitted: AtomicU64,
    dispatched_batches: AtomicU64,
    timed_out: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    total_wait_ms: AtomicU64,
}

impl<Req, Res> BatchShared<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    /// Age out expired requests and dispatch every batch the flush rules
    /// currently allow. `final_flush` ignores the size/timer gates so `stop`
    /// can empty the queue.
    fn drain(self: &Arc<Self>, final_flush: bool) {
        let now = Instant::now();
        let mut ready: Vec<Vec<BatchTask<Req, Res>>> = Vec::new();

        {
            let mut queue = self.queue.lock().unwrap();

            // Reject aged-out requests in place rather than sending them.
            let tasks = std::mem::take(&mut *queue);
            let mut expired = 0u64;
            for task in tasks {
                if task.deadline <= now {
                    expired += 1;
                    let _ = task
                        .done_tx
                        .send(Err(Error::Timeout("request aged out in batch queue".into())));
                } else {
                    queue.push(task);
                }
            }
            if expired > 0 {
                self.timed_out.fetch_add(expired, Ordering::Relaxed);
                warn!(
                    subsystem = "inference",
                    component = "batcher",
                    expired,
                    "Rejected aged-out batch requests"
                );
            }

            if self.config.priority_ordering {
                // Stable sort: FIFO preserved within a priority.
                queue.sort_by(|a, b| b.priority.cmp(&a.priority));
            }

            let timer_due = {
                let last_flush = self.last_flush.lock().unwrap();
                now.duration_since(*last_flush) >= self.config.batch_timeout
            };

            loop {
                if queue.is_empty() {
                    break;
                }
                if self.active_batches.load(Ordering::SeqCst) + ready.len()
                    >= self.config.max_concurrent_batches
                {
                    break;
                }
                let size_due = queue.len() >= self.config.batch_size;
                if !(size_due || timer_due || final_flush) {
                    break;
                }
                let take = queue.len().min(self.config.batch_size);
                let batch: Vec<BatchTask<Req, Res>> = queue.drain(..take).collect();
                let wait_ms: u64 = batch
                    .iter()
                    .map(|t| now.duration_since(t.enqueued_at).as_millis() as u64)
                    .sum();
                self.total_wait_ms.fetch_add(wait_ms, Ordering::Relaxed);
                ready.push(batch);
            }
        }

        if ready.is_empty() {
            return;
        }

        *self.last_flush.lock().unwrap() = now;

        for batch in ready {
            self.active_batches.fetch_add(1, Ordering::SeqCst);
            self.dispatched_batches.fetch_add(1, Ordering::Relaxed);
            let shared = self.clone();
            tokio::spawn(async move {
                shared.dispatch(batch).await;
            });
        }
    }

    /// Execute one batch and resolve each caller's handle positionally.
    async fn dispatch(self: Arc<Self>, batch: Vec<BatchTask<Req, Res>>) {
        let len = batch.len();
        debug!(
            subsystem = "inference",
            component = "batcher",
            batch_len = len,
            "Dispatching batch"
        );

        let mut senders = Vec::with_capacity(len);
        let mut payloads = Vec::with_capacity(len);
        for task in batch {
            senders.push(task.done_tx);
            payloads.push(task.payload);
        }

        match self.executor.execute(payloads).await {
            Ok(responses) if responses.len() == len => {
                self.completed.fetch_add(len as u64, Ordering::Relaxed);
                for (tx, res) in senders.into_iter().zip(responses) {
                    let _ = tx.send(Ok(res));
                }
            }
            Ok(responses) => {
                self.failed.fetch_add(len as u64, Ordering::Relaxed);
                let msg = format!(
                    "batch returned {} responses for {} requests",
                    responses.len(),
                    len
                );
                for tx in senders {
                    let _ = tx.send(Err(Error::Inference(msg.clone())));
                }
            }
            Err(e) => {
                self.failed.fetch_add(len as u64, Ordering::Relaxed);
                let msg = e.to_string();
                for tx in senders {
                    let _ = tx.send(Err(Error::Inference(msg.clone())));
                }
            }
        }

        self.active_batches.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Batches individual embedding requests into one endpoint call, dispatched
/// through the concurrency limiter as a single unit of work.
pub struct EmbeddingBatchExecutor {
    backend: Arc<dyn sift_core::EmbeddingBackend>,
    limiter: crate::limiter::ConcurrencyLimiter,
    priority: i32,
    call_timeout: Duration,
}

impl EmbeddingBatchExecutor {
    pub fn new(
        backend: Arc<dyn sift_core::EmbeddingBackend>,
        limiter: crate::limiter::ConcurrencyLimiter,
        priority: i32,
        call_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            limiter,
            priority,
            call_timeout,
        }
    }
}

#[async_trait]
impl BatchExecutor<String, sift_core::Vector> for EmbeddingBatchExecutor {
    async fn execute(&self, batch: Vec<String>) -> Result<Vec<sift_core::Vector>> {
        let backend = self.backend.clone();
        self.limiter
            .execute(
                async move { backend.embed_texts(&batch).await },
                self.priority,
                Some(self.call_timeout),
            )
            .await
    }
}

/// Point-in-time batcher statistics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BatchStats {
    pub queued: usize,
    pub active_batches: usize,
    pub submitted: u64,
    pub dispatched_batches: u64,
    pub timed_out: u64,
    pub completed: u64,
    pub failed: u64,
    /// Cumulative queue-wait across all dispatched requests.
    pub total_wait_ms: u64,
}

/// Size-or-timeout request batcher.
pub struct BatchProcessor<Req, Res> {
    shared: Arc<BatchShared<Req, Res>>,
    tick_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl<Req, Res> BatchProcessor<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    /// Create a processor around the given executor and start its tick.
    pub fn start(config: BatchConfig, executor: Arc<dyn BatchExecutor<Req, Res>>) -> Self {
        let shared = Arc::new(BatchShared {
            config,
            queue: Mutex::new(Vec::new()),
            last_flush: Mutex::new(Instant::now()),
            active_batches: AtomicUsize::new(0),
            executor,
            stopping: AtomicBool::new(false),
            submitted: AtomicU64::new(0),
            dispatched_batches: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            total_wait_ms: AtomicU64::new(0),
        });

        let tick_shared = shared.clone();
        let handle = tokio::spawn(async move {
            let period = tick_shared.config.tick_interval.max(Duration::from_millis(1));
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await; // first tick is immediate
            loop {
                interval.tick().await;
                if tick_shared.stopping.load(Ordering::SeqCst) {
                    break;
                }
                tick_shared.drain(false);
            }
        });

        Self {
            shared,
            tick_handle: Mutex::new(Some(handle)),
        }
    }

    /// Submit a request with the default age-out and await its response.
    pub async fn submit(&self, payload: Req, priority: i32) -> Result<Res> {
        self.submit_with_timeout(payload, priority, self.shared.config.request_timeout)
            .await
    }

    /// Submit a request with an explicit age-out and await its response.
    pub async fn submit_with_timeout(
        &self,
        payload: Req,
        priority: i32,
        timeout: Duration,
    ) -> Result<Res> {
        if self.shared.stopping.load(Ordering::SeqCst) {
            return Err(Error::Queue("batch processor stopped".into()));
        }

        let (tx, rx) = oneshot::channel();
        {
            let now = Instant::now();
            let mut queue = self.shared.queue.lock().unwrap();
            queue.push(BatchTask {
                id: Uuid::new_v4(),
                payload,
                priority,
                enqueued_at: now,
                deadline: now + timeout,
                done_tx: tx,
            });
        }
        self.shared.submitted.fetch_add(1, Ordering::Relaxed);

        rx.await
            .map_err(|_| Error::Queue("batch processor dropped".into()))?
    }

    /// Graceful shutdown: stop accepting requests, drain the queue through
    /// one final flush, then wait for in-flight batches to finish.
    pub async fn stop(&self) {
        self.shared.stopping.store(true, Ordering::SeqCst);
        if let Some(handle) = self.tick_handle.lock().unwrap().take() {
            handle.abort();
        }

        loop {
            self.shared.drain(true);
            if self.shared.queue.lock().unwrap().is_empty() {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }

        while self.shared.active_batches.load(Ordering::SeqCst) > 0 {
            sleep(Duration::from_millis(20)).await;
        }
    }

    /// Current batcher statistics.
    pub fn stats(&self) -> BatchStats {
        BatchStats {
            queued: self.shared.queue.lock().unwrap().len(),
            active_batches: self.shared.active_batches.load(Ordering::SeqCst),
            submitted: self.shared.submitted.load(Ordering::Relaxed),
            dispatched_batches: self.shared.dispatched_batches.load(Ordering::Relaxed),
            timed_out: self.shared.timed_out.load(Ordering::Relaxed),
            completed: self.shared.completed.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            total_wait_ms: self.shared.total_wait_ms.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Echoes each request string back uppercased, recording batch sizes.
    struct EchoExecutor {
        batch_sizes: Mutex<Vec<usize>>,
        delay: Duration,
    }

    impl EchoExecutor {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                batch_sizes: Mutex::new(Vec::new()),
                delay,
            })
        }
    }

    #[async_trait]
    impl BatchExecutor<String, String> for EchoExecutor {
        async fn execute(&self, batch: Vec<String>) -> Result<Vec<String>> {
            self.batch_sizes.lock().unwrap().push(batch.len());
            if !self.delay.is_zero() {
                sleep(self.delay).await;
            }
            Ok(batch.into_iter().map(|s| s.to_uppercase()).collect())
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl BatchExecutor<String, String> for FailingExecutor {
        async fn execute(&self, _batch: Vec<String>) -> Result<Vec<String>> {
            Err(Error::Inference("backend exploded".into()))
        }
    }

    fn config(batch_size: usize, timeout_ms: u64) -> BatchConfig {
        BatchConfig::default()
            .with_batch_size(batch_size)
            .with_batch_timeout(Duration::from_millis(timeout_ms))
            .with_request_timeout(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_single_request_flushes_within_batch_timeout() {
        let executor = EchoExecutor::new(Duration::ZERO);
        let batcher = BatchProcessor::start(config(8, 50), executor.clone());

        let started = Instant::now();
        let res = batcher.submit("hello".to_string(), 0).await.unwrap();
        assert_eq!(res, "HELLO");
        assert!(
            started.elapsed() <= Duration::from_millis(200),
            "lone request must not wait for a full batch"
        );
    }

    #[tokio::test]
    async fn test_size_triggered_flush_groups_requests() {
        let executor = EchoExecutor::new(Duration::ZERO);
        let batcher = Arc::new(BatchProcessor::start(config(3, 10_000), executor.clone()));

        let mut handles = Vec::new();
        for s in ["a", "b", "c"] {
            let b = batcher.clone();
            let s = s.to_string();
            handles.push(tokio::spawn(async move { b.submit(s, 0).await }));
        }

        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap().unwrap());
        }
        results.sort();
        assert_eq!(results, vec!["A", "B", "C"]);

        // All three went out in a single batch (timer was far away).
        assert_eq!(*executor.batch_sizes.lock().unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn test_positional_response_matching() {
        let executor = EchoExecutor::new(Duration::ZERO);
        let batcher = Arc::new(BatchProcessor::start(config(2, 20), executor));

        let b1 = batcher.clone();
        let h1 = tokio::spawn(async move { b1.submit("first".to_string(), 0).await });
        let b2 = batcher.clone();
        let h2 = tokio::spawn(async move { b2.submit("second".to_string(), 0).await });

        assert_eq!(h1.await.unwrap().unwrap(), "FIRST");
        assert_eq!(h2.await.unwrap().unwrap(), "SECOND");
    }

    #[tokio::test]
    async fn test_executor_failure_rejects_each_caller() {
        let batcher = BatchProcessor::start(config(1, 20), Arc::new(FailingExecutor));

        let err = batcher.submit("x".to_string(), 0).await;
        match err {
            Err(Error::Inference(msg)) => assert!(msg.contains("backend exploded")),
            other => panic!("expected inference error, got {other:?}"),
        }
        assert_eq!(batcher.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_aged_out_request_rejected_without_dispatch() {
        let executor = EchoExecutor::new(Duration::ZERO);
        // Huge batch size and timer so nothing flushes organically.
        let batcher = BatchProcessor::start(
            BatchConfig::default()
                .with_batch_size(100)
                .with_batch_timeout(Duration::from_secs(60)),
            executor.clone(),
        );

        let err = batcher
            .submit_with_timeout("late".to_string(), 0, Duration::from_millis(10))
            .await;
        assert!(matches!(err, Err(Error::Timeout(_))));
        assert!(executor.batch_sizes.lock().unwrap().is_empty());
        assert_eq!(batcher.stats().timed_out, 1);
    }

    struct FixedEmbedder;

    #[async_trait]
    impl sift_core::EmbeddingBackend for FixedEmbedder {
        async fn embed_texts(&self, texts: &[String]) -> Result<Vec<sift_core::Vector>> {
            Ok(texts.iter().map(|t| vec![t.len() as f32]).collect())
        }

        fn dimension(&self) -> usize {
            1
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    #[tokio::test]
    async fn test_embedding_batches_route_through_limiter() {
        let limiter = crate::limiter::ConcurrencyLimiter::with_defaults();
        let executor = EmbeddingBatchExecutor::new(
            Arc::new(FixedEmbedder),
            limiter.clone(),
            0,
            Duration::from_secs(5),
        );
        let batcher = Arc::new(BatchProcessor::start(config(2, 20), Arc::new(executor)));

        let b1 = batcher.clone();
        let h1 = tokio::spawn(async move { b1.submit("ab".to_string(), 0).await });
        let b2 = batcher.clone();
        let h2 = tokio::spawn(async move { b2.submit("cdef".to_string(), 0).await });

        assert_eq!(h1.await.unwrap().unwrap(), vec![2.0]);
        assert_eq!(h2.await.unwrap().unwrap(), vec![4.0]);
        assert!(limiter.stats().completed >= 1);
    }

    #[tokio::test]
    async fn test_stop_drains_queue_and_waits() {
        let executor = EchoExecutor::new(Duration::from_millis(30));
        let batcher = Arc::new(BatchProcessor::start(
            BatchConfig::default()
                .with_batch_size(100)
                .with_batch_timeout(Duration::from_secs(60)),
            executor.clone(),
        ));

        let b = batcher.clone();
        let pending = tokio::spawn(async move { b.submit("queued".to_string(), 0).await });
        // Let the submit land in the queue before stopping.
        sleep(Duration::from_millis(10)).await;

        batcher.stop().await;

        assert_eq!(pending.await.unwrap().unwrap(), "QUEUED");
        assert_eq!(batcher.stats().active_batches, 0);

        let err = batcher.submit("rejected".to_string(), 0).await;
        assert!(matches!(err, Err(Error::Queue(_))));
    }
}
