//! Bounded-concurrency controller for outbound inference calls.
//!
//! Caps the number of simultaneously executing tasks; excess callers queue
//! and are granted slots in priority order (stable FIFO within a priority).
//! Every execution is raced against a timeout, and slot release is
//! drop-safe: a cancelled or timed-out caller frees its slot and wakes the
//! next waiter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

use sift_core::{defaults, Error, Result};

/// Limiter configuration options.
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Ceiling on simultaneously executing tasks.
    pub max_concurrency: usize,
    /// Timeout applied when the caller does not pass one explicitly.
    pub default_timeout: Duration,
    /// Grant queued slots by priority; plain FIFO when disabled.
    pub priority_ordering: bool,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_concurrency: defaults::MAX_CONCURRENT_REQUESTS,
            default_timeout: Duration::from_secs(defaults::TASK_TIMEOUT_SECS),
            priority_ordering: true,
        }
    }
}

impl LimiterConfig {
    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n.max(1);
        self
    }

    pub fn with_default_timeout(mut self, t: Duration) -> Self {
        self.default_timeout = t;
        self
    }

    pub fn with_priority_ordering(mut self, enabled: bool) -> Self {
        self.priority_ordering = enabled;
        self
    }
}

struct Waiter {
    priority: i32,
    seq: u64,
    grant_tx: oneshot::Sender<Result<()>>,
}

struct LimiterState {
    max: usize,
    active: usize,
    queue: Vec<Waiter>,
    next_seq: u64,
    peak_active: usize,
}

struct LimiterShared {
    state: Mutex<LimiterState>,
    priority_ordering: bool,
    completed: AtomicU64,
    timed_out: AtomicU64,
    cleared: AtomicU64,
}

impl LimiterShared {
    /// Pick the next waiter: highest priority first, FIFO within a priority.
    fn pop_next(queue: &mut Vec<Waiter>, priority_ordering: bool) -> Option<Waiter> {
        if queue.is_empty() {
            return None;
        }
        let idx = if priority_ordering {
            queue
                .iter()
                .enumerate()
                .min_by_key(|(_, w)| (-(w.priority as i64), w.seq))
                .map(|(i, _)| i)?
        } else {
            queue
                .iter()
                .enumerate()
                .min_by_key(|(_, w)| w.seq)
                .map(|(i, _)| i)?
        };
        Some(queue.remove(idx))
    }

    /// Grant freed slots to waiting tasks. A waiter whose caller has gone
    /// away (receiver dropped) is skipped without consuming a slot.
    fn drain(&self) {
        let mut state = self.state.lock().unwrap();
        while state.active < state.max {
            let Some(waiter) = Self::pop_next(&mut state.queue, self.priority_ordering) else {
                break;
            };
            if waiter.grant_tx.send(Ok(())).is_ok() {
                state.active += 1;
                state.peak_active = state.peak_active.max(state.active);
            }
        }
    }

    fn release(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.active = state.active.saturating_sub(1);
        }
        self.drain();
    }
}

/// Slot guard: releases the execution slot on drop, including when the
/// caller's future is cancelled mid-run.
struct SlotGuard {
    shared: Arc<LimiterShared>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.shared.release();
    }
}

/// Point-in-time limiter statistics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LimiterStats {
    pub active: usize,
    pub queued: usize,
    pub max_concurrency: usize,
    pub peak_active: usize,
    pub completed: u64,
    pub timed_out: u64,
    pub cleared: u64,
}

/// Bounded-concurrency task controller.
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    shared: Arc<LimiterShared>,
    default_timeout: Duration,
}

impl ConcurrencyLimiter {
    pub fn new(config: LimiterConfig) -> Self {
        Self {
            shared: Arc::new(LimiterShared {
                state: Mutex::new(LimiterState {
                    max: config.max_concurrency,
                    active: 0,
                    queue: Vec::new(),
                    next_seq: 0,
                    peak_active: 0,
                }),
                priority_ordering: config.priority_ordering,
                completed: AtomicU64::new(0),
                timed_out: AtomicU64::new(0),
                cleared: AtomicU64::new(0),
            }),
            default_timeout: config.default_timeout,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(LimiterConfig::default())
    }

    /// Run `task` under the concurrency ceiling.
    ///
    /// Runs immediately when a slot is free; otherwise waits for a grant in
    /// priority order. The execution itself is raced against `task_timeout`
    /// (falling back to the configured default); on timeout the task's slot
    /// is released so waiting tasks can proceed.
    pub async fn execute<T, F>(
        &self,
        task: F,
        priority: i32,
        task_timeout: Option<Duration>,
    ) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        self.acquire_slot(priority).await?;
        let _guard = SlotGuard {
            shared: self.shared.clone(),
        };

        let limit = task_timeout.unwrap_or(self.default_timeout);
        match timeout(limit, task).await {
            Ok(result) => {
                self.shared.completed.fetch_add(1, Ordering::Relaxed);
                result
            }
            Err(_) => {
                self.shared.timed_out.fetch_add(1, Ordering::Relaxed);
                warn!(
                    subsystem = "inference",
                    component = "limiter",
                    timeout_ms = limit.as_millis() as u64,
                    "Task exceeded its timeout"
                );
                Err(Error::Timeout(format!("task exceeded {:?}", limit)))
            }
        }
    }

    async fn acquire_slot(&self, priority: i32) -> Result<()> {
        let grant_rx = {
            let mut state = self.shared.state.lock().unwrap();
            if state.active < state.max {
                state.active += 1;
                state.peak_active = state.peak_active.max(state.active);
                return Ok(());
            }
            let (tx, rx) = oneshot::channel();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.queue.push(Waiter {
                priority,
                seq,
                grant_tx: tx,
            });
            rx
        };

        match grant_rx.await {
            Ok(result) => result,
            // Sender dropped without a grant: the limiter was torn down.
            Err(_) => Err(Error::Queue("limiter dropped".into())),
        }
    }

    /// Reject every still-queued task with a "queue cleared" error. Does not
    /// touch already-running tasks.
    pub fn clear_queue(&self) -> usize {
        let waiters: Vec<Waiter> = {
            let mut state = self.shared.state.lock().unwrap();
            std::mem::take(&mut state.queue)
        };
        let n = waiters.len();
        for waiter in waiters {
            let _ = waiter.grant_tx.send(Err(Error::Queue("queue cleared".into())));
        }
        if n > 0 {
            self.shared.cleared.fetch_add(n as u64, Ordering::Relaxed);
            debug!(
                subsystem = "inference",
                component = "limiter",
                cleared = n,
                "Cleared queued tasks"
            );
        }
        n
    }

    /// Clear the queue, then wait (bounded) for active tasks to drain.
    /// Returns whether the active count reached zero within the bound.
    pub async fn force_terminate_all(&self) -> bool {
        self.clear_queue();

        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(defaults::FORCE_TERMINATE_WAIT_SECS);
        loop {
            if self.shared.state.lock().unwrap().active == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    subsystem = "inference",
                    component = "limiter",
                    "Active tasks did not drain within the termination bound"
                );
                return false;
            }
            sleep(Duration::from_millis(50)).await;
        }
    }

    /// Change the concurrency ceiling. Raising it immediately drains queued
    /// tasks into the freed slots.
    pub fn set_max_concurrency(&self, n: usize) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.max = n.max(1);
        }
        self.shared.drain();
    }

    /// Current limiter statistics.
    pub fn stats(&self) -> LimiterStats {
        let state = self.shared.state.lock().unwrap();
        LimiterStats {
            active: state.active,
            queued: state.queue.len(),
            max_concurrency: state.max,
            peak_active: state.peak_active,
            completed: self.shared.completed.load(Ordering::Relaxed),
            timed_out: self.shared.timed_out.load(Ordering::Relaxed),
            cleared: self.shared.cleared.load(Ordering::Relaxed),
        }
    }
}
