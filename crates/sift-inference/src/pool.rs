//! Keep-alive connection pool for the inference endpoint.
//!
//! Connections are logical keep-alive slots: acquiring one either reuses an
//! idle record (a pool hit), creates a new one below the ceiling, or waits
//! for a release bounded by the configured acquire timeout. A periodic sweep
//! closes records idle longer than `idle_timeout`; it runs at half that
//! interval. A record is "active" while a [`PooledConnection`] guard holds
//! it and "idle" while it sits in the pool.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use sift_core::{defaults, Error, Result};

/// Pool configuration options.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum simultaneous connections.
    pub max_connections: usize,
    /// Bound on how long an acquire may wait for a release.
    pub connection_timeout: Duration,
    /// Idle age after which a connection is closed by the sweep.
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: defaults::MAX_CONNECTIONS,
            connection_timeout: Duration::from_secs(defaults::CONNECTION_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(defaults::IDLE_TIMEOUT_SECS),
        }
    }
}

impl PoolConfig {
    /// Set the connection ceiling.
    pub fn with_max_connections(mut self, n: usize) -> Self {
        self.max_connections = n.max(1);
        self
    }

    /// Set the acquire wait bound.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the idle recycling age.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }
}

/// Bookkeeping for one keep-alive connection.
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub id: Uuid,
    pub created_at: Instant,
    pub last_used_at: Instant,
    pub usage_count: u64,
}

struct PoolState {
    idle: Vec<ConnectionRecord>,
    /// Total records in existence (idle + held by guards).
    open: usize,
}

struct PoolShared {
    config: PoolConfig,
    state: Mutex<PoolState>,
    released: Notify,
    acquisitions: AtomicU64,
    hits: AtomicU64,
    created: AtomicU64,
    timeouts: AtomicU64,
    closed_idle: AtomicU64,
}

impl PoolShared {
    fn sweep_idle(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();
        let before = state.idle.len();
        state
            .idle
            .retain(|rec| now.duration_since(rec.last_used_at) <= self.config.idle_timeout);
        let removed = before - state.idle.len();
        state.open -= removed;
        drop(state);

        if removed > 0 {
            self.closed_idle.fetch_add(removed as u64, Ordering::Relaxed);
            debug!(
                subsystem = "inference",
                component = "pool",
                op = "sweep",
                closed = removed,
                "Recycled idle connections"
            );
        }
        removed
    }
}

/// Point-in-time pool statistics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStats {
    pub open: usize,
    pub idle: usize,
    pub active: usize,
    pub acquisitions: u64,
    pub hits: u64,
    pub created: u64,
    pub timeouts: u64,
    pub closed_idle: u64,
    /// Idle-reuse fraction over all acquisitions.
    pub hit_rate: f64,
}

/// Bounded keep-alive connection pool.
#[derive(Clone)]
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
}

/// Guard for an acquired connection. Dropping it returns the record to the
/// idle set and wakes one waiting acquirer.
pub struct PooledConnection {
    shared: Arc<PoolShared>,
    record: Option<ConnectionRecord>,
}

impl PooledConnection {
    /// The record this guard holds.
    pub fn record(&self) -> &ConnectionRecord {
        self.record.as_ref().expect("record present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(mut rec) = self.record.take() {
            rec.last_used_at = Instant::now();
            rec.usage_count += 1;
            let mut state = self.shared.state.lock().unwrap();
            state.idle.push(rec);
            drop(state);
            self.shared.released.notify_one();
        }
    }
}

impl ConnectionPool {
    /// Create a pool with the given configuration.
    pub fn new(config: PoolConfig) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                config,
                state: Mutex::new(PoolState {
                    idle: Vec::new(),
                    open: 0,
                }),
                released: Notify::new(),
                acquisitions: AtomicU64::new(0),
                hits: AtomicU64::new(0),
                created: AtomicU64::new(0),
                timeouts: AtomicU64::new(0),
                closed_idle: AtomicU64::new(0),
            }),
        }
    }

    /// Create a pool with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(PoolConfig::default())
    }

    /// Acquire a connection: reuse idle, create below the ceiling, or wait
    /// for a release bounded by `connection_timeout`.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        self.shared.acquisitions.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + self.shared.config.connection_timeout;

        loop {
            {
                let mut state = self.shared.state.lock().unwrap();
                if let Some(rec) = state.idle.pop() {
                    self.shared.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(PooledConnection {
                        shared: self.shared.clone(),
                        record: Some(rec),
                    });
                }
                if state.open < self.shared.config.max_connections {
                    state.open += 1;
                    self.shared.created.fetch_add(1, Ordering::Relaxed);
                    let now = Instant::now();
                    return Ok(PooledConnection {
                        shared: self.shared.clone(),
                        record: Some(ConnectionRecord {
                            id: Uuid::new_v4(),
                            created_at: now,
                            last_used_at: now,
                            usage_count: 0,
                        }),
                    });
                }
            }

            tokio::select! {
                _ = self.shared.released.notified() => {}
                _ = sleep_until(deadline) => {
                    self.shared.timeouts.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        subsystem = "inference",
                        component = "pool",
                        op = "acquire",
                        timeout_ms = self.shared.config.connection_timeout.as_millis() as u64,
                        "Connection acquire timed out"
                    );
                    return Err(Error::Timeout(format!(
                        "connection acquire after {:?}",
                        self.shared.config.connection_timeout
                    )));
                }
            }
        }
    }

    /// Close idle connections older than `idle_timeout`. Returns the number
    /// closed. The background sweeper calls this on a timer; tests call it
    /// directly.
    pub fn sweep_idle(&self) -> usize {
        self.shared.sweep_idle()
    }

    /// Spawn the periodic idle sweep (every `idle_timeout / 2`).
    pub fn start_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            let period = shared.config.idle_timeout / 2;
            let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately; skip it.
            interval.tick().await;
            loop {
                interval.tick().await;
                shared.sweep_idle();
            }
        })
    }

    /// Current pool statistics.
    pub fn stats(&self) -> PoolStats {
        let (open, idle) = {
            let state = self.shared.state.lock().unwrap();
            (state.open, state.idle.len())
        };
        let acquisitions = self.shared.acquisitions.load(Ordering::Relaxed);
        let hits = self.shared.hits.load(Ordering::Relaxed);
        PoolStats {
            open,
            idle,
            active: open - idle,
            acquisitions,
            hits,
            created: self.shared.created.load(Ordering::Relaxed),
            timeouts: self.shared.timeouts.load(Ordering::Relaxed),
            closed_idle: self.shared.closed_idle.load(Ordering::Relaxed),
            hit_rate: if acquisitions == 0 {
                0.0
            } else {
                hits as f64 / acquisitions as f64
            },
        }
    }
}
