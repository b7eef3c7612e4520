//! Rundown protection for background workers
//!
//! Connection threads are daemon-like: they outlive the logical scope that
//! created them, which makes process exit and test teardown racy. The
//! rundown barrier counts in-flight workers and lets a caller suspend
//! until all of them have fully unwound.
//!
//! One process-global barrier is created lazily and lives for the process
//! lifetime; it is only reachable through [`RundownBarrier::acquire`],
//! guard release, and [`RundownBarrier::wait_for_zero`]. Workers default
//! to the global barrier but accept an injected one so tests stay
//! isolated from each other.

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

static GLOBAL_RUNDOWN: Lazy<Arc<RundownBarrier>> = Lazy::new(|| Arc::new(RundownBarrier::new()));

/// The barrier is draining; no new worker may start.
#[derive(Debug, Error)]
#[error("rundown barrier is draining, no new workers may be acquired")]
pub struct RundownError;

struct Counter {
    active: usize,
    draining: bool,
}

/// Counts in-flight workers and signals when the count reaches zero.
pub struct RundownBarrier {
    counter: Mutex<Counter>,
    quiesced_tx: watch::Sender<bool>,
    quiesced_rx: watch::Receiver<bool>,
}

impl RundownBarrier {
    pub fn new() -> Self {
        let (quiesced_tx, quiesced_rx) = watch::channel(false);
        Self {
            counter: Mutex::new(Counter {
                active: 0,
                draining: false,
            }),
            quiesced_tx,
            quiesced_rx,
        }
    }

    /// The process-wide barrier shared by all workers.
    pub fn global() -> Arc<RundownBarrier> {
        GLOBAL_RUNDOWN.clone()
    }

    /// Register one in-flight worker. Fails once the barrier is draining.
    pub fn acquire(self: &Arc<Self>) -> Result<RundownGuard, RundownError> {
        let mut counter = self.counter.lock();
        if counter.draining {
            return Err(RundownError);
        }
        counter.active += 1;
        debug!(active = counter.active, "rundown acquired");
        Ok(RundownGuard {
            barrier: Some(self.clone()),
        })
    }

    /// Number of currently registered workers.
    pub fn active(&self) -> usize {
        self.counter.lock().active
    }

    /// Mark the barrier draining and suspend until every registered
    /// worker has released its guard. After this resolves no further
    /// acquire can succeed.
    pub async fn wait_for_zero(&self) {
        {
            let mut counter = self.counter.lock();
            counter.draining = true;
            if counter.active == 0 {
                let _ = self.quiesced_tx.send(true);
            }
        }

        let mut rx = self.quiesced_rx.clone();
        // wait_for returns immediately if the value is already true.
        let _ = rx.wait_for(|quiesced| *quiesced).await;
    }

    fn release(&self) {
        let mut counter = self.counter.lock();
        debug_assert!(counter.active > 0, "rundown release without acquire");
        counter.active = counter.active.saturating_sub(1);
        debug!(active = counter.active, "rundown released");
        if counter.active == 0 && counter.draining {
            let _ = self.quiesced_tx.send(true);
        }
    }
}

impl Default for RundownBarrier {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases one worker registration on drop. Release is idempotent: a
/// guard releases at most once, whether by [`RundownGuard::release`] or by
/// drop.
pub struct RundownGuard {
    barrier: Option<Arc<RundownBarrier>>,
}

impl RundownGuard {
    pub fn release(mut self) {
        if let Some(barrier) = self.barrier.take() {
            barrier.release();
        }
    }
}

impl Drop for RundownGuard {
    fn drop(&mut self) {
        if let Some(barrier) = self.barrier.take() {
            barrier.release();
        }
    }
}

/// Suspend until every worker registered with the global barrier has
/// unwound. Typically only needed by test harnesses and process shutdown;
/// afterwards no new worker can start.
pub async fn wait_for_all_workers_quiesced() {
    RundownBarrier::global().wait_for_zero().await;
}
