//! C10 Lifecycle Manager: collects shutdown closers and runs them in reverse
//! registration order with a bounded per-closer grace period, logging
//! failures without halting the sequence.
//!
//! Grounded on the shape of `forge_runtime::cluster::shutdown::
//! GracefulShutdown`, simplified: the closer list here is a plain ordered
//! sequence of functions, not a node-drain state machine — `forge`'s
//! leader-election/node-registry/in-flight-request-counter machinery has no
//! counterpart here and is not reproduced.

use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;

use anvil_core::error::Result;

/// A shutdown action: `ctx -> err` expressed as a boxed, one-shot future
/// producer. Typical closers stop the worker's poll loop, then close the
/// storage pool.
pub type Closer = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

pub struct LifecycleManager {
    closers: Mutex<Vec<Closer>>,
    grace_period: Duration,
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self::with_grace_period(DEFAULT_GRACE_PERIOD)
    }

    pub fn with_grace_period(grace_period: Duration) -> Self {
        Self {
            closers: Mutex::new(Vec::new()),
            grace_period,
        }
    }

    /// Registers a closer. Intended to happen only during application
    /// construction, before `close()` is ever called.
    pub fn register(&self, closer: Closer) {
        self.closers
            .lock()
            .expect("lifecycle manager mutex poisoned")
            .push(closer);
    }

    /// Runs every registered closer in reverse order. A closer that errors or
    /// exceeds the grace period is logged and skipped; the remaining closers
    /// still run (§4.10: "logging errors but not halting the sequence").
    pub async fn close(&self) {
        let closers: Vec<Closer> = self
            .closers
            .lock()
            .expect("lifecycle manager mutex poisoned")
            .drain(..)
            .collect();

        for closer in closers.into_iter().rev() {
            match tokio::time::timeout(self.grace_period, closer()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "closer returned an error during shutdown");
                }
                Err(_) => {
                    tracing::warn!(
                        grace_period = ?self.grace_period,
                        "closer exceeded its grace period during shutdown"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn closers_run_in_reverse_registration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let manager = LifecycleManager::new();

        let order_a = order.clone();
        manager.register(Box::new(move || {
            Box::pin(async move {
                order_a.lock().unwrap().push("a");
                Ok(())
            })
        }));

        let order_b = order.clone();
        manager.register(Box::new(move || {
            Box::pin(async move {
                order_b.lock().unwrap().push("b");
                Ok(())
            })
        }));

        manager.close().await;
        assert_eq!(*order.lock().unwrap(), vec!["b", "a"]);
    }

    #[tokio::test]
    async fn a_failing_closer_does_not_block_the_rest() {
        let calls = Arc::new(AtomicUsize::new(0));
        let manager = LifecycleManager::new();

        manager.register(Box::new(|| {
            Box::pin(async { Err(anvil_core::error::AnvilError::Internal("boom".to_string())) })
        }));

        let calls_clone = calls.clone();
        manager.register(Box::new(move || {
            Box::pin(async move {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }));

        manager.close().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn a_slow_closer_is_cut_off_by_the_grace_period() {
        let manager = LifecycleManager::with_grace_period(Duration::from_millis(20));

        manager.register(Box::new(|| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
        }));

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        manager.register(Box::new(move || {
            Box::pin(async move {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }));

        manager.close().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
