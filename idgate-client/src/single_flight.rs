//! Single-flight execution of async operations.
//!
//! The first caller of [`SingleFlight::run`] starts the operation; callers
//! arriving while it is pending attach to the same future and receive a clone
//! of its outcome. Any attached caller drives the shared future, so dropping
//! one of them does not stall the rest.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

type SharedOutcome<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

/// Deduplicates concurrent executions of one operation.
pub struct SingleFlight<T, E> {
    slot: Mutex<Option<(u64, SharedOutcome<T, E>)>>,
    next_id: AtomicU64,
    waiters: AtomicUsize,
}

impl<T, E> std::fmt::Debug for SingleFlight<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.slot.lock().is_some())
            .field("waiters", &self.waiters.load(Ordering::SeqCst))
            .finish()
    }
}

impl<T, E> Default for SingleFlight<T, E> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(None),
            next_id: AtomicU64::new(0),
            waiters: AtomicUsize::new(0),
        }
    }
}

impl<T, E> SingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create an idle instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an execution is pending.
    pub fn is_in_flight(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Number of callers currently awaiting the pending execution.
    pub fn waiters(&self) -> usize {
        self.waiters.load(Ordering::SeqCst)
    }

    /// Run `start()` unless an execution is already pending, then await the
    /// shared outcome.
    ///
    /// `start` is only invoked when no execution is pending.
    pub async fn run<F, Fut>(&self, start: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (id, outcome) = {
            let mut slot = self.slot.lock();
            match slot.as_ref() {
                Some((id, pending)) => (*id, pending.clone()),
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                    let pending = start().boxed().shared();
                    *slot = Some((id, pending.clone()));
                    (id, pending)
                }
            }
        };

        let _waiter = WaiterGuard::new(&self.waiters);
        let result = outcome.await;

        let mut slot = self.slot.lock();
        if matches!(slot.as_ref(), Some((current, _)) if *current == id) {
            *slot = None;
        }
        result
    }
}

struct WaiterGuard<'a>(&'a AtomicUsize);

impl<'a> WaiterGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_execution() {
        let flight = Arc::new(SingleFlight::<u32, String>::new());
        let executions = Arc::new(AtomicU32::new(0));
        let gate = Arc::new(Notify::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flight = flight.clone();
            let executions = executions.clone();
            let gate = gate.clone();
            handles.push(tokio::spawn(async move {
                flight
                    .run(|| async move {
                        executions.fetch_add(1, Ordering::SeqCst);
                        gate.notified().await;
                        Ok(7)
                    })
                    .await
            }));
        }

        while flight.waiters() < 8 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(7));
        }
        assert_eq!(executions.load(Ordering::SeqCst), 1);
        assert!(!flight.is_in_flight());
        assert_eq!(flight.waiters(), 0);
    }

    #[tokio::test]
    async fn test_error_is_broadcast() {
        let flight = SingleFlight::<u32, String>::new();
        let (a, b) = tokio::join!(
            flight.run(|| async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Err("refresh rejected".to_string())
            }),
            flight.run(|| async { Ok(1) }),
        );
        assert_eq!(a, Err("refresh rejected".to_string()));
        assert_eq!(b, Err("refresh rejected".to_string()));
    }

    #[tokio::test]
    async fn test_sequential_runs_execute_again() {
        let flight = SingleFlight::<u32, String>::new();
        assert_eq!(flight.run(|| async { Ok(1) }).await, Ok(1));
        assert_eq!(flight.run(|| async { Ok(2) }).await, Ok(2));
    }

    #[tokio::test]
    async fn test_dropped_leader_does_not_stall_followers() {
        let flight = Arc::new(SingleFlight::<u32, String>::new());
        let gate = Arc::new(Notify::new());

        let leader = {
            let flight = flight.clone();
            let gate = gate.clone();
            tokio::spawn(async move {
                flight
                    .run(|| async move {
                        gate.notified().await;
                        Ok(42)
                    })
                    .await
            })
        };
        while flight.waiters() < 1 {
            tokio::task::yield_now().await;
        }

        let follower = {
            let flight = flight.clone();
            tokio::spawn(async move { flight.run(|| async { Ok(0) }).await })
        };
        while flight.waiters() < 2 {
            tokio::task::yield_now().await;
        }

        leader.abort();
        let _ = leader.await;
        gate.notify_one();

        assert_eq!(follower.await.unwrap(), Ok(42));
    }
}
