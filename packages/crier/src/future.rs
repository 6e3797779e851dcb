//! Single-resolution result handle for aggregating dispatches.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use crate::block::{block_on, block_on_deadline};
use crate::error::{AggregateError, Panic};

// producer half, shared between the execution state and the user's future
// handle. resolved at most once.
pub(crate) struct FutureShared<A> {
    lockable: Mutex<Lockable<A>>,
}

struct Lockable<A> {
    result: Option<Result<A, Panic>>,
    waker: Option<Waker>,
    taken: bool,
}

impl<A> FutureShared<A> {
    pub(crate) fn new() -> Self {
        FutureShared {
            lockable: Mutex::new(Lockable { result: None, waker: None, taken: false }),
        }
    }

    // install the result and wake the consumer, unless already resolved.
    pub(crate) fn resolve(&self, result: Result<A, Panic>) {
        let mut lock = self.lockable.lock().unwrap();
        if lock.taken || lock.result.is_some() {
            return;
        }
        lock.result = Some(result);
        let waker = lock.waker.take();
        drop(lock);
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// Result handle of one aggregating dispatch.
///
/// Resolves once every callback of the dispatch — across every executor —
/// has finished (or once the aggregator stopped the fold early), yielding
/// the aggregator, or an [`AggregateError`] if an aggregator method
/// panicked. This is a [`std::future::Future`], so it can be awaited from
/// any async runtime; [`wait`](Self::wait) and
/// [`wait_deadline`](Self::wait_deadline) cover blocking callers.
///
/// # Panics
///
/// Like most futures, polling again after the result was yielded panics.
#[must_use = "the aggregation result is only observable through its future"]
pub struct AggregateFuture<A> {
    shared: Arc<FutureShared<A>>,
}

impl<A> AggregateFuture<A> {
    pub(crate) fn new(shared: Arc<FutureShared<A>>) -> Self {
        AggregateFuture { shared }
    }

    /// Whether the result is ready to be taken.
    pub fn is_ready(&self) -> bool {
        self.shared.lockable.lock().unwrap().result.is_some()
    }

    /// Block the calling thread until the dispatch resolves.
    pub fn wait(mut self) -> Result<A, AggregateError> {
        block_on(&mut self)
    }

    /// Block until the dispatch resolves or the deadline passes.
    ///
    /// `None` on timeout; the future remains usable afterwards.
    pub fn wait_deadline(&mut self, deadline: Instant) -> Option<Result<A, AggregateError>> {
        block_on_deadline(self, deadline)
    }

    /// Block until the dispatch resolves or the timeout elapses.
    ///
    /// `None` on timeout; the future remains usable afterwards.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<Result<A, AggregateError>> {
        self.wait_deadline(Instant::now() + timeout)
    }
}

impl<A> Future for AggregateFuture<A> {
    type Output = Result<A, AggregateError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut lock = self.shared.lockable.lock().unwrap();
        assert!(!lock.taken, "aggregate future polled after yielding its result");
        if let Some(result) = lock.result.take() {
            lock.taken = true;
            Poll::Ready(result.map_err(AggregateError::new))
        } else {
            lock.waker = Some(cx.waker().clone());
            Poll::Pending
        }
    }
}

impl<A> std::fmt::Debug for AggregateFuture<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateFuture")
            .field("ready", &self.is_ready())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn wait_yields_the_resolved_value() {
        let shared = Arc::new(FutureShared::new());
        shared.resolve(Ok(13));
        let future = AggregateFuture::new(Arc::clone(&shared));
        assert!(future.is_ready());
        assert_eq!(future.wait().unwrap(), 13);
    }

    #[test]
    fn only_the_first_resolution_counts() {
        let shared = Arc::new(FutureShared::new());
        shared.resolve(Ok(1));
        shared.resolve(Ok(2));
        assert_eq!(AggregateFuture::new(shared).wait().unwrap(), 1);
    }

    #[test]
    fn wait_timeout_elapses_and_the_future_survives() {
        let shared = Arc::new(FutureShared::<u32>::new());
        let mut future = AggregateFuture::new(Arc::clone(&shared));
        assert!(future.wait_timeout(Duration::from_millis(20)).is_none());

        shared.resolve(Ok(4));
        assert_eq!(future.wait().unwrap(), 4);
    }

    #[test]
    fn resolution_from_another_thread_wakes_a_blocked_wait() {
        let shared = Arc::new(FutureShared::new());
        let future = AggregateFuture::new(Arc::clone(&shared));

        let resolver = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            shared.resolve(Ok(99));
        });
        assert_eq!(future.wait().unwrap(), 99);
        resolver.join().unwrap();
    }

    #[test]
    fn panic_resolution_surfaces_as_an_aggregate_error() {
        let shared = Arc::new(FutureShared::<u32>::new());
        shared.resolve(Err(Box::new("aggregator went down")));
        let error = AggregateFuture::new(shared).wait().unwrap_err();
        assert_eq!(
            *error.panic().downcast_ref::<&str>().unwrap(),
            "aggregator went down"
        );
    }
}
