//! Aggregating channels: fan-out that folds the callbacks' return values.
//!
//! Each `send` carries its own aggregator and yields a future. The
//! dispatched payload is the *execution shared state* — the captured
//! arguments, the aggregator behind its mutex, and the promise half of the
//! future — shared by every socket the dispatch reaches. Callbacks across
//! executors race to the aggregator; the aggregator itself is serialized,
//! and the first `Stop` (or aggregator panic) latches the dispatch so no
//! further aggregator call happens.

use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::connection::Connection;
use crate::error::{CallbacksError, ChannelError, Panic};
use crate::executor::Executor;
use crate::future::{AggregateFuture, FutureShared};
use crate::socket::{DeferredSocket, ImmediateSocket, Socket};
use crate::state::{dispatch, Remover, Shared};

/// Control signal returned by [`Aggregator`] methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuationStatus {
    /// Keep folding further callback results.
    Continue,
    /// Resolve the dispatch future now; no further aggregator call is made.
    /// Callbacks already started keep running, but their results are
    /// discarded.
    Stop,
}

/// Per-dispatch reducer for an [`AggregatingChannel`].
///
/// One aggregator value travels with each `send`; every callback's return
/// value (or panic) is folded into it, serialized by a mutex, in whatever
/// order parallel callbacks happen to arrive.
pub trait Aggregator<R>: Send + 'static {
    /// Fold one callback's return value.
    fn apply_result(&mut self, result: R) -> ContinuationStatus;

    /// Fold one callback's panic payload.
    ///
    /// Callback panics on an aggregating channel never escape to the
    /// sender; they are routed here instead.
    fn apply_panic(&mut self, panic: Panic) -> ContinuationStatus;
}

// per-send shared state with the aggregator type erased, so sockets and
// the channel registry are independent of what each send aggregates.
pub(crate) trait Execution<R, T>: Send + Sync {
    fn arguments(&self) -> &T;
    fn is_ready(&self) -> bool;
    fn apply_result(&self, result: R);
    fn apply_panic(&self, panic: Panic);
}

struct ExecutionState<A, R, T> {
    arguments: T,
    // latched by the first Stop or aggregator panic. double-checked around
    // the aggregator mutex, so a relaxed load suffices on the fast path.
    ready: AtomicBool,
    // taken out when the dispatch latches early
    aggregator: Mutex<Option<A>>,
    future: Arc<FutureShared<A>>,
    _result: PhantomData<fn(R)>,
}

impl<A, R, T> ExecutionState<A, R, T> {
    fn aggregator_guard(&self) -> Option<MutexGuard<'_, Option<A>>> {
        if self.ready.load(Ordering::Relaxed) {
            return None;
        }
        let guard = self.aggregator.lock().unwrap();
        if self.ready.load(Ordering::Relaxed) {
            return None;
        }
        Some(guard)
    }

    fn apply(&self, fold: impl FnOnce(&mut A) -> ContinuationStatus) {
        let Some(mut guard) = self.aggregator_guard() else {
            return;
        };
        let aggregator = guard.as_mut().expect("aggregator taken while not latched");
        match catch_unwind(AssertUnwindSafe(|| fold(aggregator))) {
            Ok(ContinuationStatus::Continue) => {}
            Ok(ContinuationStatus::Stop) => {
                self.ready.store(true, Ordering::Relaxed);
                let aggregator = guard.take().expect("aggregator taken while not latched");
                // resolve outside the aggregator critical section
                drop(guard);
                self.future.resolve(Ok(aggregator));
            }
            Err(panic) => {
                warn!("aggregator panicked; latching the dispatch future");
                self.ready.store(true, Ordering::Relaxed);
                guard.take();
                drop(guard);
                self.future.resolve(Err(panic));
            }
        }
    }
}

impl<A, R, T> Execution<R, T> for ExecutionState<A, R, T>
where
    A: Aggregator<R>,
    R: 'static,
    T: Send + Sync + 'static,
{
    fn arguments(&self) -> &T {
        &self.arguments
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    fn apply_result(&self, result: R) {
        self.apply(|aggregator| aggregator.apply_result(result))
    }

    fn apply_panic(&self, panic: Panic) {
        self.apply(|aggregator| aggregator.apply_panic(panic))
    }
}

impl<A, R, T> Drop for ExecutionState<A, R, T> {
    fn drop(&mut self) {
        // every socket and the sender are done with this dispatch; if
        // nothing latched the future early, the aggregator as folded so far
        // is the result
        if let Some(aggregator) = self.aggregator.get_mut().unwrap().take() {
            self.future.resolve(Ok(aggregator));
        }
    }
}

// wrap a value-returning user callback into the execution-state protocol.
fn aggregating_callback<R, T, F>(
    callback: F,
) -> Box<dyn Fn(&(dyn Execution<R, T> + 'static)) + Send + Sync + 'static>
where
    F: Fn(&T) -> R + Send + Sync + 'static,
    R: 'static,
    T: 'static,
{
    Box::new(move |execution: &(dyn Execution<R, T> + 'static)| {
        // a dispatch that already stopped skips the user callback entirely
        if execution.is_ready() {
            return;
        }
        match catch_unwind(AssertUnwindSafe(|| callback(execution.arguments()))) {
            Ok(result) => execution.apply_result(result),
            Err(panic) => execution.apply_panic(panic),
        }
    })
}

/// Consumer-side endpoint of an aggregating channel.
///
/// Callbacks return `R`; each dispatch folds those returns through the
/// aggregator it was sent with. Connection, disconnection, and handle
/// semantics match [`Channel`](crate::Channel).
pub struct AggregatingChannel<R, T> {
    shared: Option<Arc<Shared<dyn Execution<R, T>>>>,
}

impl<R, T> AggregatingChannel<R, T>
where
    R: Send + 'static,
    T: Send + Sync + 'static,
{
    /// Whether this handle refers to a shared state.
    pub fn is_valid(&self) -> bool {
        self.shared.is_some()
    }

    /// Connect a value-returning callback.
    ///
    /// The callback runs synchronously on the sending thread. Its return
    /// value is folded into the dispatch's aggregator; a panic it raises is
    /// folded through [`Aggregator::apply_panic`] instead of reaching the
    /// sender.
    pub fn connect<F>(&self, callback: F) -> Result<Connection, ChannelError>
    where
        F: Fn(&T) -> R + Send + Sync + 'static,
    {
        let shared = self.shared.as_ref().ok_or(ChannelError)?;
        let socket: Arc<dyn Socket<dyn Execution<R, T>>> =
            Arc::new(ImmediateSocket::new(aggregating_callback(callback)));
        let node = shared.add(socket);
        let remover: Arc<dyn Remover> = shared.clone();
        let weak: Weak<dyn Remover> = Arc::downgrade(&remover);
        Ok(Connection::attach(weak, node.cast()))
    }

    /// Connect a value-returning callback deferred to `executor`.
    ///
    /// The dispatch future of a send resolves only after this callback's
    /// task has run (or been dropped) in the executor.
    pub fn connect_with<E, F>(&self, executor: E, callback: F) -> Result<Connection, ChannelError>
    where
        E: Executor,
        F: Fn(&T) -> R + Send + Sync + 'static,
    {
        let shared = self.shared.as_ref().ok_or(ChannelError)?;
        let socket: Arc<dyn Socket<dyn Execution<R, T>>> =
            DeferredSocket::new(executor, aggregating_callback(callback));
        let node = shared.add(socket);
        let remover: Arc<dyn Remover> = shared.clone();
        let weak: Weak<dyn Remover> = Arc::downgrade(&remover);
        Ok(Connection::attach(weak, node.cast()))
    }
}

impl<R, T> Clone for AggregatingChannel<R, T> {
    fn clone(&self) -> Self {
        AggregatingChannel { shared: self.shared.clone() }
    }
}

impl<R, T> Default for AggregatingChannel<R, T> {
    fn default() -> Self {
        AggregatingChannel { shared: None }
    }
}

impl<R, T> PartialEq for AggregatingChannel<R, T> {
    fn eq(&self, other: &Self) -> bool {
        match (&self.shared, &other.shared) {
            (Some(lhs), Some(rhs)) => Arc::ptr_eq(lhs, rhs),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<R, T> Eq for AggregatingChannel<R, T> {}

impl<R, T> std::fmt::Debug for AggregatingChannel<R, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregatingChannel")
            .field("valid", &self.shared.is_some())
            .finish()
    }
}

/// Producer-side handle of an aggregating channel.
pub struct AggregatingTransmitter<R, T> {
    shared: Arc<Shared<dyn Execution<R, T>>>,
}

impl<R, T> AggregatingTransmitter<R, T>
where
    R: Send + 'static,
    T: Send + Sync + 'static,
{
    /// Create a fresh aggregating channel and its transmitter.
    pub fn new() -> Self {
        AggregatingTransmitter { shared: Arc::new(Shared::new()) }
    }

    /// A channel handle for handing to consumers. Always valid.
    pub fn channel(&self) -> AggregatingChannel<R, T> {
        AggregatingChannel { shared: Some(Arc::clone(&self.shared)) }
    }

    /// Fan `value` out, folding callback returns through `aggregator`.
    ///
    /// The returned future resolves once every callback in every executor
    /// has finished, or as soon as the aggregator stops the fold. With no
    /// subscribers it resolves immediately with the untouched aggregator.
    ///
    /// The error case covers panics thrown by `Executor::execute` itself
    /// while scheduling deferred callbacks; callback panics are folded into
    /// the aggregator and never surface here.
    pub fn send<A>(&self, aggregator: A, value: T) -> Result<AggregateFuture<A>, CallbacksError>
    where
        A: Aggregator<R>,
    {
        let future = Arc::new(FutureShared::new());
        let execution: Arc<dyn Execution<R, T>> = Arc::new(ExecutionState {
            arguments: value,
            ready: AtomicBool::new(false),
            aggregator: Mutex::new(Some(aggregator)),
            future: Arc::clone(&future),
            _result: PhantomData,
        });
        dispatch(&self.shared, execution).map(|()| AggregateFuture::new(future))
    }
}

impl<R, T> Default for AggregatingTransmitter<R, T>
where
    R: Send + 'static,
    T: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<R, T> Clone for AggregatingTransmitter<R, T> {
    fn clone(&self) -> Self {
        AggregatingTransmitter { shared: Arc::clone(&self.shared) }
    }
}

impl<R, T> std::fmt::Debug for AggregatingTransmitter<R, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregatingTransmitter").finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;
    use crate::executor::testing::QueueExecutor;

    // appends results, stopping once `stop_after` have been folded
    struct Collect {
        values: Vec<i32>,
        panics: usize,
        stop_after: usize,
    }

    impl Collect {
        fn unbounded() -> Self {
            Collect { values: Vec::new(), panics: 0, stop_after: usize::MAX }
        }

        fn stop_after(stop_after: usize) -> Self {
            Collect { values: Vec::new(), panics: 0, stop_after }
        }
    }

    impl Aggregator<i32> for Collect {
        fn apply_result(&mut self, result: i32) -> ContinuationStatus {
            self.values.push(result);
            if self.values.len() >= self.stop_after {
                ContinuationStatus::Stop
            } else {
                ContinuationStatus::Continue
            }
        }

        fn apply_panic(&mut self, _panic: Panic) -> ContinuationStatus {
            self.panics += 1;
            ContinuationStatus::Continue
        }
    }

    #[test]
    fn send_without_subscribers_resolves_with_the_untouched_aggregator() {
        let transmitter = AggregatingTransmitter::<i32, i32>::new();
        let collected = transmitter.send(Collect::unbounded(), 1).unwrap().wait().unwrap();
        assert!(collected.values.is_empty());
    }

    #[test]
    fn results_are_folded_in_connection_order_for_immediate_callbacks() {
        let transmitter = AggregatingTransmitter::<i32, i32>::new();
        let channel = transmitter.channel();
        let _first = channel.connect(|value| value + 10).unwrap();
        let _second = channel.connect(|value| value + 20).unwrap();

        let collected = transmitter.send(Collect::unbounded(), 1).unwrap().wait().unwrap();
        assert_eq!(collected.values, [11, 21]);
    }

    #[test]
    fn stop_cuts_the_fold_short_and_skips_remaining_callbacks() {
        let transmitter = AggregatingTransmitter::<i32, ()>::new();
        let channel = transmitter.channel();
        let invoked = Arc::new(AtomicUsize::new(0));

        let mut connections = Vec::new();
        for i in 1..=4 {
            let invoked = invoked.clone();
            connections.push(
                channel
                    .connect(move |_| {
                        invoked.fetch_add(1, Ordering::Relaxed);
                        i
                    })
                    .unwrap(),
            );
        }

        let collected = transmitter.send(Collect::stop_after(2), ()).unwrap().wait().unwrap();
        assert_eq!(collected.values.len(), 2);
        assert!(collected.values.iter().all(|value| (1..=4).contains(value)));
        // the latched dispatch skipped the remaining user callbacks
        assert_eq!(invoked.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn callback_panics_are_folded_not_raised() {
        let transmitter = AggregatingTransmitter::<i32, ()>::new();
        let channel = transmitter.channel();
        let _first = channel.connect(|_| panic!("callback down")).unwrap();
        let _second = channel.connect(|_| 5).unwrap();

        let collected = transmitter.send(Collect::unbounded(), ()).unwrap().wait().unwrap();
        assert_eq!(collected.panics, 1);
        assert_eq!(collected.values, [5]);
    }

    #[derive(Debug)]
    struct Explosive;

    impl Aggregator<i32> for Explosive {
        fn apply_result(&mut self, _result: i32) -> ContinuationStatus {
            panic!("aggregator down")
        }

        fn apply_panic(&mut self, _panic: Panic) -> ContinuationStatus {
            ContinuationStatus::Continue
        }
    }

    #[test]
    fn aggregator_panic_latches_the_future_with_the_panic() {
        let transmitter = AggregatingTransmitter::<i32, ()>::new();
        let channel = transmitter.channel();
        let invoked = Arc::new(AtomicUsize::new(0));

        let _first = channel.connect(|_| 1).unwrap();
        let counter = invoked.clone();
        let _second = channel
            .connect(move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
                2
            })
            .unwrap();

        let error = transmitter.send(Explosive, ()).unwrap().wait().unwrap_err();
        assert_eq!(*error.panic().downcast_ref::<&str>().unwrap(), "aggregator down");
        // the latch also stopped the second user callback
        assert_eq!(invoked.load(Ordering::Relaxed), 0);
    }

    struct Count(usize);

    impl Aggregator<()> for Count {
        fn apply_result(&mut self, _result: ()) -> ContinuationStatus {
            self.0 += 1;
            ContinuationStatus::Continue
        }

        fn apply_panic(&mut self, _panic: Panic) -> ContinuationStatus {
            ContinuationStatus::Continue
        }
    }

    #[test]
    fn unit_returning_callbacks_aggregate_through_the_same_path() {
        let transmitter = AggregatingTransmitter::<(), i32>::new();
        let channel = transmitter.channel();
        let _first = channel.connect(|_| {}).unwrap();
        let _second = channel.connect(|_| {}).unwrap();

        let count = transmitter.send(Count(0), 3).unwrap().wait().unwrap();
        assert_eq!(count.0, 2);
    }

    #[test]
    fn future_resolves_only_after_deferred_callbacks_finish() {
        let transmitter = AggregatingTransmitter::<i32, ()>::new();
        let channel = transmitter.channel();
        let executor = QueueExecutor::new();
        let _connection = channel.connect_with(executor.clone(), |_| 8).unwrap();

        let mut future = transmitter.send(Collect::unbounded(), ()).unwrap();
        assert!(!future.is_ready());
        assert!(future.wait_timeout(Duration::from_millis(20)).is_none());

        executor.run_all();
        let collected = future.wait().unwrap();
        assert_eq!(collected.values, [8]);
    }

    #[test]
    fn dropped_deferred_task_still_lets_the_future_resolve() {
        let transmitter = AggregatingTransmitter::<i32, ()>::new();
        let channel = transmitter.channel();
        let executor = QueueExecutor::new();
        let _connection = channel.connect_with(executor.clone(), |_| 8).unwrap();

        let future = transmitter.send(Collect::unbounded(), ()).unwrap();
        // the executor discards its queue without running anything
        drop(executor.take_all());

        let collected = future.wait().unwrap();
        assert!(collected.values.is_empty());
    }

    #[tokio::test]
    async fn aggregate_future_is_awaitable() {
        let transmitter = AggregatingTransmitter::<i32, i32>::new();
        let channel = transmitter.channel();
        let executor = QueueExecutor::new();
        let _connection = channel.connect_with(executor.clone(), |value| value * 2).unwrap();

        let future = transmitter.send(Collect::unbounded(), 21).unwrap();
        let runner = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            executor.run_all();
        });

        let collected = future.await.unwrap();
        assert_eq!(collected.values, [42]);
        runner.join().unwrap();
    }
}
