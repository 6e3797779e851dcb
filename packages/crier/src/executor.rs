//! Executor protocol for deferred callback delivery.
//!
//! A channel never runs a deferred callback itself: it wraps the delivery
//! into a [`Task`] and hands it to the subscriber's [`Executor`]. The
//! library makes no assumption about executor quality — a task invoked
//! zero times runs nothing, a task invoked repeatedly runs its callback
//! at most once.

use std::sync::{Arc, Weak};

/// A unit of deferred work handed to an [`Executor`].
///
/// Tasks may be invoked any number of times on any thread; the work inside
/// runs at most once, on the first invocation. Dropping a task without
/// running it discards the work.
pub struct Task {
    run: Box<dyn FnMut() + Send>,
}

impl Task {
    pub(crate) fn new(run: impl FnMut() + Send + 'static) -> Self {
        Task { run: Box::new(run) }
    }

    /// Invoke the task. Only the first invocation has an effect.
    pub fn run(&mut self) {
        (self.run)()
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Task")
    }
}

/// Dispatcher for deferred callback tasks.
///
/// Implement this to bind the library to an event loop, a thread pool, or
/// any other scheduling scheme. The library calls [`execute`](Self::execute)
/// from inside `send` (or from a buffered `connect` replay) and imposes no
/// ordering beyond what the executor itself provides.
pub trait Executor: Send + Sync + 'static {
    /// Take ownership of `task` for later (or immediate) invocation.
    fn execute(&self, task: Task);
}

/// Executor that runs each task immediately on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, mut task: Task) {
        task.run()
    }
}

/// Temporary-ownership protocol for [`TrackingExecutor`].
///
/// A tracked object can be locked into a guard that keeps its subject alive
/// (or its teardown suspended) for the guard's lifetime, and reports
/// expiration cheaply. [`TrackedObject`](crate::TrackedObject) implements
/// this against a [`SyncTracker`](crate::SyncTracker), and [`Weak`]
/// implements it against plain shared ownership.
pub trait Tracked: Clone + Send + Sync + 'static {
    /// Held while the guarded callback runs.
    type Guard;

    /// Acquire temporary ownership, or `None` if expired.
    fn lock(&self) -> Option<Self::Guard>;

    /// Whether [`lock`](Self::lock) can no longer succeed.
    fn expired(&self) -> bool;
}

impl<T: Send + Sync + 'static> Tracked for Weak<T> {
    type Guard = Arc<T>;

    fn lock(&self) -> Option<Self::Guard> {
        self.upgrade()
    }

    fn expired(&self) -> bool {
        self.strong_count() == 0
    }
}

/// Executor wrapper that gates every task behind a tracked object.
///
/// Submission checks expiration up front; the task itself re-locks the
/// tracked object when it finally runs and holds the guard across the
/// callback. A subscriber torn down between scheduling and execution is
/// therefore never invoked — the mechanism behind
/// [`SyncTracker`](crate::SyncTracker)-guarded draining.
#[derive(Debug, Clone)]
pub struct TrackingExecutor<T, E = InlineExecutor> {
    tracked: T,
    executor: E,
}

impl<T: Tracked> TrackingExecutor<T> {
    /// Gate `tracked` in front of the [`InlineExecutor`].
    pub fn new(tracked: T) -> Self {
        TrackingExecutor { tracked, executor: InlineExecutor }
    }
}

impl<T: Tracked, E: Executor> TrackingExecutor<T, E> {
    /// Gate `tracked` in front of `executor`.
    pub fn with_executor(tracked: T, executor: E) -> Self {
        TrackingExecutor { tracked, executor }
    }
}

impl<T: Tracked, E: Executor> Executor for TrackingExecutor<T, E> {
    fn execute(&self, mut task: Task) {
        if self.tracked.expired() {
            debug!("dropping task scheduled against an expired tracked object");
            return;
        }
        let tracked = self.tracked.clone();
        self.executor.execute(Task::new(move || {
            if let Some(_guard) = tracked.lock() {
                task.run();
            }
        }));
    }
}

/// Gate a single callback behind a tracked object.
///
/// The callback-level sibling of [`TrackingExecutor`]: the returned closure
/// locks `tracked` around every invocation and is silently skipped once the
/// tracked object expires. Useful with the plain (executor-less) `connect`,
/// where there is no executor to wrap.
///
/// ```
/// use std::sync::Arc;
/// use crier::{executor::tracking_callback, Subscribe, Transmitter};
///
/// let consumer = Arc::new(());
/// let transmitter = Transmitter::<i32>::new();
/// let _connection = transmitter
///     .channel()
///     .connect(tracking_callback(Arc::downgrade(&consumer), |value: &i32| {
///         println!("consumer still alive, got {value}");
///     }))
///     .unwrap();
///
/// transmitter.send(1).unwrap(); // delivered
/// drop(consumer);
/// transmitter.send(2).unwrap(); // skipped
/// ```
pub fn tracking_callback<T, C, F>(tracked: C, callback: F) -> impl Fn(&T) + Send + Sync + 'static
where
    C: Tracked,
    F: Fn(&T) + Send + Sync + 'static,
{
    move |value| {
        if let Some(_guard) = tracked.lock() {
            callback(value);
        }
    }
}

/// Deferred callbacks run on the tokio blocking-thread pool.
#[cfg(feature = "tokio")]
impl Executor for tokio::runtime::Handle {
    fn execute(&self, mut task: Task) {
        self.spawn_blocking(move || task.run());
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    // executor that stashes tasks for manual draining from the test body
    #[derive(Clone, Default)]
    pub(crate) struct QueueExecutor {
        tasks: Arc<Mutex<Vec<Task>>>,
    }

    impl QueueExecutor {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn pending(&self) -> usize {
            self.tasks.lock().unwrap().len()
        }

        pub(crate) fn take_all(&self) -> Vec<Task> {
            std::mem::take(&mut *self.tasks.lock().unwrap())
        }

        pub(crate) fn run_all(&self) {
            // drain first: a running task may schedule more
            for mut task in self.take_all() {
                task.run();
            }
        }
    }

    impl Executor for QueueExecutor {
        fn execute(&self, task: Task) {
            self.tasks.lock().unwrap().push(task);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::testing::QueueExecutor;
    use super::*;

    #[test]
    fn inline_executor_runs_on_the_calling_thread() {
        let calls = Arc::new(AtomicUsize::new(0));
        let recorded = calls.clone();
        let thread = std::thread::current().id();
        InlineExecutor.execute(Task::new(move || {
            assert_eq!(std::thread::current().id(), thread);
            recorded.fetch_add(1, Ordering::Relaxed);
        }));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn weak_tracked_object_gates_execution() {
        let subject = Arc::new(());
        let executor = QueueExecutor::new();
        let tracking = TrackingExecutor::with_executor(Arc::downgrade(&subject), executor.clone());

        let calls = Arc::new(AtomicUsize::new(0));
        let recorded = calls.clone();
        tracking.execute(Task::new(move || {
            recorded.fetch_add(1, Ordering::Relaxed);
        }));
        assert_eq!(executor.pending(), 1);

        // subject torn down between scheduling and execution
        drop(subject);
        executor.run_all();
        assert_eq!(calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn expired_tracked_object_drops_tasks_at_submission() {
        let subject = Arc::new(());
        let weak = Arc::downgrade(&subject);
        drop(subject);

        let executor = QueueExecutor::new();
        let tracking = TrackingExecutor::with_executor(weak, executor.clone());
        tracking.execute(Task::new(|| panic!("must not be scheduled")));
        assert_eq!(executor.pending(), 0);
    }

    #[test]
    fn tracking_callback_stops_when_its_subject_dies() {
        let subject = Arc::new(());
        let calls = Arc::new(AtomicUsize::new(0));

        let recorded = calls.clone();
        let callback = tracking_callback(Arc::downgrade(&subject), move |_: &i32| {
            recorded.fetch_add(1, Ordering::Relaxed);
        });

        callback(&1);
        assert_eq!(calls.load(Ordering::Relaxed), 1);

        drop(subject);
        callback(&2);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn live_tracked_object_lets_the_callback_through() {
        let subject = Arc::new(());
        let calls = Arc::new(AtomicUsize::new(0));
        let recorded = calls.clone();
        let tracking = TrackingExecutor::new(Arc::downgrade(&subject));
        tracking.execute(Task::new(move || {
            recorded.fetch_add(1, Ordering::Relaxed);
        }));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }
}
