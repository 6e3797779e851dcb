//! Subscription records.
//!
//! A socket is one connected callback plus its block flag. The registry
//! owns sockets; snapshots and deferred tasks hold extra handles to them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::executor::{Executor, Task};

// one subscription record, as seen by the dispatch machinery.
pub(crate) trait Socket<P: ?Sized>: Send + Sync {
    // deliver one dispatched value. called without the registry mutex held;
    // must be a no-op once the block flag is set.
    fn invoke(&self, value: &Arc<P>);

    // the subscription's block flag. set (with relaxed ordering) before the
    // socket is detached from the registry; checked on every delivery.
    fn blocked(&self) -> &AtomicBool;
}

// socket that runs its callback synchronously on the dispatching thread.
pub(crate) struct ImmediateSocket<F> {
    blocked: AtomicBool,
    callback: F,
}

impl<F> ImmediateSocket<F> {
    pub(crate) fn new(callback: F) -> Self {
        ImmediateSocket { blocked: AtomicBool::new(false), callback }
    }
}

impl<P, F> Socket<P> for ImmediateSocket<F>
where
    P: ?Sized,
    F: Fn(&P) + Send + Sync,
{
    fn invoke(&self, value: &Arc<P>) {
        if self.blocked.load(Ordering::Relaxed) {
            return;
        }
        (self.callback)(value.as_ref())
    }

    fn blocked(&self) -> &AtomicBool {
        &self.blocked
    }
}

// socket that wraps each delivery into a task and hands it to its executor.
//
// the task captures a strong handle to the socket, so it stays safely
// runnable after the channel, the transmitter, and the connection are gone.
pub(crate) struct DeferredSocket<E, F> {
    blocked: AtomicBool,
    executor: E,
    callback: F,
    weak_self: Weak<Self>,
}

impl<E, F> DeferredSocket<E, F> {
    pub(crate) fn new(executor: E, callback: F) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| DeferredSocket {
            blocked: AtomicBool::new(false),
            executor,
            callback,
            weak_self: weak_self.clone(),
        })
    }
}

impl<P, E, F> Socket<P> for DeferredSocket<E, F>
where
    P: ?Sized + Send + Sync + 'static,
    E: Executor,
    F: Fn(&P) + Send + Sync + 'static,
{
    fn invoke(&self, value: &Arc<P>) {
        let Some(socket) = self.weak_self.upgrade() else {
            return;
        };
        let mut state = Some((socket, Arc::clone(value)));
        let task = Task::new(move || {
            // the captured state is moved out on the first run, making any
            // repeat invocation by the executor a no-op
            let Some((socket, value)) = state.take() else {
                return;
            };
            if socket.blocked.load(Ordering::Relaxed) {
                return;
            }
            (socket.callback)(&*value);
        });
        self.executor.execute(task);
    }

    fn blocked(&self) -> &AtomicBool {
        &self.blocked
    }
}
