//! Registry shared state and the dispatch loop.
//!
//! One `Shared` exists per channel, owned jointly by the transmitter and
//! every channel handle, and weakly referenced by every connection. The
//! registry mutex guards the socket list and the per-node reference counts;
//! it is never held while a user callback runs. Dispatch freezes the
//! current socket range into a reference-holding [`Snapshot`], unlocks, and
//! only then starts invoking — which is what makes connect, disconnect, and
//! recursive sends legal from inside a callback.

use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr::NonNull;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use crate::error::{CallbacksError, Panic};
use crate::list::{Node, SocketList};
use crate::socket::Socket;

// the mutable core of a channel: its socket list behind the registry mutex.
pub(crate) struct Shared<P: ?Sized> {
    sockets: Mutex<SocketList<P>>,
}

impl<P: ?Sized> Shared<P> {
    pub(crate) fn new() -> Self {
        Shared { sockets: Mutex::new(SocketList::new()) }
    }

    // register a socket at the tail; the returned node carries the user's
    // reference.
    pub(crate) fn add(&self, socket: Arc<dyn Socket<P>>) -> NonNull<Node<P>> {
        let node = self.sockets.lock().unwrap().push_back(socket);
        trace!("socket connected");
        node
    }

    // number of currently linked sockets.
    pub(crate) fn socket_count(&self) -> usize {
        self.sockets.lock().unwrap().len()
    }

    // freeze the current socket range for iteration outside the lock.
    // sockets connected afterwards are not part of the range.
    pub(crate) fn snapshot(&self) -> Snapshot<'_, P> {
        let (head, len) = self.sockets.lock().unwrap().acquire_all();
        Snapshot { shared: self, head, len }
    }
}

// payload-agnostic detach entry point, so connection handles need not know
// the channel's payload type.
pub(crate) trait Remover: Send + Sync {
    // block the socket behind the erased node pointer and release the
    // user's reference on it.
    //
    // UB if:
    //
    // - `node` did not come from `add` on this same registry.
    // - the same node is removed more than once.
    unsafe fn remove(&self, node: NonNull<()>);
}

impl<P: ?Sized> Remover for Shared<P> {
    unsafe fn remove(&self, node: NonNull<()>) {
        let node = node.cast::<Node<P>>();
        // block before taking the lock: a snapshot that already holds this
        // socket will still visit it, but invocation is now a no-op
        Node::socket(node).blocked().store(true, Ordering::Relaxed);
        self.sockets.lock().unwrap().release(node);
        trace!("socket disconnected");
    }
}

// reference-holding view of the registry, captured at dispatch start and
// released (re-locking the registry) on drop. confined to the dispatch
// frame by its borrow, which also keeps the registry alive around it.
pub(crate) struct Snapshot<'a, P: ?Sized> {
    shared: &'a Shared<P>,
    head: Option<NonNull<Node<P>>>,
    len: usize,
}

impl<P: ?Sized> Snapshot<'_, P> {
    pub(crate) fn iter(&self) -> SnapshotIter<'_, P> {
        SnapshotIter { cursor: self.head, remaining: self.len, _range: PhantomData }
    }
}

impl<P: ?Sized> Drop for Snapshot<'_, P> {
    fn drop(&mut self) {
        let mut sockets = self.shared.sockets.lock().unwrap();
        unsafe { sockets.release_range(self.head, self.len) };
    }
}

pub(crate) struct SnapshotIter<'s, P: ?Sized> {
    cursor: Option<NonNull<Node<P>>>,
    remaining: usize,
    _range: PhantomData<&'s ()>,
}

impl<P: ?Sized> Iterator for SnapshotIter<'_, P> {
    type Item = Arc<dyn Socket<P>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let node = self.cursor.expect("snapshot iterator outran its range");
        // safety: the snapshot holds a reference on every node in range
        let socket = unsafe { Node::socket(node) };
        self.remaining -= 1;
        if self.remaining > 0 {
            // safety: not the range's last node, so the node behind it is
            // in range too and its link cannot be concurrently written.
            // the last node's back-link is exactly what a concurrent
            // connect mutates, hence never read here.
            self.cursor = unsafe { Node::next(node) };
        }
        Some(socket)
    }
}

// fan one value out to every socket in the snapshot. a panicking callback
// never prevents its siblings from running: panics are caught per socket,
// stashed, and surfaced together once the fan-out completes.
pub(crate) fn dispatch_snapshot<P: ?Sized>(
    snapshot: Snapshot<'_, P>,
    value: Arc<P>,
) -> Result<(), CallbacksError> {
    let mut panics: Vec<Panic> = Vec::new();
    for socket in snapshot.iter() {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| socket.invoke(&value))) {
            warn!("channel callback panicked during dispatch");
            panics.push(panic);
        }
    }
    drop(snapshot);

    if panics.is_empty() {
        Ok(())
    } else {
        Err(CallbacksError::new(panics))
    }
}

pub(crate) fn dispatch<P: ?Sized>(shared: &Shared<P>, value: Arc<P>) -> Result<(), CallbacksError> {
    dispatch_snapshot(shared.snapshot(), value)
}
