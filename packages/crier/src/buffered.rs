//! Buffered channels: fan-out plus a last-value slot with replay on
//! connect.

use std::sync::{Arc, RwLock, Weak};

use crate::channel::Subscribe;
use crate::connection::Connection;
use crate::error::{CallbacksError, ChannelError};
use crate::executor::Executor;
use crate::socket::{DeferredSocket, ImmediateSocket, Socket};
use crate::state::{dispatch_snapshot, Remover, Shared};

// registry plus the last-value slot. the slot lock is distinct from the
// registry mutex and is always taken first (by send and connect alike), so
// the two can never deadlock against each other.
pub(crate) struct BufferedShared<T> {
    base: Shared<T>,
    value: RwLock<Option<Arc<T>>>,
}

impl<T> BufferedShared<T> {
    fn new() -> Self {
        BufferedShared { base: Shared::new(), value: RwLock::new(None) }
    }
}

impl<T: Send + Sync + 'static> Remover for BufferedShared<T> {
    unsafe fn remove(&self, node: std::ptr::NonNull<()>) {
        Remover::remove(&self.base, node)
    }
}

/// Consumer-side endpoint of a buffered channel.
///
/// Like [`Channel`](crate::Channel), but the channel stores the last sent
/// value: a subscriber that connects after a send is immediately invoked
/// with the stored value (replay), so late subscribers never miss the
/// current state, and [`get_value`](Self::get_value) exposes it directly.
pub struct BufferedChannel<T> {
    pub(crate) shared: Option<Arc<BufferedShared<T>>>,
}

impl<T: Send + Sync + 'static> BufferedChannel<T> {
    /// Whether this handle refers to a shared state.
    pub fn is_valid(&self) -> bool {
        self.shared.is_some()
    }

    /// The buffered value: `None` until the first send.
    ///
    /// Returns a shared handle to the stored value, never a copy of it, so
    /// this is O(1) however large the payload. Concurrent sends never yield
    /// a torn value — the result is always some value that was completely
    /// sent. Errors with [`ChannelError`] on a handle without shared state.
    pub fn get_value(&self) -> Result<Option<Arc<T>>, ChannelError> {
        let shared = self.shared.as_ref().ok_or(ChannelError)?;
        Ok(shared.value.read().unwrap().clone())
    }

    fn connect_impl(&self, socket: Arc<dyn Socket<T>>) -> Result<Connection, ChannelError> {
        let shared = self.shared.as_ref().ok_or(ChannelError)?;

        // holding the slot's read side across registration and replay
        // orders this connect against sends: either the new socket lands in
        // the send's snapshot, or the replay below delivers the value it
        // would otherwise have missed. never both, never neither.
        let value = shared.value.read().unwrap();
        let node = shared.base.add(Arc::clone(&socket));
        if let Some(stored) = value.as_ref() {
            socket.invoke(stored);
        }
        drop(value);

        let remover: Arc<dyn Remover> = shared.clone();
        let weak: Weak<dyn Remover> = Arc::downgrade(&remover);
        Ok(Connection::attach(weak, node.cast()))
    }
}

impl<T: Send + Sync + 'static> Subscribe<T> for BufferedChannel<T> {
    /// Connect a callback, replaying the buffered value to it (synchronously,
    /// before returning) if one is present.
    ///
    /// A panic raised by the replay propagates to the connecting caller.
    fn connect<F>(&self, callback: F) -> Result<Connection, ChannelError>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.connect_impl(Arc::new(ImmediateSocket::new(callback)))
    }

    /// Connect a deferred callback; a buffered value is replayed through
    /// the executor.
    fn connect_with<E, F>(&self, executor: E, callback: F) -> Result<Connection, ChannelError>
    where
        E: Executor,
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.connect_impl(DeferredSocket::new(executor, callback))
    }
}

impl<T> Clone for BufferedChannel<T> {
    fn clone(&self) -> Self {
        BufferedChannel { shared: self.shared.clone() }
    }
}

impl<T> Default for BufferedChannel<T> {
    fn default() -> Self {
        BufferedChannel { shared: None }
    }
}

impl<T> PartialEq for BufferedChannel<T> {
    fn eq(&self, other: &Self) -> bool {
        match (&self.shared, &other.shared) {
            (Some(lhs), Some(rhs)) => Arc::ptr_eq(lhs, rhs),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T> Eq for BufferedChannel<T> {}

impl<T> std::fmt::Debug for BufferedChannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedChannel")
            .field("valid", &self.shared.is_some())
            .finish()
    }
}

/// Producer-side handle of a buffered channel.
pub struct BufferedTransmitter<T> {
    shared: Arc<BufferedShared<T>>,
}

impl<T: Send + Sync + 'static> BufferedTransmitter<T> {
    /// Create a fresh buffered channel and its transmitter.
    pub fn new() -> Self {
        BufferedTransmitter { shared: Arc::new(BufferedShared::new()) }
    }

    /// A channel handle for handing to consumers. Always valid.
    pub fn channel(&self) -> BufferedChannel<T> {
        BufferedChannel { shared: Some(Arc::clone(&self.shared)) }
    }

    /// The buffered value: `None` until the first send.
    pub fn value(&self) -> Option<Arc<T>> {
        self.shared.value.read().unwrap().clone()
    }

    /// Store `value` in the slot, then fan it out like
    /// [`Transmitter::send`](crate::Transmitter::send).
    pub fn send(&self, value: T) -> Result<(), CallbacksError> {
        let value = Arc::new(value);
        let snapshot;
        {
            let mut slot = self.shared.value.write().unwrap();
            *slot = Some(Arc::clone(&value));
            // snapshot while still holding the slot: a connect running
            // concurrently either lands in this snapshot or replays the
            // value just stored
            snapshot = self.shared.base.snapshot();
        }
        dispatch_snapshot(snapshot, value)
    }
}

impl<T: Send + Sync + 'static> Default for BufferedTransmitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for BufferedTransmitter<T> {
    fn clone(&self) -> Self {
        BufferedTransmitter { shared: Arc::clone(&self.shared) }
    }
}

impl<T> std::fmt::Debug for BufferedTransmitter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedTransmitter").finish()
    }
}
