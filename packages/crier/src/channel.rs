//! Unbuffered channels: plain fan-out of each sent value.

use std::sync::{Arc, Weak};

use crate::connection::Connection;
use crate::error::{CallbacksError, ChannelError};
use crate::executor::Executor;
use crate::socket::{DeferredSocket, ImmediateSocket, Socket};
use crate::state::{dispatch, Remover, Shared};

/// Consumer-side endpoint of a channel: subscribers connect callbacks here.
///
/// A subscription endpoint. Channel handles are cheap to clone and all
/// clones obtained from one transmitter share one subscription registry;
/// the registry lives until the transmitter *and* every handle are gone.
/// Default-constructed handles refer to no registry and refuse to connect.
///
/// Channel equality is registry identity: handles compare equal iff they
/// share a registry, and default-constructed handles compare equal to each
/// other but never to a state-owning handle.
pub struct Channel<T> {
    pub(crate) shared: Option<Arc<Shared<T>>>,
}

/// Connect-capable channel endpoints.
///
/// Implemented by [`Channel`] and [`BufferedChannel`](crate::BufferedChannel);
/// generic code (managers, transponders) subscribes through this trait.
pub trait Subscribe<T> {
    /// Connect a callback to be invoked on every dispatch.
    ///
    /// The callback runs synchronously on whichever thread calls `send`.
    /// Errors with [`ChannelError`] on a handle without shared state.
    fn connect<F>(&self, callback: F) -> Result<Connection, ChannelError>
    where
        F: Fn(&T) + Send + Sync + 'static;

    /// Connect a callback whose invocations are deferred to `executor`.
    ///
    /// Each dispatch wraps the value and the callback into a
    /// [`Task`](crate::Task) and hands it to the executor; the callback
    /// later runs on whatever thread the executor chooses, at most once per
    /// task, and not at all if the connection is gone by then.
    fn connect_with<E, F>(&self, executor: E, callback: F) -> Result<Connection, ChannelError>
    where
        E: Executor,
        F: Fn(&T) + Send + Sync + 'static;
}

impl<T> Channel<T> {
    /// Whether this handle refers to a shared state.
    pub fn is_valid(&self) -> bool {
        self.shared.is_some()
    }
}

impl<T: Send + Sync + 'static> Subscribe<T> for Channel<T> {
    fn connect<F>(&self, callback: F) -> Result<Connection, ChannelError>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let shared = self.shared.as_ref().ok_or(ChannelError)?;
        let socket: Arc<dyn Socket<T>> = Arc::new(ImmediateSocket::new(callback));
        let node = shared.add(socket);
        let remover: Arc<dyn Remover> = shared.clone();
        let weak: Weak<dyn Remover> = Arc::downgrade(&remover);
        Ok(Connection::attach(weak, node.cast()))
    }

    fn connect_with<E, F>(&self, executor: E, callback: F) -> Result<Connection, ChannelError>
    where
        E: Executor,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let shared = self.shared.as_ref().ok_or(ChannelError)?;
        let socket: Arc<dyn Socket<T>> = DeferredSocket::new(executor, callback);
        let node = shared.add(socket);
        let remover: Arc<dyn Remover> = shared.clone();
        let weak: Weak<dyn Remover> = Arc::downgrade(&remover);
        Ok(Connection::attach(weak, node.cast()))
    }
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Channel { shared: self.shared.clone() }
    }
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Channel { shared: None }
    }
}

impl<T> PartialEq for Channel<T> {
    fn eq(&self, other: &Self) -> bool {
        match (&self.shared, &other.shared) {
            (Some(lhs), Some(rhs)) => Arc::ptr_eq(lhs, rhs),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T> Eq for Channel<T> {}

impl<T> std::fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").field("valid", &self.is_valid()).finish()
    }
}

/// Producer-side handle of an unbuffered channel.
///
/// Constructing a transmitter creates the channel's shared state; cloning
/// shares it, so every clone sends to the same subscribers. `send` fans the
/// value out synchronously (deferred subscribers get their tasks scheduled
/// synchronously) in subscriber connection order.
pub struct Transmitter<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + Sync + 'static> Transmitter<T> {
    /// Create a fresh channel and its transmitter.
    pub fn new() -> Self {
        Transmitter { shared: Arc::new(Shared::new()) }
    }

    /// A channel handle for handing to consumers. Always valid.
    pub fn channel(&self) -> Channel<T> {
        Channel { shared: Some(Arc::clone(&self.shared)) }
    }

    /// Fan `value` out to every connected subscriber.
    ///
    /// Callbacks that panic do not stop the fan-out; their panics are
    /// aggregated into the returned [`CallbacksError`] in connection order.
    /// Sending with no subscribers is a no-op. Callbacks may connect,
    /// disconnect, and send on this same channel re-entrantly; subscribers
    /// connected from inside a callback are not invoked by the dispatch
    /// that is already in progress.
    pub fn send(&self, value: T) -> Result<(), CallbacksError> {
        dispatch(&self.shared, Arc::new(value))
    }
}

impl<T: Send + Sync + 'static> Default for Transmitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Transmitter<T> {
    fn clone(&self) -> Self {
        Transmitter { shared: Arc::clone(&self.shared) }
    }
}

impl<T> std::fmt::Debug for Transmitter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transmitter").finish()
    }
}
