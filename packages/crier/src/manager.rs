//! Connection keepers: plain storage, and tracker-guarded storage with
//! synchronous teardown.

use crate::channel::Subscribe;
use crate::connection::Connection;
use crate::error::{ChannelError, ConnectError};
use crate::executor::{Executor, TrackingExecutor};
use crate::tracker::SyncTracker;

/// Bag of connections, disconnected together.
///
/// A convenience owner for subscribers that hold many connections with one
/// lifetime: connect through the manager (or [`adopt`](Self::adopt)
/// connections made elsewhere) and [`release`](Self::release) — or drop —
/// the manager to break them all.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    connections: Vec<Connection>,
}

impl ConnectionManager {
    /// Construct an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a callback to `channel`, keeping the connection here.
    pub fn connect<T, F>(
        &mut self,
        channel: &impl Subscribe<T>,
        callback: F,
    ) -> Result<(), ChannelError>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let connection = channel.connect(callback)?;
        self.connections.push(connection);
        Ok(())
    }

    /// Connect a deferred callback to `channel`, keeping the connection
    /// here.
    pub fn connect_with<T, E, F>(
        &mut self,
        channel: &impl Subscribe<T>,
        executor: E,
        callback: F,
    ) -> Result<(), ChannelError>
    where
        E: Executor,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let connection = channel.connect_with(executor, callback)?;
        self.connections.push(connection);
        Ok(())
    }

    /// Take ownership of a connection made elsewhere.
    pub fn adopt(&mut self, connection: Connection) {
        self.connections.push(connection);
    }

    /// Number of held connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connections are held.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Disconnect and drop every held connection.
    pub fn release(&mut self) {
        self.connections.clear();
    }
}

/// Connection keeper whose teardown waits for in-flight callbacks.
///
/// Every callback connected through this manager is guarded by the
/// manager's [`SyncTracker`]: [`sync_release`](Self::sync_release) (or
/// drop) disconnects everything and then blocks until the last guarded
/// callback still running anywhere has finished — after which the
/// subscriber's shared state is safe to tear down.
#[derive(Debug, Default)]
pub struct SyncConnectionManager {
    tracker: SyncTracker,
    connections: ConnectionManager,
}

impl SyncConnectionManager {
    /// Construct an empty manager with a live tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a tracker-guarded callback to `channel`.
    ///
    /// The callback runs inline on the dispatching thread, holding the
    /// tracker's gate in shared mode.
    pub fn connect<T, F>(
        &mut self,
        channel: &impl Subscribe<T>,
        callback: F,
    ) -> Result<(), ConnectError>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let tracked = self.tracker.tracked_object()?;
        let connection = channel.connect_with(TrackingExecutor::new(tracked), callback)?;
        self.connections.adopt(connection);
        Ok(())
    }

    /// Connect a tracker-guarded callback deferred to `executor`.
    pub fn connect_with<T, E, F>(
        &mut self,
        channel: &impl Subscribe<T>,
        executor: E,
        callback: F,
    ) -> Result<(), ConnectError>
    where
        E: Executor,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let tracked = self.tracker.tracked_object()?;
        let connection =
            channel.connect_with(TrackingExecutor::with_executor(tracked, executor), callback)?;
        self.connections.adopt(connection);
        Ok(())
    }

    /// The manager's tracker, for integrating with user synchronization.
    pub fn tracker(&self) -> &SyncTracker {
        &self.tracker
    }

    /// Disconnect every connection, then drain in-flight callbacks.
    ///
    /// After this returns no callback connected through this manager is
    /// running or will run. Connecting afterwards fails with a tracker
    /// error. Idempotent.
    pub fn sync_release(&mut self) {
        self.connections.release();
        self.tracker.sync_release();
    }
}

impl Drop for SyncConnectionManager {
    fn drop(&mut self) {
        self.sync_release();
    }
}
