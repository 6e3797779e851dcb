//! Connection handles.

use std::ptr::NonNull;
use std::sync::Weak;

use crate::state::Remover;

/// Single-owner handle controlling one subscription's lifetime.
///
/// Returned by the `connect` family of methods. Dropping the handle (or
/// calling [`disconnect`](Self::disconnect)) breaks the subscription:
/// future invocations of the callback are blocked immediately, and the
/// subscription record is reclaimed once the last in-flight dispatch
/// referencing it completes. A callback already running on another thread
/// is not interrupted — use a [`SyncTracker`](crate::SyncTracker) when
/// teardown must wait for it.
///
/// The handle only weakly references the channel's shared state, so it may
/// safely outlive the transmitter and every channel handle; disconnecting
/// then is a no-op.
#[derive(Default)]
#[must_use = "dropping a connection disconnects it"]
pub struct Connection {
    inner: Option<Inner>,
}

struct Inner {
    shared: Weak<dyn Remover>,
    // erased pointer to this subscription's registry node. valid until
    // handed back through Remover::remove exactly once.
    node: NonNull<()>,
}

// the node pointer is only dereferenced by the registry under its own
// mutex; the handle itself carries no payload access.
unsafe impl Send for Connection {}
unsafe impl Sync for Connection {}

impl Connection {
    /// Construct a disconnected handle.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn attach(shared: Weak<dyn Remover>, node: NonNull<()>) -> Self {
        debug_assert!(shared.strong_count() > 0);
        Connection { inner: Some(Inner { shared, node }) }
    }

    /// Break the subscription. Idempotent.
    ///
    /// If the channel's shared state is already gone the subscription died
    /// with it and this is a no-op.
    pub fn disconnect(&mut self) {
        if let Some(inner) = self.inner.take() {
            if let Some(shared) = inner.shared.upgrade() {
                // safety: the pointer came from this registry's connect and
                // taking `inner` makes this the only detach
                unsafe { shared.remove(inner.node) };
            }
        }
    }

    /// Whether this handle still controls a subscription in a live channel.
    pub fn is_connected(&self) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|inner| inner.shared.strong_count() > 0)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("connected", &self.is_connected())
            .finish()
    }
}
