//! Error types.

use std::any::Any;
use std::fmt;

use thiserror::Error;

/// Payload of a caught callback or aggregator panic, as produced by
/// [`std::panic::catch_unwind`].
pub type Panic = Box<dyn Any + Send + 'static>;

/// Error for operating on a channel handle that has no shared state
///
/// Default-constructed channel handles refer to no state; only handles
/// obtained from a transmitter do.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("channel has no shared state")]
pub struct ChannelError;

/// Error for sending through a transmitter whose send limit is spent
///
/// Raised by [`SendOnce`](crate::SendOnce) on every send after the first.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("transmitter is out of sends")]
pub struct TransmitterError;

/// Error for operating on an already released [`SyncTracker`](crate::SyncTracker)
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("sync tracker already released")]
pub struct TrackerError;

/// Error aggregating the panics raised by callbacks during one dispatch
///
/// A panicking callback never prevents its siblings from running: the
/// dispatcher catches the panic, stashes its payload, and continues. Once
/// the whole fan-out has completed, the collected payloads are surfaced
/// through this error, in subscriber connection order.
#[derive(Error)]
#[error("{} callback(s) panicked during dispatch", .panics.len())]
pub struct CallbacksError {
    panics: Vec<Panic>,
}

impl CallbacksError {
    pub(crate) fn new(panics: Vec<Panic>) -> Self {
        debug_assert!(!panics.is_empty());
        CallbacksError { panics }
    }

    /// The caught panic payloads, in subscriber connection order.
    pub fn panics(&self) -> &[Panic] {
        &self.panics
    }

    /// Consume the error, yielding the payloads for re-raising or
    /// inspection.
    pub fn into_panics(self) -> Vec<Panic> {
        self.panics
    }
}

impl fmt::Debug for CallbacksError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbacksError")
            .field("panics", &self.panics.iter().map(panic_message).collect::<Vec<_>>())
            .finish()
    }
}

/// Error resolving an [`AggregateFuture`](crate::AggregateFuture): an
/// aggregator method panicked
///
/// The first aggregator panic latches the dispatch future with this error;
/// no further aggregator method is invoked afterwards.
#[derive(Error)]
#[error("aggregator panicked")]
pub struct AggregateError {
    panic: Panic,
}

impl AggregateError {
    pub(crate) fn new(panic: Panic) -> Self {
        AggregateError { panic }
    }

    /// The caught aggregator panic payload.
    pub fn panic(&self) -> &Panic {
        &self.panic
    }

    /// Consume the error, yielding the payload for re-raising.
    pub fn into_panic(self) -> Panic {
        self.panic
    }
}

impl fmt::Debug for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateError")
            .field("panic", &panic_message(&self.panic))
            .finish()
    }
}

/// Error for sending through a limited transmitter
#[derive(Error, Debug)]
pub enum SendError {
    /// One or more callbacks panicked; the dispatch itself ran.
    #[error(transparent)]
    Callbacks(#[from] CallbacksError),
    /// A limiter refused the send before any callback ran.
    #[error(transparent)]
    Transmitter(#[from] TransmitterError),
}

/// Error for connecting through a [`SyncConnectionManager`](crate::SyncConnectionManager)
#[derive(Error, Debug)]
pub enum ConnectError {
    /// The target channel has no shared state.
    #[error(transparent)]
    Channel(#[from] ChannelError),
    /// The manager's tracker was already released.
    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

// best-effort extraction of the conventional &str/String panic payloads
fn panic_message(panic: &Panic) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}
