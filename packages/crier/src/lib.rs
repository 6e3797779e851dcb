//! # Crier: thread-safe typed signal/slot channels
//!
//! A channel is a typed broadcast endpoint: the producer side holds a
//! [`Transmitter`], consumers obtain a [`Channel`] handle from it and
//! `connect` callbacks to it. Every `send` on the transmitter fans the value
//! out to every connected callback. Connecting returns a [`Connection`]
//! handle; dropping (or explicitly disconnecting) it breaks the
//! subscription.
//!
//! ```
//! use crier::Subscribe;
//!
//! let transmitter = crier::Transmitter::<i32>::new();
//! let channel = transmitter.channel();
//!
//! let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
//! let sink = seen.clone();
//! let _connection = channel
//!     .connect(move |value: &i32| sink.lock().unwrap().push(*value))
//!     .unwrap();
//!
//! transmitter.send(1).unwrap();
//! transmitter.send(2).unwrap();
//! assert_eq!(*seen.lock().unwrap(), [1, 2]);
//! ```
//!
//! #### Channel variants
//!
//! Three variants share one subscription machinery:
//!
//! - [`Channel`] / [`Transmitter`]: plain fan-out. Callbacks run on the
//!   sending thread (unless deferred to an executor, see below), in
//!   connection order. A callback that panics does not prevent its siblings
//!   from running; the panics are collected and surfaced to the sender as a
//!   [`CallbacksError`](error::CallbacksError) once the whole fan-out
//!   completes.
//! - [`BufferedChannel`] / [`BufferedTransmitter`]: additionally stores the
//!   last sent value. A subscriber that connects late is immediately
//!   replayed the stored value, so it never misses the current state, and
//!   [`BufferedChannel::get_value`] exposes it as a cheap shared handle.
//! - [`AggregatingChannel`] / [`AggregatingTransmitter`]: callbacks return
//!   values, and each `send` carries an [`Aggregator`] that folds them (or
//!   the panics they raise) into one result. The aggregator can stop the
//!   fold early, and the caller gets an [`AggregateFuture`] that resolves
//!   once every callback in every executor has finished.
//!
//! #### Executors
//!
//! By default a callback runs synchronously inside `send`. Connecting with
//! [`Subscribe::connect_with`] instead hands each dispatch to an
//! [`Executor`] as a boxed [`Task`], to be run later on whatever thread the
//! executor chooses. Tasks are at-most-once: however often (or never) an
//! executor invokes them, the callback runs no more than one time, and a
//! disconnected subscriber's pending tasks turn into no-ops.
//!
//! #### Lifetimes and teardown
//!
//! Disconnecting blocks any further invocation of the callback, but a
//! callback already running on another thread keeps running. When shared
//! user state is about to be torn down, that is not enough; [`SyncTracker`]
//! closes the gap. Callbacks guarded by a tracker (via
//! [`TrackingExecutor`], or wholesale via [`SyncConnectionManager`]) can be
//! drained synchronously: `sync_release` returns only once every in-flight
//! guarded callback has finished and no further one can start.
//!
//! #### Composition
//!
//! [`Transponder`] splices a user function between a source channel and an
//! owned destination transmitter, with [`transform`] and [`filter`]
//! covering the two common shapes. Limiters wrap a transmitter to narrow
//! its behavior: [`SendOnce`] permits exactly one send, [`NewOnly`]
//! suppresses sends equal to the buffered value, and [`NoExecutor`] is a
//! channel wrapper that statically removes the executor overload of
//! `connect`.
//!
//! Callbacks may freely connect, disconnect, and send on the channel that
//! is currently dispatching to them: the registry lock is never held while
//! user code runs.

#[allow(unused_imports)]
#[macro_use]
extern crate tracing;

mod aggregating;
mod block;
mod buffered;
mod channel;
mod connection;
mod future;
mod limiter;
mod list;
mod manager;
mod socket;
mod state;
mod tracker;
mod transponder;

pub mod error;
pub mod executor;

pub use crate::aggregating::{
    AggregatingChannel, AggregatingTransmitter, Aggregator, ContinuationStatus,
};
pub use crate::buffered::{BufferedChannel, BufferedTransmitter};
pub use crate::channel::{Channel, Subscribe, Transmitter};
pub use crate::connection::Connection;
pub use crate::executor::{
    tracking_callback, Executor, InlineExecutor, Task, Tracked, TrackingExecutor,
};
pub use crate::future::AggregateFuture;
pub use crate::limiter::{NewOnly, NoExecutor, SendOnce, Transmit};
pub use crate::manager::{ConnectionManager, SyncConnectionManager};
pub use crate::tracker::{SyncTracker, TrackedGuard, TrackedObject, TrackerGuard};
pub use crate::transponder::{filter, transform, Transponder};
