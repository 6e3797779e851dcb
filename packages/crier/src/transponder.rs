//! Inline pipeline stages: source channel → user function → destination
//! channel.

use std::panic::resume_unwind;

use crate::channel::Subscribe;
use crate::connection::Connection;
use crate::error::ChannelError;
use crate::executor::Executor;
use crate::limiter::Transmit;

/// Pipeline stage between a source channel and an owned destination.
///
/// On every source dispatch the user function is called with the
/// destination transmitter and the payload; whether and what to emit
/// downstream is entirely its decision. [`transform`] and [`filter`] build
/// the two common function shapes.
///
/// `X` is the destination transmitter kind — plain, buffered, or limited —
/// so a transponder can, say, deduplicate into a [`NewOnly`](crate::NewOnly)
/// destination.
///
/// ```
/// use crier::{transform, Subscribe, Transmitter, Transponder};
///
/// let source = Transmitter::<i32>::new();
/// let doubled: Transponder<Transmitter<i32>> =
///     Transponder::attach(&source.channel(), transform(|value: &i32| value * 2)).unwrap();
///
/// let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
/// let sink = seen.clone();
/// let _connection = doubled
///     .channel()
///     .connect(move |value: &i32| sink.lock().unwrap().push(*value))
///     .unwrap();
///
/// source.send(3).unwrap();
/// assert_eq!(*seen.lock().unwrap(), [6]);
/// ```
pub struct Transponder<X: Transmit> {
    channel: X::Channel,
    connection: Connection,
}

impl<X> Transponder<X>
where
    X: Transmit + Default,
    X::Channel: Default,
{
    /// Construct an unassigned transponder; its channel handle is invalid
    /// until [`assign`](Self::assign).
    pub fn new() -> Self {
        Transponder { channel: X::Channel::default(), connection: Connection::new() }
    }

    /// Construct and immediately [`assign`](Self::assign).
    pub fn attach<S, F>(source: &impl Subscribe<S>, callback: F) -> Result<Self, ChannelError>
    where
        F: Fn(&X, &S) + Send + Sync + 'static,
    {
        let mut transponder = Self::new();
        transponder.assign(source, callback)?;
        Ok(transponder)
    }

    /// Connect `callback` to `source`, feeding a fresh destination channel.
    ///
    /// The callback receives the destination transmitter and each source
    /// payload. A failure it encounters sending downstream (for [`transform`]
    /// and [`filter`]: any downstream dispatch error) re-raises through the
    /// source's dispatcher and surfaces in the *upstream* send's
    /// [`CallbacksError`](crate::error::CallbacksError).
    ///
    /// A previous assignment is disconnected first.
    pub fn assign<S, F>(
        &mut self,
        source: &impl Subscribe<S>,
        callback: F,
    ) -> Result<(), ChannelError>
    where
        F: Fn(&X, &S) + Send + Sync + 'static,
    {
        let transmitter = X::default();
        self.channel = transmitter.channel();
        self.connection = source.connect(move |value: &S| callback(&transmitter, value))?;
        Ok(())
    }

    /// Like [`assign`](Self::assign), deferring the stage to `executor`.
    pub fn assign_with<S, E, F>(
        &mut self,
        source: &impl Subscribe<S>,
        executor: E,
        callback: F,
    ) -> Result<(), ChannelError>
    where
        E: Executor,
        F: Fn(&X, &S) + Send + Sync + 'static,
    {
        let transmitter = X::default();
        self.channel = transmitter.channel();
        self.connection =
            source.connect_with(executor, move |value: &S| callback(&transmitter, value))?;
        Ok(())
    }

    /// Disconnect from the source and invalidate the destination channel.
    pub fn reset(&mut self) {
        self.connection.disconnect();
        self.channel = X::Channel::default();
    }

    /// The destination channel handle. Valid while assigned.
    pub fn channel(&self) -> &X::Channel {
        &self.channel
    }
}

impl<X> Default for Transponder<X>
where
    X: Transmit + Default,
    X::Channel: Default,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<X: Transmit> std::fmt::Debug for Transponder<X> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transponder")
            .field("connection", &self.connection)
            .finish()
    }
}

/// Transponder stage sending `function`'s result downstream.
///
/// Every source payload is mapped and emitted; map to `()` for a bare
/// downstream pulse.
pub fn transform<X, S, F>(function: F) -> impl Fn(&X, &S) + Send + Sync + 'static
where
    X: Transmit,
    F: Fn(&S) -> X::Value + Send + Sync + 'static,
{
    move |transmitter, value| {
        if let Err(error) = transmitter.send(function(value)) {
            // surface downstream dispatch failures through the upstream
            // dispatcher, like any other panicking callback
            resume_unwind(Box::new(error));
        }
    }
}

/// Transponder stage re-emitting the payload iff `predicate` holds.
pub fn filter<X, S, P>(predicate: P) -> impl Fn(&X, &S) + Send + Sync + 'static
where
    X: Transmit<Value = S>,
    S: Clone,
    P: Fn(&S) -> bool + Send + Sync + 'static,
{
    move |transmitter, value| {
        if predicate(value) {
            if let Err(error) = transmitter.send(value.clone()) {
                resume_unwind(Box::new(error));
            }
        }
    }
}
