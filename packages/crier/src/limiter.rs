//! Channel wrappers that narrow a behavior: send at most once, send only
//! new values, connect without executors.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::buffered::{BufferedChannel, BufferedTransmitter};
use crate::channel::{Channel, Subscribe, Transmitter};
use crate::connection::Connection;
use crate::error::{ChannelError, SendError, TransmitterError};

/// Sending-side protocol shared by transmitters and their limiters.
///
/// Abstracts over what a value-accepting producer looks like, so limiters
/// and [`Transponder`](crate::Transponder)s compose over plain, buffered,
/// and already-limited transmitters alike.
pub trait Transmit: Send + Sync + 'static {
    /// Payload accepted by [`send`](Self::send).
    type Value;

    /// Consumer handle type of the underlying channel.
    type Channel;

    /// Fan a value out to the channel's subscribers.
    fn send(&self, value: Self::Value) -> Result<(), SendError>;

    /// A consumer handle to the underlying channel. Always valid.
    fn channel(&self) -> Self::Channel;
}

impl<T: Send + Sync + 'static> Transmit for Transmitter<T> {
    type Value = T;
    type Channel = Channel<T>;

    fn send(&self, value: T) -> Result<(), SendError> {
        Transmitter::send(self, value).map_err(SendError::from)
    }

    fn channel(&self) -> Channel<T> {
        Transmitter::channel(self)
    }
}

impl<T: Send + Sync + 'static> Transmit for BufferedTransmitter<T> {
    type Value = T;
    type Channel = BufferedChannel<T>;

    fn send(&self, value: T) -> Result<(), SendError> {
        BufferedTransmitter::send(self, value).map_err(SendError::from)
    }

    fn channel(&self) -> BufferedChannel<T> {
        BufferedTransmitter::channel(self)
    }
}

/// Limiter allowing exactly one successful send.
///
/// The first `send` delegates to the wrapped transmitter; every later one
/// fails with [`TransmitterError`] without dispatching. The check is a
/// lock-free atomic test-and-set, so under concurrent senders exactly one
/// wins.
///
/// ```
/// use crier::{SendOnce, Transmit, Transmitter};
///
/// let cancel = SendOnce::new(Transmitter::<()>::new());
/// assert!(cancel.send(()).is_ok());
/// assert!(cancel.send(()).is_err());
/// ```
pub struct SendOnce<X> {
    inner: X,
    sent: AtomicBool,
}

impl<X: Transmit> SendOnce<X> {
    /// Wrap `inner`, with its send budget unspent.
    pub fn new(inner: X) -> Self {
        SendOnce { inner, sent: AtomicBool::new(false) }
    }

    /// The wrapped transmitter.
    pub fn inner(&self) -> &X {
        &self.inner
    }
}

impl<X: Transmit> Transmit for SendOnce<X> {
    type Value = X::Value;
    type Channel = X::Channel;

    fn send(&self, value: X::Value) -> Result<(), SendError> {
        if self.sent.swap(true, Ordering::Relaxed) {
            return Err(TransmitterError.into());
        }
        self.inner.send(value)
    }

    fn channel(&self) -> X::Channel {
        self.inner.channel()
    }
}

impl<X: Transmit + Default> Default for SendOnce<X> {
    fn default() -> Self {
        Self::new(X::default())
    }
}

impl<X: std::fmt::Debug> std::fmt::Debug for SendOnce<X> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendOnce")
            .field("inner", &self.inner)
            .field("sent", &self.sent.load(Ordering::Relaxed))
            .finish()
    }
}

/// Limiter over a buffered transmitter that suppresses duplicate sends.
///
/// A send whose value equals the currently buffered one is skipped without
/// dispatching; anything else passes through.
///
/// Not thread-safe with respect to concurrent senders: the compare and the
/// send are not one atomic step, so racing senders may both dispatch equal
/// values. Single-producer use is the contract.
pub struct NewOnly<T> {
    inner: BufferedTransmitter<T>,
}

impl<T> NewOnly<T>
where
    T: PartialEq + Send + Sync + 'static,
{
    /// Wrap a buffered transmitter.
    pub fn new(inner: BufferedTransmitter<T>) -> Self {
        NewOnly { inner }
    }

    /// The wrapped transmitter.
    pub fn inner(&self) -> &BufferedTransmitter<T> {
        &self.inner
    }
}

impl<T> Transmit for NewOnly<T>
where
    T: PartialEq + Send + Sync + 'static,
{
    type Value = T;
    type Channel = BufferedChannel<T>;

    fn send(&self, value: T) -> Result<(), SendError> {
        if let Some(current) = self.inner.value() {
            if *current == value {
                return Ok(());
            }
        }
        self.inner.send(value).map_err(SendError::from)
    }

    fn channel(&self) -> BufferedChannel<T> {
        self.inner.channel()
    }
}

impl<T> Default for NewOnly<T>
where
    T: PartialEq + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(BufferedTransmitter::new())
    }
}

impl<T> std::fmt::Debug for NewOnly<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewOnly").finish()
    }
}

/// Channel wrapper without the executor overload of `connect`.
///
/// Forces every subscriber of the wrapped channel to the immediate variant;
/// the deferred [`connect_with`](crate::Subscribe::connect_with) simply does
/// not exist on this type.
#[derive(Debug, Clone)]
pub struct NoExecutor<C> {
    inner: C,
}

impl<C> NoExecutor<C> {
    /// Wrap a channel handle.
    pub fn new(inner: C) -> Self {
        NoExecutor { inner }
    }

    /// Connect a callback to the wrapped channel.
    pub fn connect<T, F>(&self, callback: F) -> Result<Connection, ChannelError>
    where
        C: Subscribe<T>,
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.inner.connect(callback)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier};

    use super::*;

    #[test]
    fn send_once_permits_exactly_one_send() {
        let transmitter = SendOnce::new(Transmitter::<i32>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let recorded = calls.clone();
        let _connection = transmitter
            .channel()
            .connect(move |_| {
                recorded.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();

        transmitter.send(1).unwrap();
        assert!(matches!(
            transmitter.send(2).unwrap_err(),
            SendError::Transmitter(TransmitterError)
        ));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn concurrent_senders_race_for_the_single_send() {
        const SENDERS: usize = 100;

        let transmitter = Arc::new(SendOnce::new(Transmitter::<usize>::new()));
        let dispatched = Arc::new(AtomicUsize::new(0));

        let recorded = dispatched.clone();
        let _connection = transmitter
            .channel()
            .connect(move |_| {
                recorded.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();

        let barrier = Arc::new(Barrier::new(SENDERS));
        let successes = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..SENDERS)
            .map(|i| {
                let transmitter = transmitter.clone();
                let barrier = barrier.clone();
                let successes = successes.clone();
                let failures = failures.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    match transmitter.send(i) {
                        Ok(()) => successes.fetch_add(1, Ordering::Relaxed),
                        Err(SendError::Transmitter(_)) => failures.fetch_add(1, Ordering::Relaxed),
                        Err(other) => panic!("unexpected error: {other}"),
                    };
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(successes.load(Ordering::Relaxed), 1);
        assert_eq!(failures.load(Ordering::Relaxed), SENDERS - 1);
        assert_eq!(dispatched.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn new_only_skips_duplicates_of_the_buffered_value() {
        let transmitter = NewOnly::new(BufferedTransmitter::<i32>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let recorded = calls.clone();
        let _connection = transmitter
            .channel()
            .connect(move |_| {
                recorded.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();

        transmitter.send(1).unwrap();
        transmitter.send(1).unwrap();
        transmitter.send(2).unwrap();
        transmitter.send(2).unwrap();
        transmitter.send(3).unwrap();
        assert_eq!(calls.load(Ordering::Relaxed), 3);
        assert_eq!(*transmitter.channel().get_value().unwrap().unwrap(), 3);
    }

    #[test]
    fn new_only_lets_the_first_send_through() {
        let transmitter = NewOnly::<i32>::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let recorded = calls.clone();
        let _connection = transmitter
            .channel()
            .connect(move |_| {
                recorded.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();

        transmitter.send(0).unwrap();
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn limiters_stack() {
        // a once-only, deduplicating announcement
        let transmitter = SendOnce::new(NewOnly::new(BufferedTransmitter::<i32>::new()));
        transmitter.send(1).unwrap();
        assert!(transmitter.send(2).is_err());
        assert_eq!(*transmitter.channel().get_value().unwrap().unwrap(), 1);
    }

    #[test]
    fn no_executor_still_connects_immediate_callbacks() {
        let transmitter = Transmitter::<i32>::new();
        let wrapped = NoExecutor::new(transmitter.channel());
        let calls = Arc::new(AtomicUsize::new(0));

        let recorded = calls.clone();
        let _connection = wrapped
            .connect(move |_: &i32| {
                recorded.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();

        transmitter.send(4).unwrap();
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }
}
