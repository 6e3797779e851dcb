//! Condvar-backed blocking bridge for the library's futures.
//!
//! A trimmed-down take on the pollster crate: futures are polled through a
//! mutable reference so the caller keeps ownership, and waiting supports a
//! deadline. The waker is an `Arc`'d signal, so a waker left behind in a
//! future after a timed-out wait stays safe to wake.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll, Wake, Waker};
use std::time::Instant;

pub(crate) enum Timeout {
    Never,
    At(Instant),
}

enum SignalState {
    Empty,
    Waiting,
    Notified,
}

struct Signal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

impl Signal {
    fn new() -> Self {
        Signal { state: Mutex::new(SignalState::Empty), cond: Condvar::new() }
    }

    // park until notified; true if the deadline passed instead.
    fn wait(&self, timeout: &Timeout) -> bool {
        let mut state = self.state.lock().unwrap();
        match *state {
            SignalState::Notified => *state = SignalState::Empty,
            SignalState::Waiting => unreachable!("concurrent waits on one signal"),
            SignalState::Empty => {
                *state = SignalState::Waiting;
                while let SignalState::Waiting = *state {
                    match timeout {
                        Timeout::Never => state = self.cond.wait(state).unwrap(),
                        Timeout::At(deadline) => {
                            let Some(remaining) = deadline.checked_duration_since(Instant::now())
                            else {
                                *state = SignalState::Empty;
                                return true;
                            };
                            let (next, result) = self.cond.wait_timeout(state, remaining).unwrap();
                            state = next;
                            if result.timed_out() {
                                *state = SignalState::Empty;
                                return true;
                            }
                        }
                    }
                }
            }
        }
        false
    }

    fn notify(&self) {
        let mut state = self.state.lock().unwrap();
        match *state {
            SignalState::Notified => {}
            SignalState::Empty => *state = SignalState::Notified,
            SignalState::Waiting => {
                *state = SignalState::Empty;
                self.cond.notify_one();
            }
        }
    }
}

impl Wake for Signal {
    fn wake(self: Arc<Self>) {
        self.notify()
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.notify()
    }
}

fn block_on_inner<F>(future: &mut F, timeout: Timeout) -> Option<F::Output>
where
    F: Future + Unpin,
{
    let signal = Arc::new(Signal::new());
    let waker = Waker::from(Arc::clone(&signal));
    let mut cx = Context::from_waker(&waker);
    loop {
        match Pin::new(&mut *future).poll(&mut cx) {
            Poll::Ready(value) => break Some(value),
            Poll::Pending => {
                if signal.wait(&timeout) {
                    break None;
                }
            }
        }
    }
}

// block the thread until the future is ready.
pub(crate) fn block_on<F>(future: &mut F) -> F::Output
where
    F: Future + Unpin,
{
    block_on_inner(future, Timeout::Never).expect("wait without a deadline timed out")
}

// block the thread until the future is ready or the deadline passes.
pub(crate) fn block_on_deadline<F>(future: &mut F, deadline: Instant) -> Option<F::Output>
where
    F: Future + Unpin,
{
    block_on_inner(future, Timeout::At(deadline))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    // resolves on the nth poll, waking itself in between
    struct Countdown(u32);

    impl Future for Countdown {
        type Output = u32;

        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<u32> {
            if self.0 == 0 {
                Poll::Ready(7)
            } else {
                self.0 -= 1;
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        }
    }

    struct Never;

    impl Future for Never {
        type Output = ();

        fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
            Poll::Pending
        }
    }

    #[test]
    fn block_on_drives_a_self_waking_future() {
        assert_eq!(block_on(&mut Countdown(3)), 7);
    }

    #[test]
    fn deadline_expiry_returns_none() {
        let deadline = Instant::now() + Duration::from_millis(20);
        assert_eq!(block_on_deadline(&mut Never, deadline), None);
    }
}
