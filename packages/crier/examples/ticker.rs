//! A periodic ticker fanning tick counts out to an inline subscriber and a
//! worker-thread subscriber, torn down through a send-once cancellation
//! channel.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crier::{Channel, Connection, Executor, SendOnce, Subscribe, Task, Transmit, Transmitter};

struct WorkerState {
    lockable: Mutex<WorkerQueue>,
    notifier: Condvar,
}

struct WorkerQueue {
    tasks: Vec<Task>,
    stop: bool,
}

// executor feeding a single worker thread through a queue
#[derive(Clone)]
struct WorkerExecutor {
    state: Arc<WorkerState>,
}

impl Executor for WorkerExecutor {
    fn execute(&self, task: Task) {
        self.state.lockable.lock().unwrap().tasks.push(task);
        self.state.notifier.notify_one();
    }
}

// the worker thread plus its cancellation wiring
struct Worker {
    executor: WorkerExecutor,
    _cancel: Connection,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(cancel: &Channel<()>) -> Self {
        let state = Arc::new(WorkerState {
            lockable: Mutex::new(WorkerQueue { tasks: Vec::new(), stop: false }),
            notifier: Condvar::new(),
        });

        let run = Arc::clone(&state);
        let thread = thread::spawn(move || loop {
            let mut queue = run.lockable.lock().unwrap();
            while queue.tasks.is_empty() && !queue.stop {
                queue = run.notifier.wait(queue).unwrap();
            }
            if queue.stop {
                break;
            }
            let mut tasks = std::mem::take(&mut queue.tasks);
            drop(queue);
            for task in &mut tasks {
                task.run();
            }
        });

        let stop = Arc::clone(&state);
        let cancel_connection = cancel
            .connect(move |_| {
                stop.lockable.lock().unwrap().stop = true;
                stop.notifier.notify_one();
            })
            .expect("cancellation channel is valid");

        Worker {
            executor: WorkerExecutor { state },
            _cancel: cancel_connection,
            thread: Some(thread),
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

// ticks on its own thread until the cancellation channel fires
struct Ticker {
    channel: Channel<u64>,
    _cancel: Connection,
    thread: Option<JoinHandle<()>>,
}

impl Ticker {
    fn spawn(period: Duration, cancel: &Channel<()>) -> Self {
        let transmitter = Transmitter::<u64>::new();
        let channel = transmitter.channel();

        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let observed = Arc::clone(&stop);
        let cancel_connection = cancel
            .connect(move |_| {
                let (flag, notifier) = &*observed;
                *flag.lock().unwrap() = true;
                notifier.notify_one();
            })
            .expect("cancellation channel is valid");

        let thread = thread::spawn(move || {
            let mut ticks = 0_u64;
            loop {
                let (flag, notifier) = &*stop;
                let stopped = flag.lock().unwrap();
                let (guard, timeout) = notifier
                    .wait_timeout_while(stopped, period, |stopped| !*stopped)
                    .unwrap();
                drop(guard);
                if !timeout.timed_out() {
                    // woken by cancellation
                    break;
                }
                ticks += 1;
                if let Err(error) = transmitter.send(ticks) {
                    eprintln!("tick callbacks panicked: {error}");
                }
            }
        });

        Ticker { channel, _cancel: cancel_connection, thread: Some(thread) }
    }

    fn channel(&self) -> &Channel<u64> {
        &self.channel
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn main() {
    let cancellation = SendOnce::new(Transmitter::<()>::new());

    let worker = Worker::spawn(&cancellation.channel());
    let ticker = Ticker::spawn(Duration::from_millis(300), &cancellation.channel());

    let _deferred = ticker
        .channel()
        .connect_with(worker.executor.clone(), |tick: &u64| {
            println!("worker thread sees tick {tick}");
        })
        .expect("ticker channel is valid");
    let _inline = ticker
        .channel()
        .connect(|tick: &u64| {
            println!("ticker thread sees tick {tick}");
        })
        .expect("ticker channel is valid");

    thread::sleep(Duration::from_millis(1600));

    cancellation.send(()).expect("first cancellation send succeeds");
    assert!(cancellation.send(()).is_err(), "the limiter refuses a second send");

    drop(ticker);
    drop(worker);
}
