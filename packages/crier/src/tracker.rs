//! Synchronous drain of in-flight callbacks.
//!
//! A tracker hands out cheap [`TrackedObject`] clones; callbacks guarded by
//! one (through [`TrackingExecutor`](crate::TrackingExecutor) or a manual
//! [`TrackedObject::lock`]) hold the tracker's gate in shared mode while
//! they run. [`SyncTracker::sync_release`] flips the release flag and then
//! takes the gate exclusively — returning only once every in-flight guarded
//! callback has finished, with no further one able to start.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::error::TrackerError;
use crate::executor::Tracked;

// release flag plus a read/write gate. the gate is hand-counted rather
// than a std RwLock because its guards are owned values: they keep the
// shared state alive themselves and may be dropped on any thread.
struct TrackerShared {
    released: AtomicBool,
    gate: Mutex<Gate>,
    cond: Condvar,
}

struct Gate {
    readers: usize,
    exclusive: bool,
}

impl TrackerShared {
    fn new() -> Arc<Self> {
        Arc::new(TrackerShared {
            released: AtomicBool::new(false),
            gate: Mutex::new(Gate { readers: 0, exclusive: false }),
            cond: Condvar::new(),
        })
    }

    fn acquire_shared(&self) {
        let mut gate = self.gate.lock().unwrap();
        while gate.exclusive {
            gate = self.cond.wait(gate).unwrap();
        }
        gate.readers += 1;
    }

    fn release_shared(&self) {
        let mut gate = self.gate.lock().unwrap();
        gate.readers -= 1;
        if gate.readers == 0 {
            drop(gate);
            self.cond.notify_all();
        }
    }

    fn acquire_exclusive(&self) {
        let mut gate = self.gate.lock().unwrap();
        while gate.exclusive {
            gate = self.cond.wait(gate).unwrap();
        }
        // claim the writer slot first so new shared acquisitions queue
        // behind this one, then drain the readers already inside
        gate.exclusive = true;
        while gate.readers > 0 {
            gate = self.cond.wait(gate).unwrap();
        }
    }

    fn release_exclusive(&self) {
        let mut gate = self.gate.lock().unwrap();
        gate.exclusive = false;
        drop(gate);
        self.cond.notify_all();
    }
}

/// Gate for synchronously draining guarded callbacks before teardown.
///
/// See the [module docs](self) for the protocol. A tracker is single-owner;
/// dropping it sync-releases.
pub struct SyncTracker {
    shared: Option<Arc<TrackerShared>>,
}

impl SyncTracker {
    /// Construct a live tracker.
    pub fn new() -> Self {
        SyncTracker { shared: Some(TrackerShared::new()) }
    }

    /// Whether the tracker has not been released yet.
    pub fn is_valid(&self) -> bool {
        self.shared.is_some()
    }

    /// A handle for guarding callbacks against this tracker.
    ///
    /// Errors with [`TrackerError`] once the tracker is released.
    pub fn tracked_object(&self) -> Result<TrackedObject, TrackerError> {
        let shared = self.shared.as_ref().ok_or(TrackerError)?;
        Ok(TrackedObject { shared: Arc::clone(shared) })
    }

    /// Freeze every guarded callback for the guard's lifetime.
    ///
    /// Blocks until all outstanding [`TrackedGuard`]s drop; while the
    /// returned guard lives, no guarded callback starts — the window for
    /// manipulating user state the callbacks share. Also excludes
    /// concurrent `lock_all` and `sync_release` calls.
    ///
    /// Errors with [`TrackerError`] once the tracker is released.
    pub fn lock_all(&self) -> Result<TrackerGuard, TrackerError> {
        let shared = self.shared.as_ref().ok_or(TrackerError)?;
        shared.acquire_exclusive();
        Ok(TrackerGuard { shared: Arc::clone(shared) })
    }

    /// Release the tracker, draining in-flight guarded callbacks.
    ///
    /// Sets the release flag (so no further guarded callback can start),
    /// then blocks until every outstanding [`TrackedGuard`] drops. After
    /// this returns, no guarded callback is running and none will run
    /// again. Idempotent.
    pub fn sync_release(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.released.store(true, Ordering::Relaxed);
            // wait out the shared holders; new ones are refused by the flag
            shared.acquire_exclusive();
            shared.release_exclusive();
        }
    }
}

impl Default for SyncTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SyncTracker {
    fn drop(&mut self) {
        self.sync_release();
    }
}

impl std::fmt::Debug for SyncTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncTracker").field("valid", &self.is_valid()).finish()
    }
}

/// Cheap cloneable handle produced by [`SyncTracker::tracked_object`].
///
/// Implements the [`Tracked`] protocol: `lock` yields a guard that delays
/// `sync_release` for as long as it is held.
#[derive(Clone)]
pub struct TrackedObject {
    shared: Arc<TrackerShared>,
}

impl TrackedObject {
    /// Take shared ownership of the tracker's gate, unless released.
    ///
    /// Double-checked: the release flag is read, the gate taken in shared
    /// mode, and the flag re-read — a caller holding the returned guard can
    /// never coexist with a completed `sync_release`.
    pub fn lock(&self) -> Option<TrackedGuard> {
        if self.shared.released.load(Ordering::Relaxed) {
            return None;
        }
        self.shared.acquire_shared();
        if self.shared.released.load(Ordering::Relaxed) {
            self.shared.release_shared();
            return None;
        }
        Some(TrackedGuard { shared: Arc::clone(&self.shared) })
    }

    /// Whether the tracker has been released. Never blocks.
    pub fn expired(&self) -> bool {
        self.shared.released.load(Ordering::Relaxed)
    }
}

impl Tracked for TrackedObject {
    type Guard = TrackedGuard;

    fn lock(&self) -> Option<TrackedGuard> {
        TrackedObject::lock(self)
    }

    fn expired(&self) -> bool {
        TrackedObject::expired(self)
    }
}

impl std::fmt::Debug for TrackedObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedObject").field("expired", &self.expired()).finish()
    }
}

/// Shared-mode guard on a tracker's gate, held across a guarded callback.
#[must_use = "the tracker only waits for the guard while it is held"]
pub struct TrackedGuard {
    shared: Arc<TrackerShared>,
}

impl Drop for TrackedGuard {
    fn drop(&mut self) {
        self.shared.release_shared();
    }
}

/// Exclusive-mode guard returned by [`SyncTracker::lock_all`].
#[must_use = "callbacks are only frozen while the guard is held"]
pub struct TrackerGuard {
    shared: Arc<TrackerShared>,
}

impl Drop for TrackerGuard {
    fn drop(&mut self) {
        self.shared.release_exclusive();
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    #[test]
    fn fresh_tracker_hands_out_working_guards() {
        let tracker = SyncTracker::new();
        assert!(tracker.is_valid());

        let tracked = tracker.tracked_object().unwrap();
        assert!(!tracked.expired());
        let guard = tracked.lock();
        assert!(guard.is_some());
    }

    #[test]
    fn released_tracker_refuses_everything() {
        let mut tracker = SyncTracker::new();
        let tracked = tracker.tracked_object().unwrap();
        tracker.sync_release();

        assert!(!tracker.is_valid());
        assert!(tracker.tracked_object().is_err());
        assert!(tracker.lock_all().is_err());
        assert!(tracked.expired());
        assert!(tracked.lock().is_none());

        // idempotent
        tracker.sync_release();
    }

    #[test]
    fn sync_release_waits_for_outstanding_guards() {
        let mut tracker = SyncTracker::new();
        let tracked = tracker.tracked_object().unwrap();

        let holder = std::thread::spawn(move || {
            let guard = tracked.lock().expect("tracker is live");
            std::thread::sleep(Duration::from_millis(60));
            drop(guard);
        });

        // give the holder time to take the guard
        std::thread::sleep(Duration::from_millis(20));
        let started = Instant::now();
        tracker.sync_release();
        assert!(started.elapsed() >= Duration::from_millis(30));
        holder.join().unwrap();
    }

    #[test]
    fn lock_all_suspends_tracked_locks_until_dropped() {
        let tracker = SyncTracker::new();
        let tracked = tracker.tracked_object().unwrap();
        let frozen = tracker.lock_all().unwrap();

        let acquired = Arc::new(AtomicBool::new(false));
        let flag = acquired.clone();
        let locker = std::thread::spawn(move || {
            let guard = tracked.lock();
            flag.store(guard.is_some(), Ordering::SeqCst);
        });

        std::thread::sleep(Duration::from_millis(40));
        assert!(!acquired.load(Ordering::SeqCst));

        drop(frozen);
        locker.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn dropping_the_tracker_releases_it() {
        let tracker = SyncTracker::new();
        let tracked = tracker.tracked_object().unwrap();
        drop(tracker);
        assert!(tracked.expired());
        assert!(tracked.lock().is_none());
    }
}
