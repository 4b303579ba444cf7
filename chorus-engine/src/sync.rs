//! Worker synchronisation primitives.
//!
//! Both the player control and every output controller follow the same
//! shape: shared state behind one mutex, a single-slot command field inside
//! that state, a `wake_cond` that wakes the worker thread and a
//! `client_cond` that wakes clients waiting for command completion.
//! `WorkerCell` packages that shape so the two controllers do not rebuild
//! it independently.
//!
//! Blocking device calls must run with the mutex released; `unlocked`
//! provides the scoped-unlock discipline: drop the guard for the duration
//! of the closure, reacquire on exit so the caller can re-check the
//! pending command.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Shared state cell for a worker thread and its clients.
pub struct WorkerCell<S> {
    state: Mutex<S>,
    wake_cond: Condvar,
    client_cond: Condvar,
}

impl<S> WorkerCell<S> {
    pub fn new(state: S) -> Self {
        Self {
            state: Mutex::new(state),
            wake_cond: Condvar::new(),
            client_cond: Condvar::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, S> {
        self.state.lock().unwrap()
    }

    /// Run `f` with the mutex released, then reacquire it.
    ///
    /// Callers must re-check the command slot on the returned guard before
    /// trusting any state read before the unlock.
    pub fn unlocked<'a, R>(
        &'a self,
        guard: MutexGuard<'a, S>,
        f: impl FnOnce() -> R,
    ) -> (MutexGuard<'a, S>, R) {
        drop(guard);
        let result = f();
        (self.state.lock().unwrap(), result)
    }

    /// Wake the worker thread.
    pub fn notify_worker(&self) {
        self.wake_cond.notify_one();
    }

    /// Wake all clients waiting on command completion.
    pub fn notify_clients(&self) {
        self.client_cond.notify_all();
    }

    /// Worker-side wait for a wakeup.
    pub fn wait_worker<'a>(&self, guard: MutexGuard<'a, S>) -> MutexGuard<'a, S> {
        self.wake_cond.wait(guard).unwrap()
    }

    /// Worker-side timed wait; returns the guard and whether it timed out.
    pub fn wait_worker_timeout<'a>(
        &self,
        guard: MutexGuard<'a, S>,
        timeout: Duration,
    ) -> (MutexGuard<'a, S>, bool) {
        let (guard, result) = self.wake_cond.wait_timeout(guard, timeout).unwrap();
        (guard, result.timed_out())
    }

    /// Client-side wait for a worker notification.
    pub fn wait_client<'a>(&self, guard: MutexGuard<'a, S>) -> MutexGuard<'a, S> {
        self.client_cond.wait(guard).unwrap()
    }
}

/// Something that can wake a worker thread from another thread.
///
/// The decoder source uses this to poke the player thread when new data,
/// a tag or the end of the song arrives.
pub trait Wakeup: Send + Sync {
    fn wake(&self);
}
