// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Generic start/stop/restart state machine around a background loop.
//!
//! A [`ThreadController`] wraps an arbitrary loop body and drives it on a
//! dedicated named OS thread:
//!
//! ```text
//!   Stopped --start()--> Starting --(worker)--> Running
//!      ^                                           |
//!      |                                     stop()/self-stop
//!      +---------- Terminating <--------------------+
//! ```
//!
//! All transition entry points are safe to call concurrently; transitions
//! are serialized through one mutex + condvar and repeated calls in an
//! already-satisfied state are no-ops. The cancel hook unblocks a loop body
//! parked on some external condition so a stop request is observed between
//! iterations, never mid-iteration.

use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Committed lifecycle state of a controlled thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// No thread is running; the loop body is parked in the controller.
    Stopped,
    /// `start()` accepted; the thread has not committed `Running` yet.
    Starting,
    /// The loop body is being invoked repeatedly.
    Running,
    /// Stop observed; the thread is on its way out.
    Terminating,
}

impl std::fmt::Display for ThreadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThreadState::Stopped => write!(f, "stopped"),
            ThreadState::Starting => write!(f, "starting"),
            ThreadState::Running => write!(f, "running"),
            ThreadState::Terminating => write!(f, "terminating"),
        }
    }
}

/// Returned by a loop body after each iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    /// Invoke the body again.
    Continue,
    /// End this thread from inside the loop (self-termination).
    Stop,
}

type LoopFn = Box<dyn FnMut() -> LoopControl + Send>;
type CancelFn = Box<dyn Fn() + Send + Sync>;

struct Shared {
    name: String,
    state: Mutex<ThreadState>,
    changed: Condvar,
    stop: AtomicBool,
    restart: AtomicBool,
    cancel: CancelFn,
    /// Parked loop body while Stopped; owned by the worker while running.
    body: Mutex<Option<LoopFn>>,
}

/// Start/stop/restart controller for one background loop.
pub struct ThreadController {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadController {
    /// Create a controller in the `Stopped` state.
    ///
    /// `body` is invoked repeatedly on the controlled thread until a stop is
    /// requested or the body returns [`LoopControl::Stop`]. `cancel` must
    /// unblock a `body` invocation parked on an external condition.
    pub fn new<F, C>(name: &str, body: F, cancel: C) -> Self
    where
        F: FnMut() -> LoopControl + Send + 'static,
        C: Fn() + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                name: name.to_string(),
                state: Mutex::new(ThreadState::Stopped),
                changed: Condvar::new(),
                stop: AtomicBool::new(false),
                restart: AtomicBool::new(false),
                cancel: Box::new(cancel),
                body: Mutex::new(Some(Box::new(body))),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Last committed state.
    pub fn state(&self) -> ThreadState {
        *self.shared.state.lock()
    }

    /// Start the controlled thread and block until it has committed
    /// `Running`. No-op if the thread is not `Stopped`.
    pub fn start(&self) -> Result<()> {
        if !self.launch()? {
            return Ok(());
        }
        let mut state = self.shared.state.lock();
        while *state == ThreadState::Starting {
            self.shared.changed.wait(&mut state);
        }
        Ok(())
    }

    /// Request a start without waiting for the thread to reach `Running`.
    pub fn async_start(&self) -> Result<()> {
        self.launch().map(|_| ())
    }

    /// Stop the controlled thread, blocking until it has committed
    /// `Stopped` and been joined. No-op if already `Stopped`.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            if *state != ThreadState::Stopped {
                self.shared.restart.store(false, Ordering::Release);
                self.shared.stop.store(true, Ordering::Release);
                (self.shared.cancel)();
                while *state != ThreadState::Stopped {
                    self.shared.changed.wait(&mut state);
                }
            }
        }
        self.join_finished();
    }

    /// Request a stop without waiting. The join is deferred to the next
    /// blocking call (`start`, `stop`, `restart` or drop).
    pub fn async_stop(&self) {
        let state = self.shared.state.lock();
        if *state == ThreadState::Stopped {
            return;
        }
        self.shared.restart.store(false, Ordering::Release);
        self.shared.stop.store(true, Ordering::Release);
        (self.shared.cancel)();
    }

    /// Stop then start, blocking for both transitions.
    pub fn restart(&self) -> Result<()> {
        self.stop();
        self.start()
    }

    /// Request a restart without blocking. The running thread re-enters its
    /// loop without being re-spawned; from `Stopped` this is an
    /// `async_start`.
    pub fn async_restart(&self) -> Result<()> {
        {
            let state = self.shared.state.lock();
            if *state != ThreadState::Stopped {
                self.shared.restart.store(true, Ordering::Release);
                self.shared.stop.store(true, Ordering::Release);
                (self.shared.cancel)();
                return Ok(());
            }
        }
        self.async_start()
    }

    /// Commit `Starting` and spawn the worker. Returns false when the
    /// transition was a no-op.
    fn launch(&self) -> Result<bool> {
        {
            let mut state = self.shared.state.lock();
            if *state != ThreadState::Stopped {
                return Ok(false);
            }
            *state = ThreadState::Starting;
            self.shared.stop.store(false, Ordering::Release);
            self.shared.restart.store(false, Ordering::Release);
            self.shared.changed.notify_all();
        }

        // Reap a handle left behind by async_stop; its thread has already
        // committed Stopped.
        self.join_finished();

        let Some(body) = self.shared.body.lock().take() else {
            // run() parks the body before committing Stopped.
            let mut state = self.shared.state.lock();
            *state = ThreadState::Stopped;
            self.shared.changed.notify_all();
            return Ok(false);
        };

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(self.shared.name.clone())
            .spawn(move || run(&shared, body));

        match spawned {
            Ok(handle) => {
                *self.handle.lock() = Some(handle);
                Ok(true)
            }
            Err(err) => {
                let mut state = self.shared.state.lock();
                *state = ThreadState::Stopped;
                self.shared.changed.notify_all();
                Err(Error::IoError(err))
            }
        }
    }

    fn join_finished(&self) {
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ThreadController {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ThreadController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadController")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Worker entry point: commits the state transitions and drives the body.
fn run(shared: &Arc<Shared>, mut body: LoopFn) {
    log::debug!("[CTRL] '{}' running", shared.name);
    loop {
        {
            let mut state = shared.state.lock();
            *state = ThreadState::Running;
            shared.changed.notify_all();
        }

        let mut self_stopped = false;
        while !shared.stop.load(Ordering::Acquire) {
            if body() == LoopControl::Stop {
                self_stopped = true;
                break;
            }
        }

        // async_restart keeps the same OS thread and re-enters the loop.
        if !self_stopped && shared.restart.swap(false, Ordering::AcqRel) {
            shared.stop.store(false, Ordering::Release);
            let mut state = shared.state.lock();
            *state = ThreadState::Starting;
            shared.changed.notify_all();
            continue;
        }
        break;
    }

    {
        let mut state = shared.state.lock();
        *state = ThreadState::Terminating;
        shared.changed.notify_all();
    }

    // Park the body before committing Stopped so a subsequent start()
    // always finds it.
    *shared.body.lock() = Some(body);

    {
        let mut state = shared.state.lock();
        *state = ThreadState::Stopped;
        shared.changed.notify_all();
    }
    log::debug!("[CTRL] '{}' stopped", shared.name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counting_controller(counter: &Arc<AtomicUsize>) -> ThreadController {
        let c = Arc::clone(counter);
        ThreadController::new(
            "test-counter",
            move || {
                c.fetch_add(1, Ordering::Relaxed);
                thread::sleep(Duration::from_millis(1));
                LoopControl::Continue
            },
            || {},
        )
    }

    #[test]
    fn test_initial_state_is_stopped() {
        let ctrl = ThreadController::new("idle", || LoopControl::Continue, || {});
        assert_eq!(ctrl.state(), ThreadState::Stopped);
    }

    #[test]
    fn test_start_runs_body_and_stop_joins() {
        let counter = Arc::new(AtomicUsize::new(0));
        let ctrl = counting_controller(&counter);

        ctrl.start().expect("start");
        assert_eq!(ctrl.state(), ThreadState::Running);

        thread::sleep(Duration::from_millis(20));
        ctrl.stop();
        assert_eq!(ctrl.state(), ThreadState::Stopped);
        assert!(counter.load(Ordering::Relaxed) > 0);

        // No further invocations after stop.
        let after = counter.load(Ordering::Relaxed);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(counter.load(Ordering::Relaxed), after);
    }

    #[test]
    fn test_start_twice_is_noop() {
        let counter = Arc::new(AtomicUsize::new(0));
        let ctrl = counting_controller(&counter);

        ctrl.start().expect("start");
        ctrl.start().expect("second start is a no-op");
        assert_eq!(ctrl.state(), ThreadState::Running);
        ctrl.stop();
    }

    #[test]
    fn test_stop_twice_is_noop() {
        let counter = Arc::new(AtomicUsize::new(0));
        let ctrl = counting_controller(&counter);

        ctrl.stop(); // stop while Stopped
        ctrl.start().expect("start");
        ctrl.stop();
        ctrl.stop();
        assert_eq!(ctrl.state(), ThreadState::Stopped);
    }

    #[test]
    fn test_restart_resumes_iterations() {
        let counter = Arc::new(AtomicUsize::new(0));
        let ctrl = counting_controller(&counter);

        ctrl.start().expect("start");
        thread::sleep(Duration::from_millis(10));
        ctrl.restart().expect("restart");
        assert_eq!(ctrl.state(), ThreadState::Running);

        let mark = counter.load(Ordering::Relaxed);
        thread::sleep(Duration::from_millis(20));
        assert!(counter.load(Ordering::Relaxed) > mark);
        ctrl.stop();
    }

    #[test]
    fn test_self_termination_via_loop_control() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let ctrl = ThreadController::new(
            "self-stop",
            move || {
                if c.fetch_add(1, Ordering::Relaxed) >= 2 {
                    LoopControl::Stop
                } else {
                    LoopControl::Continue
                }
            },
            || {},
        );

        ctrl.start().expect("start");
        // Wait for the body to end its own thread.
        for _ in 0..100 {
            if ctrl.state() == ThreadState::Stopped {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(ctrl.state(), ThreadState::Stopped);
        assert_eq!(counter.load(Ordering::Relaxed), 3);

        // stop() after self-termination just reaps the handle.
        ctrl.stop();
    }

    #[test]
    fn test_async_stop_then_start() {
        let counter = Arc::new(AtomicUsize::new(0));
        let ctrl = counting_controller(&counter);

        ctrl.start().expect("start");
        ctrl.async_stop();

        for _ in 0..100 {
            if ctrl.state() == ThreadState::Stopped {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(ctrl.state(), ThreadState::Stopped);

        ctrl.start().expect("start after async_stop");
        assert_eq!(ctrl.state(), ThreadState::Running);
        ctrl.stop();
    }

    #[test]
    fn test_cancel_unblocks_parked_body() {
        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        let g = Arc::clone(&gate);
        let g2 = Arc::clone(&gate);

        let ctrl = ThreadController::new(
            "parked",
            move || {
                let (lock, cvar) = &*g;
                let mut woken = lock.lock();
                if !*woken {
                    cvar.wait(&mut woken);
                }
                LoopControl::Continue
            },
            move || {
                let (lock, cvar) = &*g2;
                let mut woken = lock.lock();
                *woken = true;
                cvar.notify_all();
            },
        );

        ctrl.start().expect("start");
        thread::sleep(Duration::from_millis(10));
        // Without the cancel hook this would hang forever.
        ctrl.stop();
        assert_eq!(ctrl.state(), ThreadState::Stopped);
    }

    #[test]
    fn test_async_restart_keeps_running() {
        let counter = Arc::new(AtomicUsize::new(0));
        let ctrl = counting_controller(&counter);

        ctrl.start().expect("start");
        ctrl.async_restart().expect("async restart");

        for _ in 0..100 {
            if ctrl.state() == ThreadState::Running {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(ctrl.state(), ThreadState::Running);

        let mark = counter.load(Ordering::Relaxed);
        thread::sleep(Duration::from_millis(20));
        assert!(counter.load(Ordering::Relaxed) > mark);
        ctrl.stop();
    }

    #[test]
    fn test_concurrent_starts_spawn_one_thread() {
        let counter = Arc::new(AtomicUsize::new(0));
        let ctrl = Arc::new(counting_controller(&counter));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let c = Arc::clone(&ctrl);
            handles.push(thread::spawn(move || c.start()));
        }
        for h in handles {
            h.join().expect("starter thread").expect("start");
        }

        assert_eq!(ctrl.state(), ThreadState::Running);
        ctrl.stop();
    }
}
