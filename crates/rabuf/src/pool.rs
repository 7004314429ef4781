// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Named registry of background worker threads with lazy creation.
//!
//! A [`WorkerPool`] tracks independently-identified workers by string id.
//! Workers are created on first use through the pool's [`WorkerFactory`]
//! hook and each one runs under its own [`ThreadController`].
//!
//! # Self-termination
//!
//! A worker whose loop body returns [`LoopControl::Stop`] ends its own
//! thread, but never tears itself down: its id is sent over an internal
//! channel and the pool removes and joins it on the next pool entry point
//! (or an explicit [`reap_finished`]), always on the pool caller's stack
//! and never on the worker's own.
//!
//! [`reap_finished`]: WorkerPool::reap_finished

use crate::controller::{LoopControl, ThreadController, ThreadState};
use crate::error::Result;
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Abstract factory producing the loop body (and cancel hook) for a worker.
pub trait WorkerFactory: Send + Sync {
    /// Produce the loop body for a new worker id. The body is invoked
    /// repeatedly; returning [`LoopControl::Stop`] ends the worker.
    fn create(&self, id: &str) -> Box<dyn FnMut() -> LoopControl + Send>;

    /// Unblock a parked loop body so a stop request is observed. Default:
    /// no-op, for bodies that never block.
    fn cancel(&self, id: &str) {
        let _ = id;
    }
}

/// Handle to one pooled background thread.
pub struct WorkerThread {
    id: String,
    controller: ThreadController,
}

impl WorkerThread {
    /// Pool id of this worker.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Last committed lifecycle state.
    pub fn state(&self) -> ThreadState {
        self.controller.state()
    }
}

impl std::fmt::Debug for WorkerThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerThread")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Name-keyed registry of lazily created background workers.
pub struct WorkerPool {
    factory: Arc<dyn WorkerFactory>,
    workers: Mutex<HashMap<String, Arc<WorkerThread>>>,
    done_tx: Sender<String>,
    done_rx: Receiver<String>,
}

impl WorkerPool {
    /// Create a pool that builds workers through `factory`.
    pub fn new(factory: Arc<dyn WorkerFactory>) -> Self {
        let (done_tx, done_rx) = unbounded();
        Self {
            factory,
            workers: Mutex::new(HashMap::new()),
            done_tx,
            done_rx,
        }
    }

    /// Return the worker registered under `id`, creating and starting it
    /// through the factory hook if it does not exist yet. Lookup and
    /// creation happen under the single pool mutex.
    pub fn get_worker(&self, id: &str) -> Result<Arc<WorkerThread>> {
        self.reap_finished();

        let mut workers = self.workers.lock();
        if let Some(worker) = workers.get(id) {
            return Ok(Arc::clone(worker));
        }

        log::debug!("[POOL] creating worker '{}'", id);
        let mut body = self.factory.create(id);
        let done_tx = self.done_tx.clone();
        let done_id = id.to_string();
        let wrapped = move || {
            let control = body();
            if control == LoopControl::Stop {
                // Announce self-termination; the pool joins us later on its
                // own call stack.
                let _ = done_tx.send(done_id.clone());
            }
            control
        };

        let factory = Arc::clone(&self.factory);
        let cancel_id = id.to_string();
        let controller = ThreadController::new(&format!("rabuf-pool-{}", id), wrapped, move || {
            factory.cancel(&cancel_id);
        });
        controller.start()?;

        let worker = Arc::new(WorkerThread {
            id: id.to_string(),
            controller,
        });
        workers.insert(id.to_string(), Arc::clone(&worker));
        Ok(worker)
    }

    /// Whether a worker is currently registered under `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.reap_finished();
        self.workers.lock().contains_key(id)
    }

    /// Number of registered workers.
    pub fn len(&self) -> usize {
        self.reap_finished();
        self.workers.lock().len()
    }

    /// Whether the pool has no registered workers.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop the named worker, remove it from the registry and join it.
    /// Returns false if no such worker exists.
    pub fn terminate(&self, id: &str) -> bool {
        self.reap_finished();
        let worker = self.workers.lock().remove(id);
        match worker {
            Some(worker) => {
                log::debug!("[POOL] terminating worker '{}'", id);
                worker.controller.stop();
                true
            }
            None => false,
        }
    }

    /// Terminate every registered worker and clear the registry. Stop
    /// requests are fanned out first so workers wind down in parallel.
    pub fn terminate_all(&self) {
        self.reap_finished();
        let drained: Vec<_> = self
            .workers
            .lock()
            .drain()
            .map(|(_, worker)| worker)
            .collect();
        if drained.is_empty() {
            return;
        }
        log::debug!("[POOL] terminating {} worker(s)", drained.len());
        for worker in &drained {
            worker.controller.async_stop();
        }
        for worker in drained {
            worker.controller.stop();
        }
    }

    /// Remove and join workers that announced self-termination. Returns the
    /// number reaped.
    pub fn reap_finished(&self) -> usize {
        let mut reaped = 0;
        while let Ok(id) = self.done_rx.try_recv() {
            if let Some(worker) = self.workers.lock().remove(&id) {
                // The thread has already left its loop; stop() just waits
                // out the final transition and joins the handle.
                worker.controller.stop();
                log::debug!("[POOL] reaped worker '{}'", id);
                reaped += 1;
            }
        }
        reaped
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.terminate_all();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    /// Factory producing bodies that count iterations per worker id.
    struct CountingFactory {
        counters: Mutex<HashMap<String, Arc<AtomicUsize>>>,
        /// Iterations after which a body self-terminates (0 = never).
        stop_after: usize,
    }

    impl CountingFactory {
        fn new(stop_after: usize) -> Self {
            Self {
                counters: Mutex::new(HashMap::new()),
                stop_after,
            }
        }

        fn count(&self, id: &str) -> usize {
            self.counters
                .lock()
                .get(id)
                .map_or(0, |c| c.load(Ordering::Relaxed))
        }
    }

    impl WorkerFactory for CountingFactory {
        fn create(&self, id: &str) -> Box<dyn FnMut() -> LoopControl + Send> {
            let counter = Arc::new(AtomicUsize::new(0));
            self.counters
                .lock()
                .insert(id.to_string(), Arc::clone(&counter));
            let stop_after = self.stop_after;
            Box::new(move || {
                let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
                thread::sleep(Duration::from_millis(1));
                if stop_after > 0 && n >= stop_after {
                    LoopControl::Stop
                } else {
                    LoopControl::Continue
                }
            })
        }
    }

    #[test]
    fn test_lazy_creation_and_reuse() {
        let factory = Arc::new(CountingFactory::new(0));
        let pool = WorkerPool::new(Arc::clone(&factory) as Arc<dyn WorkerFactory>);
        assert!(pool.is_empty());

        let a = pool.get_worker("alpha").expect("worker");
        let a2 = pool.get_worker("alpha").expect("worker");
        assert!(Arc::ptr_eq(&a, &a2));
        assert_eq!(pool.len(), 1);
        assert_eq!(a.id(), "alpha");
        assert_eq!(a.state(), ThreadState::Running);

        pool.terminate_all();
    }

    #[test]
    fn test_workers_run_their_bodies() {
        let factory = Arc::new(CountingFactory::new(0));
        let pool = WorkerPool::new(Arc::clone(&factory) as Arc<dyn WorkerFactory>);

        pool.get_worker("w1").expect("worker");
        pool.get_worker("w2").expect("worker");
        thread::sleep(Duration::from_millis(20));

        assert!(factory.count("w1") > 0);
        assert!(factory.count("w2") > 0);
        pool.terminate_all();
    }

    #[test]
    fn test_terminate_removes_and_joins() {
        let factory = Arc::new(CountingFactory::new(0));
        let pool = WorkerPool::new(Arc::clone(&factory) as Arc<dyn WorkerFactory>);

        let worker = pool.get_worker("gone").expect("worker");
        assert!(pool.terminate("gone"));
        assert!(!pool.contains("gone"));
        assert_eq!(worker.state(), ThreadState::Stopped);

        // Unknown id.
        assert!(!pool.terminate("gone"));
    }

    #[test]
    fn test_self_terminating_worker_is_reaped() {
        let factory = Arc::new(CountingFactory::new(3));
        let pool = WorkerPool::new(Arc::clone(&factory) as Arc<dyn WorkerFactory>);

        let worker = pool.get_worker("brief").expect("worker");
        for _ in 0..200 {
            if worker.state() == ThreadState::Stopped {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(worker.state(), ThreadState::Stopped);
        assert_eq!(factory.count("brief"), 3);

        // The next pool entry point reaps the finished worker.
        assert!(!pool.contains("brief"));
        assert_eq!(pool.len(), 0);

        // The id can be reused; a fresh worker is created.
        let fresh = pool.get_worker("brief").expect("worker");
        assert!(!Arc::ptr_eq(&worker, &fresh));
        pool.terminate_all();
    }

    #[test]
    fn test_terminate_all_clears_registry() {
        let factory = Arc::new(CountingFactory::new(0));
        let pool = WorkerPool::new(Arc::clone(&factory) as Arc<dyn WorkerFactory>);

        pool.get_worker("a").expect("worker");
        pool.get_worker("b").expect("worker");
        pool.get_worker("c").expect("worker");
        assert_eq!(pool.len(), 3);

        pool.terminate_all();
        assert!(pool.is_empty());
    }
}
