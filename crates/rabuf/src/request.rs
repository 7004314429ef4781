// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pending read requests and their one-shot completion cells.
//!
//! A [`Request`] describes one positional read (count, position, priority)
//! plus the synchronization needed to hand the outcome back to the caller.
//! Each request has a private mutex + condvar, so unrelated waiters never
//! contend with each other.
//!
//! # Contract
//!
//! - `notify*` is called exactly once per request.
//! - `wait_completion` is called exactly once, and only after the request
//!   has been enqueued.
//!
//! Violations are programmer misuse and panic rather than returning `Err`.

use crate::error::Result;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

/// Discrete urgency class attached to a request, used to bias scheduling
/// order. Lower index = serviced first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Serviced first (index 0).
    High,
    /// Default urgency.
    Normal,
    /// Background traffic; bounded starvation only.
    Low,
}

impl Priority {
    /// Number of priority levels (and of FIFO queues per buffer).
    pub const LEVELS: usize = 3;

    /// All levels, highest first.
    pub const ALL: [Priority; Priority::LEVELS] =
        [Priority::High, Priority::Normal, Priority::Low];

    /// Queue-set slot for this level (0 = High).
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Normal => write!(f, "normal"),
            Priority::Low => write!(f, "low"),
        }
    }
}

/// Completion state, guarded by the request's private mutex.
struct Completion {
    /// Set by the owning buffer when the request is pushed onto a queue.
    enqueued: bool,
    /// Set by `wait_completion` when the outcome is handed to the caller.
    consumed: bool,
    /// Bytes produced by the raw-read hook (empty until notified).
    data: Vec<u8>,
    /// `Some` once notified. Byte count on success, stored error otherwise.
    outcome: Option<Result<usize>>,
}

/// An immutable description of one pending read plus its completion cell.
///
/// Created per `read()` call by the owning buffer; the caller only touches
/// it through [`Request::wait_completion`].
pub struct Request {
    count: usize,
    position: u64,
    priority: Priority,
    cell: Mutex<Completion>,
    done: Condvar,
}

impl Request {
    /// Create a new request with the completion flag unset.
    pub fn new(count: usize, position: u64, priority: Priority) -> Arc<Self> {
        Arc::new(Self {
            count,
            position,
            priority,
            cell: Mutex::new(Completion {
                enqueued: false,
                consumed: false,
                data: Vec::new(),
                outcome: None,
            }),
            done: Condvar::new(),
        })
    }

    /// Requested byte count.
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Requested absolute position (already wrapped for circular sources).
    #[inline]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Urgency class of this request.
    #[inline]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Mark the request as enqueued. Called by the owning buffer under its
    /// queue lock, before the worker can see the request.
    pub(crate) fn mark_enqueued(&self) {
        self.cell.lock().enqueued = true;
    }

    /// Block until the request has been notified; return the result byte
    /// count or the stored error.
    ///
    /// # Panics
    ///
    /// Panics on a second call, or on a call before the request was
    /// enqueued (protocol violations).
    pub fn wait_completion(&self) -> Result<usize> {
        let mut cell = self.cell.lock();
        assert!(
            cell.enqueued,
            "protocol violation: wait_completion() before enqueue"
        );
        assert!(
            !cell.consumed,
            "protocol violation: wait_completion() called twice"
        );
        loop {
            if let Some(outcome) = cell.outcome.take() {
                cell.consumed = true;
                return outcome;
            }
            self.done.wait(&mut cell);
        }
    }

    /// Store the outcome, set the completion flag and wake the waiter.
    ///
    /// # Panics
    ///
    /// Panics if the request was already notified (protocol violation).
    pub fn notify(&self, outcome: Result<usize>) {
        self.store_outcome(outcome, Vec::new());
    }

    /// Notify with the bytes produced by the raw-read hook. The byte count
    /// reported to the waiter is `data.len()`.
    pub(crate) fn notify_read(&self, data: Vec<u8>) {
        let count = data.len();
        self.store_outcome(Ok(count), data);
    }

    /// Take the read data out of a completed request. Called by the owning
    /// buffer after `wait_completion` returned `Ok`.
    pub(crate) fn take_data(&self) -> Vec<u8> {
        std::mem::take(&mut self.cell.lock().data)
    }

    fn store_outcome(&self, outcome: Result<usize>, data: Vec<u8>) {
        let mut cell = self.cell.lock();
        assert!(
            cell.outcome.is_none() && !cell.consumed,
            "protocol violation: notify() called twice"
        );
        cell.data = data;
        cell.outcome = Some(outcome);
        self.done.notify_one();
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("count", &self.count)
            .field("position", &self.position)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_priority_ordering_and_index() {
        assert!(Priority::High < Priority::Normal);
        assert!(Priority::Normal < Priority::Low);
        assert_eq!(Priority::High.index(), 0);
        assert_eq!(Priority::Low.index(), Priority::LEVELS - 1);
    }

    #[test]
    fn test_notify_wait_round_trip_count() {
        let req = Request::new(64, 128, Priority::Normal);
        req.mark_enqueued();
        req.notify(Ok(42));
        assert_eq!(req.wait_completion().expect("notified Ok"), 42);
    }

    #[test]
    fn test_notify_wait_round_trip_error() {
        let req = Request::new(64, 0, Priority::High);
        req.mark_enqueued();
        req.notify(Err(Error::Io {
            code: 11,
            message: "resource busy".into(),
        }));

        match req.wait_completion() {
            Err(Error::Io { code, message }) => {
                assert_eq!(code, 11);
                assert_eq!(message, "resource busy");
            }
            other => panic!("expected Error::Io, got {:?}", other),
        }
    }

    #[test]
    fn test_wait_blocks_until_notified() {
        let req = Request::new(8, 0, Priority::Low);
        req.mark_enqueued();
        let waiter = Arc::clone(&req);

        let handle = thread::spawn(move || waiter.wait_completion());

        // Give the waiter time to park before the wake.
        thread::sleep(Duration::from_millis(20));
        req.notify(Ok(8));

        let result = handle.join().expect("waiter thread");
        assert_eq!(result.expect("completed"), 8);
    }

    #[test]
    fn test_notify_read_reports_actual_count() {
        let req = Request::new(16, 0, Priority::Normal);
        req.mark_enqueued();
        req.notify_read(vec![0xAB; 10]);
        assert_eq!(req.wait_completion().expect("completed"), 10);
        assert_eq!(req.take_data(), vec![0xAB; 10]);
    }

    #[test]
    #[should_panic(expected = "protocol violation: notify() called twice")]
    fn test_double_notify_panics() {
        let req = Request::new(1, 0, Priority::Normal);
        req.mark_enqueued();
        req.notify(Ok(1));
        req.notify(Ok(1));
    }

    #[test]
    #[should_panic(expected = "protocol violation: wait_completion() called twice")]
    fn test_double_wait_panics() {
        let req = Request::new(1, 0, Priority::Normal);
        req.mark_enqueued();
        req.notify(Ok(1));
        let _ = req.wait_completion();
        let _ = req.wait_completion();
    }

    #[test]
    #[should_panic(expected = "protocol violation: wait_completion() before enqueue")]
    fn test_wait_before_enqueue_panics() {
        let req = Request::new(1, 0, Priority::Normal);
        let _ = req.wait_completion();
    }
}
