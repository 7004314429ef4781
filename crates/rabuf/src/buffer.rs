// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Random-access buffer: priority-scheduled reads over one data source.
//!
//! A [`RandomAccessBuffer`] arbitrates access to a single byte-addressable
//! medium among many concurrent readers. Callers block in [`read()`] while
//! one dedicated worker thread (driven by a [`ThreadController`]) dequeues
//! requests and invokes the source's raw-read hook. Only that worker ever
//! touches the medium.
//!
//! # Architecture
//!
//! ```text
//! caller A --read(High)--+
//! caller B --read(Low)---+--> [High][Normal][Low] FIFO queues
//! caller C --read(High)--+            |
//!                                     v  weighted round robin (ratio)
//!                              worker thread --> DataSource::read_input
//!                                     |
//!                                     v
//!                              Request::notify --> caller unblocks
//! ```
//!
//! # Scheduling
//!
//! Strict highest-first with a burst credit: up to `ratio` (default 10)
//! consecutive requests are served from one level before a single slot is
//! yielded to the next lower non-empty level. A continuously busy system
//! still favors higher priority classes, but a non-empty lower queue is
//! serviced at least once in any window of `ratio + 1` services.
//!
//! # Pause barrier
//!
//! [`pause()`] is a counting barrier: it blocks until every request that was
//! queued or in flight at the pause instant has completed. Requests enqueued
//! while paused carry the new pause generation and are held until
//! [`resume()`].
//!
//! [`read()`]: RandomAccessBuffer::read
//! [`pause()`]: RandomAccessBuffer::pause
//! [`resume()`]: RandomAccessBuffer::resume

use crate::controller::{LoopControl, ThreadController};
use crate::error::{Error, Result};
use crate::registry::BufferRegistry;
use crate::request::{Priority, Request};
use crate::source::DataSource;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Opaque process-unique buffer identity.
pub type BufferId = u64;

/// Maximum consecutive services from one priority level before a slot is
/// yielded to the next lower non-empty level.
pub const DEFAULT_SERVICE_RATIO: u32 = 10;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Point-in-time snapshot of a buffer's bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct BufferStats {
    /// Requests serviced per priority level (index 0 = High).
    pub serviced: [u64; Priority::LEVELS],
    /// Requests currently queued or in flight.
    pub pending: usize,
    /// Whether the buffer is paused.
    pub paused: bool,
    /// Current open refcount.
    pub open_count: u32,
}

/// One queued request, tagged with the pause generation at enqueue time.
struct QueuedRequest {
    generation: u64,
    request: Arc<Request>,
}

/// Queue set and bookkeeping, guarded by the single buffer-level mutex.
struct QueueState {
    queues: [VecDeque<QueuedRequest>; Priority::LEVELS],
    /// Consecutive services taken from each level in the current burst.
    credit: [u32; Priority::LEVELS],
    /// Total services per level.
    serviced: [u64; Priority::LEVELS],
    /// Queued + in-flight requests, all generations.
    pending: usize,
    paused: bool,
    /// Bumped on each pause; requests enqueued while paused carry the new
    /// value and are not dequeued until resume.
    generation: u64,
    /// Pre-pause requests the pause barrier still waits for.
    barrier_remaining: usize,
    shutdown: bool,
    open_count: u32,
    /// Byte size cache, valid for one open session.
    cached_size: Option<u64>,
}

impl QueueState {
    fn new() -> Self {
        Self {
            queues: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
            credit: [0; Priority::LEVELS],
            serviced: [0; Priority::LEVELS],
            pending: 0,
            paused: false,
            generation: 0,
            barrier_remaining: 0,
            shutdown: false,
            open_count: 0,
            cached_size: None,
        }
    }

    /// Whether the front of `level` may be dequeued right now. While paused
    /// only requests from before the pause fence are eligible.
    fn eligible(&self, level: usize) -> bool {
        match self.queues[level].front() {
            Some(entry) => !self.paused || entry.generation < self.generation,
            None => false,
        }
    }

    /// Select the next request by weighted round robin.
    ///
    /// Highest-first scan; a level with burst credit left is served and its
    /// credit consumed. A level that exhausted its credit resets and yields
    /// exactly one slot to the next lower eligible level. A yield-slot
    /// service ignores the lower level's own credit and does not accumulate
    /// any, so the yield fires again after at most `ratio` further services
    /// from above. If nothing lower is eligible the exhausted level keeps
    /// the slot.
    fn pick_next(&mut self, ratio: u32) -> Option<(usize, u64, Arc<Request>)> {
        let mut yielding = false;
        for level in 0..Priority::LEVELS {
            if !self.eligible(level) {
                self.credit[level] = 0;
                continue;
            }
            if yielding {
                if let Some(entry) = self.queues[level].pop_front() {
                    self.credit[level] = 0;
                    return Some((level, entry.generation, entry.request));
                }
            }
            if self.credit[level] >= ratio {
                // Burst exhausted; one slot goes to a lower level.
                self.credit[level] = 0;
                yielding = true;
                continue;
            }
            if let Some(entry) = self.queues[level].pop_front() {
                self.credit[level] += 1;
                return Some((level, entry.generation, entry.request));
            }
        }

        // Only credit-exhausted levels were eligible; take the highest one.
        for level in 0..Priority::LEVELS {
            if self.eligible(level) {
                if let Some(entry) = self.queues[level].pop_front() {
                    self.credit[level] = 1;
                    return Some((level, entry.generation, entry.request));
                }
            }
        }
        None
    }
}

/// Shared buffer state: queue set, condvars and the data source.
///
/// Held in an `Arc` so the worker body, the public handle and the registry
/// can all reach it.
pub(crate) struct BufferCore {
    id: BufferId,
    owner: String,
    ratio: u32,
    source: Arc<dyn DataSource>,
    state: Mutex<QueueState>,
    /// Worker wake: queue non-empty, resume, or shutdown.
    queue_ready: Condvar,
    /// Pause barrier / idle: pre-pause work drained or pending hit zero.
    drained: Condvar,
}

impl BufferCore {
    fn enqueue(&self, request: Arc<Request>) -> Result<()> {
        let mut st = self.state.lock();
        if st.shutdown {
            return Err(Error::ShuttingDown);
        }
        request.mark_enqueued();
        let generation = st.generation;
        st.queues[request.priority().index()].push_back(QueuedRequest {
            generation,
            request,
        });
        st.pending += 1;
        self.queue_ready.notify_one();
        Ok(())
    }

    /// One worker iteration: wait for an eligible request, service it,
    /// update the bookkeeping. Returns false once shutdown is observed.
    fn service_one(&self) -> bool {
        let (level, generation, request) = {
            let mut st = self.state.lock();
            loop {
                if st.shutdown {
                    return false;
                }
                if let Some(picked) = st.pick_next(self.ratio) {
                    break picked;
                }
                self.queue_ready.wait(&mut st);
            }
        };

        // Raw read runs with no buffer lock held; once begun it always
        // completes, even across a concurrent stop request.
        let mut data = vec![0u8; request.count()];
        let result = self.source.read_input(&mut data, request.position());

        // Bookkeeping and notification happen under one lock so a caller
        // whose read() just returned never sees stale stats. The barrier
        // decrement comes after notify: pause() unblocks only once every
        // pre-pause request has been notified.
        let mut st = self.state.lock();
        st.pending -= 1;
        st.serviced[level] += 1;
        match result {
            Ok(n) => {
                data.truncate(n);
                request.notify_read(data);
            }
            Err(err) => {
                log::debug!(
                    "[BUFFER] id={} read failed at position {}: {}",
                    self.id,
                    request.position(),
                    err
                );
                request.notify(Err(err));
            }
        }
        if st.barrier_remaining > 0 && generation < st.generation {
            st.barrier_remaining -= 1;
            if st.barrier_remaining == 0 {
                self.drained.notify_all();
            }
        }
        if st.pending == 0 {
            self.drained.notify_all();
        }
        true
    }

    pub(crate) fn pause(&self) {
        let mut st = self.state.lock();
        if st.shutdown {
            return;
        }
        if !st.paused {
            st.paused = true;
            st.generation += 1;
            st.barrier_remaining = st.pending;
            log::debug!(
                "[BUFFER] id={} paused, draining {} request(s)",
                self.id,
                st.barrier_remaining
            );
        }
        // Nested pause joins the existing barrier without a new fence.
        while st.barrier_remaining > 0 {
            self.drained.wait(&mut st);
        }
    }

    pub(crate) fn resume(&self) {
        let mut st = self.state.lock();
        if !st.paused {
            return;
        }
        st.paused = false;
        log::debug!("[BUFFER] id={} resumed", self.id);
        self.queue_ready.notify_all();
    }

    fn open(&self) -> Result<()> {
        let mut st = self.state.lock();
        if st.shutdown {
            return Err(Error::ShuttingDown);
        }
        if st.open_count == 0 {
            self.source.open_input()?;
            st.cached_size = None;
        }
        st.open_count += 1;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut st = self.state.lock();
        assert!(
            st.open_count > 0,
            "protocol violation: close() without matching open()"
        );
        st.open_count -= 1;
        if st.open_count == 0 {
            st.cached_size = None;
            self.source.close_input()?;
        }
        Ok(())
    }

    fn byte_size(&self) -> Result<u64> {
        let mut st = self.state.lock();
        if let Some(size) = st.cached_size {
            return Ok(size);
        }
        let size = self.source.query_byte_size()?;
        st.cached_size = Some(size);
        Ok(size)
    }

    fn stats(&self) -> BufferStats {
        let st = self.state.lock();
        BufferStats {
            serviced: st.serviced,
            pending: st.pending,
            paused: st.paused,
            open_count: st.open_count,
        }
    }

    /// Refuse new reads and fail everything still queued so no waiter
    /// hangs. The in-flight request (if any) is left to finish.
    fn begin_shutdown(&self) {
        let st = &mut *self.state.lock();
        st.shutdown = true;
        let mut abandoned = 0usize;
        for queue in &mut st.queues {
            while let Some(entry) = queue.pop_front() {
                entry.request.notify(Err(Error::ShuttingDown));
                abandoned += 1;
            }
        }
        if abandoned > 0 {
            log::warn!(
                "[BUFFER] id={} abandoned {} queued request(s) on shutdown",
                self.id,
                abandoned
            );
        }
        st.pending -= abandoned;
        st.barrier_remaining = 0;
        self.drained.notify_all();
        self.queue_ready.notify_all();
    }
}

/// Builder for [`RandomAccessBuffer`].
pub struct BufferBuilder {
    owner: String,
    source: Option<Arc<dyn DataSource>>,
    ratio: u32,
    registry: Option<Arc<BufferRegistry>>,
}

impl BufferBuilder {
    /// Attach the data source this buffer reads from.
    #[must_use]
    pub fn source(mut self, source: Arc<dyn DataSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Override the scheduling burst credit (clamped to at least 1).
    #[must_use]
    pub fn ratio(mut self, ratio: u32) -> Self {
        self.ratio = ratio.max(1);
        self
    }

    /// Register the buffer with `registry` under its owner tag, enabling
    /// group pause/resume.
    #[must_use]
    pub fn registry(mut self, registry: &Arc<BufferRegistry>) -> Self {
        self.registry = Some(Arc::clone(registry));
        self
    }

    /// Build the buffer and start its worker thread.
    pub fn build(self) -> Result<RandomAccessBuffer> {
        let source = self
            .source
            .ok_or_else(|| Error::Config("buffer requires a data source".into()))?;

        let id = NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed);
        let core = Arc::new(BufferCore {
            id,
            owner: self.owner,
            ratio: self.ratio,
            source,
            state: Mutex::new(QueueState::new()),
            queue_ready: Condvar::new(),
            drained: Condvar::new(),
        });

        let worker = Arc::clone(&core);
        let canceller = Arc::clone(&core);
        let controller = ThreadController::new(
            &format!("rabuf-worker-{}", id),
            move || {
                if worker.service_one() {
                    LoopControl::Continue
                } else {
                    LoopControl::Stop
                }
            },
            move || {
                canceller.queue_ready.notify_all();
            },
        );
        controller.start()?;

        if let Some(registry) = &self.registry {
            registry.register(&core.owner, id, Arc::downgrade(&core));
        }

        log::debug!("[BUFFER] id={} owner='{}' started", id, core.owner);
        Ok(RandomAccessBuffer {
            core,
            controller,
            registry: self.registry,
        })
    }
}

/// Priority-scheduled random-access buffer over one data source.
///
/// # Example
///
/// ```rust
/// use rabuf::{MemSource, Priority, RandomAccessBuffer};
/// use std::sync::Arc;
///
/// let buffer = RandomAccessBuffer::builder("demo")
///     .source(Arc::new(MemSource::new(vec![7u8; 1024])))
///     .build()
///     .expect("buffer");
///
/// let mut out = [0u8; 16];
/// let n = buffer.read(&mut out, 512, Priority::Normal).expect("read");
/// assert_eq!(n, 16);
/// ```
pub struct RandomAccessBuffer {
    core: Arc<BufferCore>,
    controller: ThreadController,
    registry: Option<Arc<BufferRegistry>>,
}

impl RandomAccessBuffer {
    /// Start building a buffer owned by `owner` (the group tag used for
    /// collective pause/resume).
    pub fn builder(owner: &str) -> BufferBuilder {
        BufferBuilder {
            owner: owner.to_string(),
            source: None,
            ratio: DEFAULT_SERVICE_RATIO,
            registry: None,
        }
    }

    /// Convenience constructor with default ratio and no registry.
    pub fn new(owner: &str, source: Arc<dyn DataSource>) -> Result<Self> {
        Self::builder(owner).source(source).build()
    }

    /// Stable identity of this buffer.
    pub fn id(&self) -> BufferId {
        self.core.id
    }

    /// Owner tag used for group pause/resume.
    pub fn owner(&self) -> &str {
        &self.core.owner
    }

    /// Blocking positional read into `buf` at `position` with the given
    /// priority. Returns the number of bytes read (may be short near the
    /// end of a non-circular source).
    ///
    /// Fails with [`Error::Config`] for a zero-length request or an
    /// out-of-range position on a non-circular source (circular sources
    /// wrap modulo total size instead). Raw-read failures surface as
    /// [`Error::Io`] with the source's code and message; the caller may
    /// retry.
    pub fn read(&self, buf: &mut [u8], position: u64, priority: Priority) -> Result<usize> {
        if buf.is_empty() {
            return Err(Error::Config("zero-length read".into()));
        }

        let size = self.core.byte_size()?;
        let position = if self.core.source.is_circular() {
            if size == 0 {
                return Err(Error::Config("circular source has zero size".into()));
            }
            position % size
        } else if position >= size {
            return Err(Error::Config(format!(
                "position {} out of range (size {})",
                position, size
            )));
        } else {
            position
        };

        let request = Request::new(buf.len(), position, priority);
        self.core.enqueue(Arc::clone(&request))?;

        let n = request.wait_completion()?;
        let data = request.take_data();
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    /// Pause the buffer and block until every request queued or in flight
    /// before the pause has completed. Reads issued while paused are queued
    /// but not serviced until [`resume()`](Self::resume).
    pub fn pause(&self) {
        self.core.pause();
    }

    /// Clear the paused flag and wake the worker.
    pub fn resume(&self) {
        self.core.resume();
    }

    /// Reference-counted open; the 0→1 transition invokes the source's
    /// `open_input` hook.
    pub fn open(&self) -> Result<()> {
        self.core.open()
    }

    /// Reference-counted close; the 1→0 transition invokes the source's
    /// `close_input` hook and invalidates the cached byte size.
    ///
    /// # Panics
    ///
    /// Panics when called without a matching `open()` (protocol violation).
    pub fn close(&self) -> Result<()> {
        self.core.close()
    }

    /// Current open refcount.
    pub fn open_count(&self) -> u32 {
        self.core.state.lock().open_count
    }

    /// Total byte size of the source, queried lazily and cached for the
    /// duration of one open session.
    pub fn byte_size(&self) -> Result<u64> {
        self.core.byte_size()
    }

    /// Snapshot of the scheduling and lifecycle bookkeeping.
    pub fn stats(&self) -> BufferStats {
        self.core.stats()
    }
}

impl Drop for RandomAccessBuffer {
    fn drop(&mut self) {
        // Stop accepting reads and fail what is still queued, let the worker
        // finish its in-flight request, join it, then release the medium.
        self.core.begin_shutdown();
        self.controller.stop();

        {
            let mut st = self.core.state.lock();
            if st.open_count > 0 {
                st.open_count = 0;
                if let Err(err) = self.core.source.close_input() {
                    log::warn!("[BUFFER] id={} close on drop failed: {}", self.core.id, err);
                }
            }
        }

        if let Some(registry) = &self.registry {
            registry.deregister(&self.core.owner, self.core.id);
        }
        log::debug!("[BUFFER] id={} destroyed", self.core.id);
    }
}

impl std::fmt::Debug for RandomAccessBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RandomAccessBuffer")
            .field("id", &self.core.id)
            .field("owner", &self.core.owner)
            .field("ratio", &self.core.ratio)
            .finish_non_exhaustive()
    }
}
