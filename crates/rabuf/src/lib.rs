// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # RABUF - Random-Access Buffer Scheduler
//!
//! A concurrency core that arbitrates access to a single byte-addressable
//! data source (a device file, a memory-mapped ring, a plain file) among
//! many concurrent readers with different urgency levels, plus the generic
//! thread-lifecycle and worker-pool utilities used to run it.
//!
//! ## Quick Start
//!
//! ```rust
//! use rabuf::{MemSource, Priority, RandomAccessBuffer, Result};
//! use std::sync::Arc;
//!
//! fn main() -> Result<()> {
//!     let buffer = RandomAccessBuffer::builder("acq")
//!         .source(Arc::new(MemSource::new(vec![0u8; 4096])))
//!         .build()?;
//!
//!     let mut out = [0u8; 64];
//!     let n = buffer.read(&mut out, 128, Priority::High)?;
//!     assert_eq!(n, 64);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                          Caller Threads                             |
//! |        read(buf, position, priority) -- blocks per Request          |
//! +---------------------------------------------------------------------+
//! |                       RandomAccessBuffer                            |
//! |  per-priority FIFO queues | weighted round robin | pause barrier    |
//! +---------------------------------------------------------------------+
//! |                  ThreadController (worker thread)                   |
//! |        Stopped -> Starting -> Running -> Terminating                |
//! +---------------------------------------------------------------------+
//! |                       DataSource capability                         |
//! |     query_byte_size | open_input | close_input | read_input         |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`RandomAccessBuffer`] | Priority-scheduled reads over one data source |
//! | [`Request`] | One pending read with a one-shot completion cell |
//! | [`DataSource`] | Four-hook capability implemented by source variants |
//! | [`ThreadController`] | Start/stop/restart state machine for one loop |
//! | [`WorkerPool`] | Name-keyed registry of lazily created workers |
//! | [`BufferRegistry`] | Owner-tag group pause/resume |
//!
//! ## Guarantees
//!
//! - Only one thread ever invokes the raw-read hook of a given buffer.
//! - Every request is completed exactly once; double notify/wait aborts.
//! - FIFO within a priority level; bounded starvation across levels (a
//!   non-empty lower queue is serviced at least once in any window of
//!   `ratio + 1` services).
//! - `pause()` returns only when all pre-pause work has drained; a raw
//!   read, once begun, always completes.
//!
//! `read`, `pause` and `wait_completion` are unbounded waits by design;
//! the core provides no timeouts.

/// Random-access buffer orchestrator and scheduling policy.
pub mod buffer;
/// Generic thread lifecycle state machine.
pub mod controller;
/// Error taxonomy shared by all components.
pub mod error;
/// Worker pool with lazy creation and safe termination.
pub mod pool;
/// Owner-tag registry for group pause/resume.
pub mod registry;
/// Pending requests and priority levels.
pub mod request;
/// Data-source capability and in-tree source variants.
pub mod source;

pub use buffer::{
    BufferBuilder, BufferId, BufferStats, RandomAccessBuffer, DEFAULT_SERVICE_RATIO,
};
pub use controller::{LoopControl, ThreadController, ThreadState};
pub use error::{Error, Result};
pub use pool::{WorkerFactory, WorkerPool, WorkerThread};
pub use registry::BufferRegistry;
pub use request::{Priority, Request};
pub use source::{DataSource, FileSource, MemSource};

/// RABUF version string.
pub const VERSION: &str = "0.4.2";
