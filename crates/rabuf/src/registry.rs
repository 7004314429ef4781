// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Owner-tag registry for group pause/resume.
//!
//! Maintenance tooling quiesces every buffer sharing an owner tag without
//! naming individual buffers: [`BufferRegistry::pause_all`] applies each
//! buffer's drain barrier in turn and returns once all of them are idle.
//!
//! The registry is an explicit, injected object: create one at application
//! startup and hand it to [`BufferBuilder::registry`]; there is no implicit
//! process-wide singleton. Buffers register on construction and deregister
//! on drop; dead entries are also pruned on access.
//!
//! [`BufferBuilder::registry`]: crate::buffer::BufferBuilder::registry

use crate::buffer::{BufferCore, BufferId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

struct Entry {
    id: BufferId,
    core: Weak<BufferCore>,
}

/// Registry of buffers keyed by owner tag.
#[derive(Default)]
pub struct BufferRegistry {
    buffers: Mutex<HashMap<String, Vec<Entry>>>,
}

impl BufferRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, owner: &str, id: BufferId, core: Weak<BufferCore>) {
        let mut map = self.buffers.lock();
        map.entry(owner.to_string())
            .or_default()
            .push(Entry { id, core });
        log::debug!("[REGISTRY] registered buffer id={} owner='{}'", id, owner);
    }

    pub(crate) fn deregister(&self, owner: &str, id: BufferId) {
        let mut map = self.buffers.lock();
        if let Some(entries) = map.get_mut(owner) {
            entries.retain(|e| e.id != id);
            if entries.is_empty() {
                map.remove(owner);
            }
        }
        log::debug!("[REGISTRY] deregistered buffer id={} owner='{}'", id, owner);
    }

    /// Pause every buffer registered under `owner`, blocking until each
    /// one's pre-pause work has drained. Returns the number of buffers
    /// paused.
    pub fn pause_all(&self, owner: &str) -> usize {
        let targets = self.collect(owner);
        log::debug!("[REGISTRY] pausing {} buffer(s) owner='{}'", targets.len(), owner);
        for core in &targets {
            core.pause();
        }
        targets.len()
    }

    /// Resume every buffer registered under `owner`. Returns the number of
    /// buffers resumed.
    pub fn resume_all(&self, owner: &str) -> usize {
        let targets = self.collect(owner);
        log::debug!("[REGISTRY] resuming {} buffer(s) owner='{}'", targets.len(), owner);
        for core in &targets {
            core.resume();
        }
        targets.len()
    }

    /// Number of live buffers registered under `owner`.
    pub fn buffer_count(&self, owner: &str) -> usize {
        self.collect(owner).len()
    }

    /// Registered owner tags with at least one live buffer.
    pub fn owner_tags(&self) -> Vec<String> {
        let mut map = self.buffers.lock();
        map.retain(|_, entries| {
            entries.retain(|e| e.core.strong_count() > 0);
            !entries.is_empty()
        });
        map.keys().cloned().collect()
    }

    /// Drop every registration. Buffers themselves are unaffected; they
    /// simply stop being addressable by owner tag.
    pub fn clear(&self) {
        self.buffers.lock().clear();
    }

    /// Snapshot live buffers for one owner, pruning dead entries. The
    /// registry lock is never held across a pause barrier.
    fn collect(&self, owner: &str) -> Vec<Arc<BufferCore>> {
        let mut map = self.buffers.lock();
        let Some(entries) = map.get_mut(owner) else {
            return Vec::new();
        };
        entries.retain(|e| e.core.strong_count() > 0);
        let live: Vec<_> = entries.iter().filter_map(|e| e.core.upgrade()).collect();
        if entries.is_empty() {
            map.remove(owner);
        }
        live
    }
}

impl std::fmt::Debug for BufferRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let map = self.buffers.lock();
        f.debug_struct("BufferRegistry")
            .field("owners", &map.len())
            .finish_non_exhaustive()
    }
}
