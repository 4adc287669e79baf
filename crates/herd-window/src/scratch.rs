//! Per-step memoization of remote public reads.
//!
//! Each shard worker owns one [`ScratchCache`]. The first read of a
//! `(gid, attr)` pair in a behavior phase reserves a slot in the bump
//! arena and issues the remote get; repeated reads decode the cached
//! bytes without touching the network. The arena is reset, not freed,
//! between steps, so steady-state behavior phases allocate nothing.

use std::collections::HashMap;

use herd_core::id::{AgentGlobalId, AttrId};

/// Bump-allocated memo of fetched remote attribute bytes.
#[derive(Debug)]
pub struct ScratchCache {
    /// `(gid, attr)` → `(offset, len)` into the arena.
    map: HashMap<(AgentGlobalId, AttrId), (usize, usize)>,
    /// Backing storage. Grows on demand, never shrinks during a run.
    arena: Vec<u8>,
    cursor: usize,
}

impl ScratchCache {
    /// A cache with the given initial arena capacity in bytes.
    pub fn new(initial_capacity: usize) -> Self {
        Self {
            map: HashMap::new(),
            arena: vec![0u8; initial_capacity],
            cursor: 0,
        }
    }

    /// Forget all memoized reads and rewind the arena. Called at the
    /// start of every behavior phase.
    pub fn reset(&mut self) {
        self.map.clear();
        self.cursor = 0;
    }

    /// The cached slot for a read, if it was already fetched this step.
    pub fn lookup(&self, gid: AgentGlobalId, attr: AttrId) -> Option<(usize, usize)> {
        self.map.get(&(gid, attr)).copied()
    }

    /// Reserve `len` bytes for a fresh read and memoize the slot.
    pub fn reserve(&mut self, gid: AgentGlobalId, attr: AttrId, len: usize) -> (usize, usize) {
        let start = self.cursor;
        let end = start + len;
        if end > self.arena.len() {
            let target = self.arena.len().max(256).max(end);
            self.arena.resize(target * 2, 0);
        }
        self.cursor = end;
        self.map.insert((gid, attr), (start, len));
        (start, len)
    }

    /// Borrow a slot's bytes.
    pub fn bytes(&self, slot: (usize, usize)) -> &[u8] {
        &self.arena[slot.0..slot.0 + slot.1]
    }

    /// Mutably borrow a slot's bytes (the get completion writes here).
    pub fn bytes_mut(&mut self, slot: (usize, usize)) -> &mut [u8] {
        &mut self.arena[slot.0..slot.0 + slot.1]
    }

    /// Bytes currently allocated from the arena.
    pub fn used(&self) -> usize {
        self.cursor
    }

    /// Arena capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.arena.len()
    }
}
