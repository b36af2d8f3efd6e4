// SPDX-License-Identifier: AGPL-3.0-or-later
// StageDB - Transactional Staging Buffer for Distributed KV Clients
// Copyright (C) 2026 Sushanth Reddy Vanagala (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! The `MemBuffer` façade
//!
//! Packages the index engine, value log, stage stack and flags into the
//! transactional staging buffer the transaction driver mutates. The
//! buffer is generic over its [`KeyIndex`] engine; [`TreeMemBuffer`] and
//! [`ArtMemBuffer`] are the two shipped configurations.
//!
//! State lives behind an `Arc<RwLock<_>>` so snapshot getters and
//! iterators handed out earlier stay usable while the owning transaction
//! keeps writing. The lock is not a license for concurrent writers: the
//! buffer belongs to one transaction, and all operations are synchronous.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use stagedb_core::error::{Result, StageError};
use stagedb_core::flags::{FlagsOp, KeyFlags};
use stagedb_core::key::check_key_size;

use crate::arena::{VersionLog, NULL_CELL};
use crate::index::art::ArtIndex;
use crate::index::tree::TreeIndex;
use crate::index::{KeyIndex, SlotId, SlotStore};
use crate::iter::BufferIter;
use crate::snapshot::{Snapshot, SnapshotGetter, SnapshotIter, SnapshotView};
use crate::staging::{Checkpoint, StageFrame, StageHandle, UndoEntry};

/// Callback invoked with the buffer's allocated footprint after
/// mutations.
pub type MemoryHook = Arc<dyn Fn(u64) + Send + Sync>;

/// Single-slot most-recent-lookup cache.
///
/// Purely an optimization: a hit resolves the key's slot without
/// touching the index. Hit/miss counters are instrumentation only.
struct LookupCache {
    key: Vec<u8>,
    slot: SlotId,
    valid: bool,
    hits: u64,
    misses: u64,
}

impl LookupCache {
    fn new() -> Self {
        Self {
            key: Vec::new(),
            slot: 0,
            valid: false,
            hits: 0,
            misses: 0,
        }
    }

    fn store(&mut self, key: &[u8], slot: SlotId) {
        self.key.clear();
        self.key.extend_from_slice(key);
        self.slot = slot;
        self.valid = true;
    }

    fn invalidate(&mut self) {
        self.valid = false;
    }
}

pub(crate) struct BufferInner<I: KeyIndex> {
    pub(crate) index: I,
    pub(crate) slots: SlotStore,
    pub(crate) log: VersionLog,
    pub(crate) undo: Vec<UndoEntry>,
    pub(crate) stages: Vec<StageFrame>,
    next_epoch: u64,
    live_keys: usize,
    live_bytes: usize,
    entry_size_limit: u64,
    buffer_size_limit: u64,
    hook: Option<MemoryHook>,
    cache: LookupCache,
    persistent_dirty: bool,
}

impl<I: KeyIndex> BufferInner<I> {
    fn new() -> Self {
        Self {
            index: I::default(),
            slots: SlotStore::default(),
            log: VersionLog::default(),
            undo: Vec::new(),
            stages: Vec::new(),
            next_epoch: 0,
            live_keys: 0,
            live_bytes: 0,
            entry_size_limit: u64::MAX,
            buffer_size_limit: u64::MAX,
            hook: None,
            cache: LookupCache::new(),
            persistent_dirty: false,
        }
    }

    fn mem(&self) -> usize {
        self.log.mem()
            + self.index.mem_usage()
            + self.slots.mem()
            + self.undo.capacity() * std::mem::size_of::<UndoEntry>()
            + self.stages.capacity() * std::mem::size_of::<StageFrame>()
    }

    /// Resolve a key to its slot through the single-slot cache,
    /// counting one hit or miss.
    fn lookup_slot_cached(&mut self, key: &[u8]) -> Option<SlotId> {
        if self.cache.valid && self.cache.key == key {
            self.cache.hits += 1;
            return Some(self.cache.slot);
        }
        self.cache.misses += 1;
        let slot = self.index.lookup(key);
        if let Some(slot) = slot {
            self.cache.store(key, slot);
        }
        slot
    }

    fn apply_write(
        &mut self,
        key: &[u8],
        value: &[u8],
        ops: &[FlagsOp],
        plain_set: bool,
        tombstone: bool,
    ) -> Result<()> {
        check_key_size(key)?;
        debug_assert!(!key.is_empty(), "keys are non-empty byte strings");
        let entry_size = key.len() as u64 + value.len() as u64;
        if entry_size > self.entry_size_limit {
            return Err(StageError::EntryTooLarge {
                limit: self.entry_size_limit,
                size: entry_size,
            });
        }
        let slot_opt = self.lookup_slot_cached(key);
        // Projected footprint after the write; rejected writes leave no
        // trace.
        let projected = match slot_opt {
            Some(slot) if self.slots.get(slot).head != NULL_CELL => {
                let old = self.log.value_len(self.slots.get(slot).head);
                self.live_bytes - old + value.len()
            }
            _ => self.live_bytes + key.len() + value.len(),
        };
        if projected as u64 > self.buffer_size_limit {
            return Err(StageError::BufferFull {
                limit: self.buffer_size_limit,
                size: projected as u64,
            });
        }

        let (slot_id, created) = match slot_opt {
            Some(slot) => (slot, false),
            None => {
                let slot = self.slots.alloc();
                self.index.insert(key, slot);
                self.cache.store(key, slot);
                (slot, true)
            }
        };
        let prev = self.slots.get(slot_id);
        self.undo.push(UndoEntry {
            key: key.into(),
            slot: slot_id,
            prev_head: prev.head,
            prev_flags: prev.flags,
            created,
        });

        let mut flags = prev.flags;
        // A value write supersedes any earlier deletion marker; a plain
        // set additionally retires the constraint-check hint.
        flags = flags.without(KeyFlags::TOMBSTONE);
        if plain_set {
            flags = flags.without(KeyFlags::NEED_CONSTRAINT_CHECK_IN_PREWRITE);
        }
        if tombstone {
            flags = flags
                .with(KeyFlags::TOMBSTONE)
                .without(KeyFlags::NEED_CONSTRAINT_CHECK_IN_PREWRITE);
        }
        for op in ops {
            flags = flags.apply(*op);
        }

        let depth = self.stages.len() as u16;
        let head = self.log.append(value, depth, prev.head);
        let slot = self.slots.get_mut(slot_id);
        slot.head = head;
        slot.flags = flags;

        if prev.head == NULL_CELL {
            self.live_keys += 1;
            self.live_bytes += key.len() + value.len();
        } else {
            let old = self.log.value_len(prev.head);
            self.live_bytes = self.live_bytes - old + value.len();
        }
        Ok(())
    }

    /// Undo one mutation. With `keep_persistent`, persistent flag bits
    /// currently set survive the rollback (stage cleanup); without it
    /// the pre-mutation flags are restored exactly (checkpoint revert).
    fn revert_entry(&mut self, entry: UndoEntry, keep_persistent: bool) {
        let cur = self.slots.get(entry.slot);

        if cur.head != NULL_CELL {
            let cur_len = self.log.value_len(cur.head);
            if entry.prev_head != NULL_CELL {
                let prev_len = self.log.value_len(entry.prev_head);
                self.live_bytes = self.live_bytes - cur_len + prev_len;
            } else {
                self.live_keys -= 1;
                self.live_bytes -= entry.key.len() + cur_len;
            }
        } else if entry.prev_head != NULL_CELL {
            self.live_keys += 1;
            self.live_bytes += entry.key.len() + self.log.value_len(entry.prev_head);
        }

        let flags = if keep_persistent {
            let surviving = cur.flags.persistent();
            if !surviving.is_empty() {
                self.persistent_dirty = true;
            }
            entry.prev_flags | surviving
        } else {
            entry.prev_flags
        };

        if entry.created && entry.prev_head == NULL_CELL && flags.is_empty() {
            self.index.remove(&entry.key);
            self.slots.release(entry.slot);
        } else {
            let slot = self.slots.get_mut(entry.slot);
            slot.head = entry.prev_head;
            slot.flags = flags;
        }
    }
}

/// Transactional in-memory key-value staging buffer.
///
/// An ordered map from byte-string keys to byte-string values with
/// per-key metadata flags, nested savepoint stages, checkpoints and
/// structural snapshot reads. Created empty with zero heap; mutated by
/// one owning transaction; destroyed with it.
pub struct MemBuffer<I: KeyIndex> {
    inner: Arc<RwLock<BufferInner<I>>>,
}

/// Buffer backed by the balanced-tree engine.
pub type TreeMemBuffer = MemBuffer<TreeIndex>;
/// Buffer backed by the adaptive-radix-trie engine.
pub type ArtMemBuffer = MemBuffer<ArtIndex>;

impl<I: KeyIndex> Default for MemBuffer<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: KeyIndex> MemBuffer<I> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(BufferInner::new())),
        }
    }

    fn notify(&self, guard: parking_lot::RwLockWriteGuard<'_, BufferInner<I>>) {
        let hook = guard.hook.clone();
        let mem = guard.mem() as u64;
        drop(guard);
        if let Some(hook) = hook {
            hook(mem);
        }
    }

    /// Point read of the newest visible value.
    ///
    /// A deletion marker reads back as the empty value it stores; the
    /// key's `TOMBSTONE` flag tells the embedding layer apart.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let mut inner = self.inner.write();
        let slot = inner.lookup_slot_cached(key).ok_or(StageError::NotFound)?;
        let state = inner.slots.get(slot);
        if state.head == NULL_CELL {
            return Err(StageError::NotFound);
        }
        Ok(inner.log.value(state.head).to_vec())
    }

    /// Read a key's flag word. Flags-only nodes are visible here even
    /// though `get` reports them absent.
    pub fn get_flags(&self, key: &[u8]) -> Result<KeyFlags> {
        let inner = self.inner.read();
        let slot = inner.index.lookup(key).ok_or(StageError::NotFound)?;
        Ok(inner.slots.get(slot).flags)
    }

    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut inner = self.inner.write();
        inner.apply_write(key, value, &[], true, false)?;
        self.notify(inner);
        Ok(())
    }

    pub fn set_with_flags(&self, key: &[u8], value: &[u8], ops: &[FlagsOp]) -> Result<()> {
        let mut inner = self.inner.write();
        inner.apply_write(key, value, ops, false, false)?;
        self.notify(inner);
        Ok(())
    }

    /// Record a deletion: an empty value carrying the `TOMBSTONE` flag.
    /// Only the key length counts against the buffer limit.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let mut inner = self.inner.write();
        inner.apply_write(key, &[], &[], false, true)?;
        self.notify(inner);
        Ok(())
    }

    /// Mutate only a key's flags, materializing a flags-only node when
    /// the key is absent so the flag survives.
    pub fn update_flags(&self, key: &[u8], ops: &[FlagsOp]) {
        let mut inner = self.inner.write();
        let (slot_id, created) = match inner.index.lookup(key) {
            Some(slot) => (slot, false),
            None => {
                let slot = inner.slots.alloc();
                inner.index.insert(key, slot);
                (slot, true)
            }
        };
        let prev = inner.slots.get(slot_id);
        inner.undo.push(UndoEntry {
            key: key.into(),
            slot: slot_id,
            prev_head: prev.head,
            prev_flags: prev.flags,
            created,
        });
        let mut flags = prev.flags;
        for op in ops {
            flags = flags.apply(*op);
        }
        inner.slots.get_mut(slot_id).flags = flags;
        self.notify(inner);
    }

    /// Open a new stage. The returned handle is the stage's 1-based
    /// depth in the stack.
    pub fn staging(&self) -> StageHandle {
        let mut inner = self.inner.write();
        inner.next_epoch += 1;
        let frame = StageFrame {
            epoch: inner.next_epoch,
            undo_start: inner.undo.len(),
            cell_start: inner.log.cells_len(),
            arena_start: inner.log.arena_len(),
        };
        inner.stages.push(frame);
        let depth = inner.stages.len();
        trace!(depth, "stage opened");
        depth
    }

    /// Commit the top stage into its parent. Panics unless `h` is the
    /// top handle (`0` is a no-op).
    pub fn release(&self, h: StageHandle) {
        if h == 0 {
            return;
        }
        let mut inner = self.inner.write();
        let top = inner.stages.len();
        assert!(
            h == top,
            "release of stage handle {h} out of order (top is {top})"
        );
        if let Some(frame) = inner.stages.pop() {
            // Cells written in this stage belong to the parent now; the
            // undo suffix stays in the shared log and is absorbed with
            // them.
            inner.log.restamp(frame.cell_start, top as u16);
        }
        trace!(depth = top, "stage released");
    }

    /// Roll back the top stage. `h == 0` and `h` greater than the top
    /// are no-ops (the latter makes defer-style cleanup safe); a handle
    /// below the top panics.
    pub fn cleanup(&self, h: StageHandle) {
        if h == 0 {
            return;
        }
        let mut inner = self.inner.write();
        let top = inner.stages.len();
        if h > top {
            return;
        }
        assert!(
            h == top,
            "cleanup of stage handle {h} below the top (top is {top})"
        );
        if let Some(frame) = inner.stages.pop() {
            while inner.undo.len() > frame.undo_start {
                if let Some(entry) = inner.undo.pop() {
                    inner.revert_entry(entry, true);
                }
            }
            inner.log.truncate(frame.cell_start, frame.arena_start);
        }
        inner.cache.invalidate();
        trace!(depth = top, "stage cleaned up");
        self.notify(inner);
    }

    /// Record the current end-of-log position for later bulk revert.
    pub fn checkpoint(&self) -> Checkpoint {
        let inner = self.inner.read();
        Checkpoint {
            undo_len: inner.undo.len(),
            cell_len: inner.log.cells_len(),
            arena_len: inner.log.arena_len(),
            depth: inner.stages.len(),
            epoch: inner.next_epoch,
        }
    }

    /// Undo every mutation performed since `cp` was taken, restoring
    /// values and flags exactly. The stack must be at the same or a
    /// shallower depth than when the checkpoint was taken.
    pub fn revert_to_checkpoint(&self, cp: &Checkpoint) {
        let mut inner = self.inner.write();
        assert!(
            inner.stages.len() <= cp.depth,
            "revert to a checkpoint from a shallower stage stack (depth {} vs {})",
            inner.stages.len(),
            cp.depth
        );
        debug!(
            undo = inner.undo.len() - inner.undo.len().min(cp.undo_len),
            "reverting to checkpoint"
        );
        while inner.undo.len() > cp.undo_len {
            if let Some(entry) = inner.undo.pop() {
                inner.revert_entry(entry, false);
            }
        }
        inner.log.truncate(cp.cell_len, cp.arena_len);
        for frame in &mut inner.stages {
            frame.undo_start = frame.undo_start.min(cp.undo_len);
            frame.cell_start = frame.cell_start.min(cp.cell_len);
            frame.arena_start = frame.arena_start.min(cp.arena_len);
        }
        inner.cache.invalidate();
        self.notify(inner);
    }

    /// Visit every key touched in stage `h`'s undo suffix, in insertion
    /// order (a key mutated twice is visited twice), with its current
    /// flags and current visible value.
    pub fn inspect_stage(&self, h: StageHandle, mut visitor: impl FnMut(&[u8], KeyFlags, &[u8])) {
        let touched: Vec<(Box<[u8]>, KeyFlags, Vec<u8>)> = {
            let inner = self.inner.read();
            assert!(
                h >= 1 && h <= inner.stages.len(),
                "inspect of invalid stage handle {h}"
            );
            let start = inner.stages[h - 1].undo_start;
            inner.undo[start..]
                .iter()
                .map(|entry| {
                    let state = inner.slots.get(entry.slot);
                    let value = if state.head != NULL_CELL {
                        inner.log.value(state.head).to_vec()
                    } else {
                        Vec::new()
                    };
                    (entry.key.clone(), state.flags, value)
                })
                .collect()
        };
        for (key, flags, value) in &touched {
            visitor(key, *flags, value);
        }
    }

    /// Walk a key's version chain newest-to-oldest and return the first
    /// value matching `predicate`, `Ok(None)` when no version matches,
    /// or `NotFound` when the key has no value history at all.
    pub fn select_value_history(
        &self,
        key: &[u8],
        mut predicate: impl FnMut(&[u8]) -> bool,
    ) -> Result<Option<Vec<u8>>> {
        let inner = self.inner.read();
        let slot = inner.index.lookup(key).ok_or(StageError::NotFound)?;
        let state = inner.slots.get(slot);
        if state.head == NULL_CELL {
            return Err(StageError::NotFound);
        }
        for cell in inner.log.chain(state.head) {
            let value = inner.log.value(cell);
            if predicate(value) {
                return Ok(Some(value.to_vec()));
            }
        }
        Ok(None)
    }

    /// Forward iteration over `[lower, upper)`. `None` bounds are
    /// unbounded; empty or inverted ranges yield an invalid cursor.
    pub fn iter(&self, lower: Option<&[u8]>, upper: Option<&[u8]>) -> BufferIter<I> {
        BufferIter::new(self.inner.clone(), lower, upper, false, false)
    }

    /// Reverse iteration over `[lower, upper)`: starts at the greatest
    /// key strictly below `upper` and stops before `lower`.
    pub fn iter_reverse(&self, upper: Option<&[u8]>, lower: Option<&[u8]>) -> BufferIter<I> {
        BufferIter::new(self.inner.clone(), lower, upper, true, false)
    }

    /// Like [`MemBuffer::iter`], but also visits flags-only nodes; probe
    /// with `has_value`.
    pub fn iter_with_flags(&self, lower: Option<&[u8]>, upper: Option<&[u8]>) -> BufferIter<I> {
        BufferIter::new(self.inner.clone(), lower, upper, false, true)
    }

    pub fn iter_reverse_with_flags(
        &self,
        upper: Option<&[u8]>,
        lower: Option<&[u8]>,
    ) -> BufferIter<I> {
        BufferIter::new(self.inner.clone(), lower, upper, true, true)
    }

    /// Reader over the state outside any currently-open stage. The view
    /// is evaluated at read time and stays safe across later staging
    /// activity.
    pub fn snapshot_getter(&self) -> SnapshotGetter<I> {
        let inner = self.inner.read();
        SnapshotGetter::new(self.inner.clone(), SnapshotView::pin(&inner))
    }

    /// Snapshot iteration over `[lower, upper)`. Positions lazily by
    /// key, so the index may be freely mutated between steps.
    pub fn snapshot_iter(&self, lower: Option<&[u8]>, upper: Option<&[u8]>) -> SnapshotIter<I> {
        let view = {
            let inner = self.inner.read();
            SnapshotView::pin(&inner)
        };
        SnapshotIter::new(self.inner.clone(), view, lower, upper, false)
    }

    pub fn snapshot_iter_reverse(
        &self,
        upper: Option<&[u8]>,
        lower: Option<&[u8]>,
    ) -> SnapshotIter<I> {
        let view = {
            let inner = self.inner.read();
            SnapshotView::pin(&inner)
        };
        SnapshotIter::new(self.inner.clone(), view, lower, upper, true)
    }

    /// Pin a snapshot object; batched iterators are created from it.
    pub fn get_snapshot(&self) -> Snapshot<I> {
        let inner = self.inner.read();
        Snapshot::new(self.inner.clone(), SnapshotView::pin(&inner))
    }

    /// Configure per-entry and whole-buffer size limits.
    pub fn set_entry_size_limit(&self, entry: u64, buffer: u64) {
        let mut inner = self.inner.write();
        inner.entry_size_limit = entry;
        inner.buffer_size_limit = buffer;
    }

    /// Register the memory-footprint hook. At most one hook exists;
    /// re-registration replaces it.
    pub fn set_memory_footprint_change_hook(&self, hook: impl Fn(u64) + Send + Sync + 'static) {
        self.inner.write().hook = Some(Arc::new(hook));
    }

    pub fn mem_hook_set(&self) -> bool {
        self.inner.read().hook.is_some()
    }

    /// Allocated footprint in bytes. Zero until the first write.
    pub fn mem(&self) -> u64 {
        self.inner.read().mem() as u64
    }

    /// Number of keys with a live value (deletion markers included,
    /// flags-only nodes excluded).
    pub fn len(&self) -> usize {
        self.inner.read().live_keys
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of key and current-value lengths over the keys `len` counts.
    pub fn size(&self) -> usize {
        self.inner.read().live_bytes
    }

    /// True once a mutation or a persistent-flag assignment survives in
    /// the buffer; rolled-back work does not count.
    pub fn dirty(&self) -> bool {
        let inner = self.inner.read();
        !inner.undo.is_empty() || inner.persistent_dirty
    }

    pub fn cache_hit_count(&self) -> u64 {
        self.inner.read().cache.hits
    }

    pub fn cache_miss_count(&self) -> u64 {
        self.inner.read().cache.misses
    }

    /// Return to the empty state, invalidating outstanding handles,
    /// checkpoints and snapshots. Configured limits and the memory hook
    /// survive.
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        debug!(keys = inner.live_keys, "buffer reset");
        inner.index.clear();
        inner.slots.clear();
        inner.log.clear();
        inner.undo.clear();
        inner.stages.clear();
        inner.next_epoch += 1;
        inner.live_keys = 0;
        inner.live_bytes = 0;
        inner.persistent_dirty = false;
        inner.cache.invalidate();
        self.notify(inner);
    }
}
