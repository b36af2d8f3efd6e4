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

//! Structural snapshot reads
//!
//! A snapshot observes only data present before any currently-open stage
//! was created. The pin is the bottom open frame's version-cell mark:
//! a chain cell is snapshot-visible iff its id precedes that mark. With
//! no stage open the pin is unbounded and the snapshot is a live view of
//! committed (depth-0) state.
//!
//! Snapshot iterators position lazily by key — never by node — because
//! the index may be reshaped underneath them, and reshaping reuses freed
//! structure. They are invalidated when their pinning stage disappears
//! (tracked by the frame's never-reused epoch): `valid()` turns false
//! and `next()` reports [`StageError::SnapshotInvalidated`].

use std::sync::Arc;

use parking_lot::RwLock;

use stagedb_core::error::{Result, StageError};
use stagedb_core::key::successor;

use crate::buffer::BufferInner;
use crate::index::KeyIndex;

/// First batch size of the batched snapshot iterator.
const MIN_BATCH: usize = 32;
/// Batch sizes grow geometrically up to this cap.
const MAX_BATCH: usize = 8192;

/// A snapshot's visibility horizon.
///
/// Taken inside a stage, the horizon is fixed at that bottom frame's
/// version-cell mark. Taken outside any stage, the horizon is resolved
/// at read time: whatever stage is open *then* is excluded, so the
/// snapshot is a live view of committed (depth-0) state — which is what
/// keeps a reader taken before staging activity reporting the last
/// pre-stage value afterwards.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SnapshotView {
    pin_cell: Option<u32>,
    pin_epoch: Option<u64>,
}

impl SnapshotView {
    pub(crate) fn pin<I: KeyIndex>(inner: &BufferInner<I>) -> Self {
        match inner.stages.first() {
            Some(frame) => Self {
                pin_cell: Some(frame.cell_start),
                pin_epoch: Some(frame.epoch),
            },
            None => Self {
                pin_cell: None,
                pin_epoch: None,
            },
        }
    }

    /// The pinning stage was released or cleaned up (or replaced by a
    /// younger one). Snapshots pinned outside any stage never expire.
    pub(crate) fn invalidated<I: KeyIndex>(&self, inner: &BufferInner<I>) -> bool {
        match self.pin_epoch {
            None => false,
            Some(epoch) => inner.stages.first().map(|f| f.epoch) != Some(epoch),
        }
    }

    /// Cells at or past the horizon are invisible; `None` means
    /// everything is visible.
    fn horizon<I: KeyIndex>(&self, inner: &BufferInner<I>) -> Option<u32> {
        match self.pin_epoch {
            None => inner.stages.first().map(|f| f.cell_start),
            Some(_) => self.pin_cell,
        }
    }

    /// Newest chain cell visible to this snapshot, starting at `head`.
    pub(crate) fn visible_cell<I: KeyIndex>(&self, inner: &BufferInner<I>, head: u32) -> Option<u32> {
        let horizon = self.horizon(inner);
        for cell in inner.log.chain(head) {
            match horizon {
                Some(pin) if cell >= pin => continue,
                _ => return Some(cell),
            }
        }
        None
    }
}

/// First snapshot-visible key at or after `bound`, below `upper`.
fn snap_seek<I: KeyIndex>(
    inner: &BufferInner<I>,
    view: &SnapshotView,
    bound: &[u8],
    upper: Option<&[u8]>,
) -> Option<(Vec<u8>, u32)> {
    let mut bound = bound.to_vec();
    loop {
        let (k, slot) = inner.index.seek(&bound)?;
        if let Some(u) = upper {
            if k >= u {
                return None;
            }
        }
        match view.visible_cell(inner, inner.slots.get(slot).head) {
            Some(cell) => return Some((k.to_vec(), cell)),
            None => bound = successor(k),
        }
    }
}

/// Greatest snapshot-visible key strictly below `bound`, at or above
/// `lower`.
fn snap_seek_rev<I: KeyIndex>(
    inner: &BufferInner<I>,
    view: &SnapshotView,
    bound: Option<&[u8]>,
    lower: Option<&[u8]>,
) -> Option<(Vec<u8>, u32)> {
    let mut bound = bound.map(<[u8]>::to_vec);
    loop {
        let (k, slot) = inner.index.seek_rev(bound.as_deref())?;
        if let Some(l) = lower {
            if k < l {
                return None;
            }
        }
        match view.visible_cell(inner, inner.slots.get(slot).head) {
            Some(cell) => return Some((k.to_vec(), cell)),
            None => bound = Some(k.to_vec()),
        }
    }
}

/// Point reader over the snapshot view.
///
/// Getters are never invalidated: the pinned horizon stays safe across
/// later staging activity, checkpoint revert included.
pub struct SnapshotGetter<I: KeyIndex> {
    inner: Arc<RwLock<BufferInner<I>>>,
    view: SnapshotView,
}

impl<I: KeyIndex> SnapshotGetter<I> {
    pub(crate) fn new(inner: Arc<RwLock<BufferInner<I>>>, view: SnapshotView) -> Self {
        Self { inner, view }
    }

    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let inner = self.inner.read();
        let slot = inner.index.lookup(key).ok_or(StageError::NotFound)?;
        let head = inner.slots.get(slot).head;
        let cell = self
            .view
            .visible_cell(&inner, head)
            .ok_or(StageError::NotFound)?;
        Ok(inner.log.value(cell).to_vec())
    }
}

/// Lazy snapshot cursor.
///
/// Holds only its current key; the value is resolved through the view
/// on each call, so it reflects the snapshot horizon, not the moment
/// the cursor happened to move.
pub struct SnapshotIter<I: KeyIndex> {
    inner: Arc<RwLock<BufferInner<I>>>,
    view: SnapshotView,
    lower: Option<Vec<u8>>,
    upper: Option<Vec<u8>>,
    reverse: bool,
    cur_key: Option<Vec<u8>>,
    invalid: bool,
}

impl<I: KeyIndex> SnapshotIter<I> {
    pub(crate) fn new(
        inner: Arc<RwLock<BufferInner<I>>>,
        view: SnapshotView,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        reverse: bool,
    ) -> Self {
        let mut it = Self {
            inner,
            view,
            lower: lower.map(<[u8]>::to_vec),
            upper: upper.map(<[u8]>::to_vec),
            reverse,
            cur_key: None,
            invalid: false,
        };
        let first = {
            let guard = it.inner.read();
            if it.reverse {
                snap_seek_rev(&guard, &it.view, it.upper.as_deref(), it.lower.as_deref())
            } else {
                let bound = it.lower.clone().unwrap_or_default();
                snap_seek(&guard, &it.view, &bound, it.upper.as_deref())
            }
        };
        it.cur_key = first.map(|(k, _)| k);
        it
    }

    pub fn valid(&self) -> bool {
        if self.invalid || self.cur_key.is_none() {
            return false;
        }
        let inner = self.inner.read();
        !self.view.invalidated(&inner)
    }

    /// Current key, or empty when invalid.
    pub fn key(&self) -> &[u8] {
        self.cur_key.as_deref().unwrap_or(&[])
    }

    /// Current value, resolved through the snapshot view at call time.
    pub fn value(&self) -> Vec<u8> {
        let key = match &self.cur_key {
            Some(k) => k,
            None => return Vec::new(),
        };
        let inner = self.inner.read();
        let slot = match inner.index.lookup(key) {
            Some(slot) => slot,
            None => return Vec::new(),
        };
        let head = inner.slots.get(slot).head;
        match self.view.visible_cell(&inner, head) {
            Some(cell) => inner.log.value(cell).to_vec(),
            None => Vec::new(),
        }
    }

    pub fn next(&mut self) -> Result<()> {
        let inner = self.inner.read();
        if self.view.invalidated(&inner) {
            self.invalid = true;
            self.cur_key = None;
            return Err(StageError::SnapshotInvalidated);
        }
        let cur = match self.cur_key.take() {
            Some(k) => k,
            None => return Ok(()),
        };
        let found = if self.reverse {
            snap_seek_rev(&inner, &self.view, Some(&cur), self.lower.as_deref())
        } else {
            snap_seek(&inner, &self.view, &successor(&cur), self.upper.as_deref())
        };
        self.cur_key = found.map(|(k, _)| k);
        Ok(())
    }
}

/// A pinned snapshot from which batched iterators are created.
pub struct Snapshot<I: KeyIndex> {
    inner: Arc<RwLock<BufferInner<I>>>,
    view: SnapshotView,
}

impl<I: KeyIndex> Snapshot<I> {
    pub(crate) fn new(inner: Arc<RwLock<BufferInner<I>>>, view: SnapshotView) -> Self {
        Self { inner, view }
    }

    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let inner = self.inner.read();
        let slot = inner.index.lookup(key).ok_or(StageError::NotFound)?;
        let head = inner.slots.get(slot).head;
        let cell = self
            .view
            .visible_cell(&inner, head)
            .ok_or(StageError::NotFound)?;
        Ok(inner.log.value(cell).to_vec())
    }

    /// Iterator that pre-materializes key/value pairs in geometrically
    /// growing batches (32 → 8192), replenishing by key re-seek.
    pub fn batched_iter(
        &self,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        reverse: bool,
    ) -> BatchedSnapshotIter<I> {
        BatchedSnapshotIter::new(self.inner.clone(), self.view, lower, upper, reverse)
    }
}

/// Batched snapshot iterator.
///
/// Materializes copies, so already-fetched entries survive any amount of
/// concurrent writing; replenishment re-seeks from the last key. If the
/// pinning stage is released or cleaned up before iteration completes,
/// the iterator invalidates itself: `valid()` is false and `next()`
/// reports the error even after exhaustion.
pub struct BatchedSnapshotIter<I: KeyIndex> {
    inner: Arc<RwLock<BufferInner<I>>>,
    view: SnapshotView,
    lower: Option<Vec<u8>>,
    upper: Option<Vec<u8>>,
    reverse: bool,
    batch: Vec<(Vec<u8>, Vec<u8>)>,
    pos: usize,
    batch_size: usize,
    next_lower: Vec<u8>,
    next_upper: Option<Vec<u8>>,
    exhausted: bool,
    invalid: bool,
}

impl<I: KeyIndex> BatchedSnapshotIter<I> {
    pub(crate) fn new(
        inner: Arc<RwLock<BufferInner<I>>>,
        view: SnapshotView,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        reverse: bool,
    ) -> Self {
        let mut it = Self {
            inner,
            view,
            lower: lower.map(<[u8]>::to_vec),
            upper: upper.map(<[u8]>::to_vec),
            reverse,
            batch: Vec::new(),
            pos: 0,
            batch_size: MIN_BATCH,
            next_lower: lower.map(<[u8]>::to_vec).unwrap_or_default(),
            next_upper: upper.map(<[u8]>::to_vec),
            exhausted: false,
            invalid: false,
        };
        // an invalidated-at-birth iterator simply starts invalid
        let _ = it.refill();
        it
    }

    fn refill(&mut self) -> Result<()> {
        self.batch.clear();
        self.pos = 0;
        let inner = self.inner.read();
        if self.view.invalidated(&inner) {
            self.invalid = true;
            return Err(StageError::SnapshotInvalidated);
        }
        if self.exhausted {
            return Ok(());
        }
        while self.batch.len() < self.batch_size {
            let found = if self.reverse {
                snap_seek_rev(
                    &inner,
                    &self.view,
                    self.next_upper.as_deref(),
                    self.lower.as_deref(),
                )
            } else {
                snap_seek(&inner, &self.view, &self.next_lower, self.upper.as_deref())
            };
            match found {
                None => {
                    self.exhausted = true;
                    break;
                }
                Some((key, cell)) => {
                    let value = inner.log.value(cell).to_vec();
                    if self.reverse {
                        self.next_upper = Some(key.clone());
                    } else {
                        self.next_lower = successor(&key);
                    }
                    self.batch.push((key, value));
                }
            }
        }
        self.batch_size = (self.batch_size * 2).min(MAX_BATCH);
        Ok(())
    }

    pub fn valid(&self) -> bool {
        if self.invalid || self.pos >= self.batch.len() {
            return false;
        }
        let inner = self.inner.read();
        !self.view.invalidated(&inner)
    }

    pub fn key(&self) -> &[u8] {
        self.batch.get(self.pos).map_or(&[], |(k, _)| k.as_slice())
    }

    pub fn value(&self) -> &[u8] {
        self.batch.get(self.pos).map_or(&[], |(_, v)| v.as_slice())
    }

    pub fn next(&mut self) -> Result<()> {
        {
            let inner = self.inner.read();
            if self.view.invalidated(&inner) {
                self.invalid = true;
                return Err(StageError::SnapshotInvalidated);
            }
        }
        if self.invalid {
            return Err(StageError::SnapshotInvalidated);
        }
        if self.pos + 1 < self.batch.len() {
            self.pos += 1;
            return Ok(());
        }
        if self.exhausted {
            self.pos = self.batch.len();
            return Ok(());
        }
        self.refill()
    }
}
