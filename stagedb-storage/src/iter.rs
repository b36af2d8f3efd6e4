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

//! Range cursors over the buffer's current state
//!
//! Cursors position by key: each step re-seeks the index from the
//! successor of the last returned key (predecessor when reversed). That
//! costs a lookup per step but means a cursor never holds engine
//! internals, so writes between steps — including node reshaping — are
//! harmless.
//!
//! Ranges are half-open `[lower, upper)` in both directions; empty and
//! inverted ranges produce an immediately-invalid cursor.

use std::sync::Arc;

use parking_lot::RwLock;

use stagedb_core::error::Result;
use stagedb_core::flags::KeyFlags;
use stagedb_core::key::successor;

use crate::arena::NULL_CELL;
use crate::buffer::BufferInner;
use crate::index::KeyIndex;

struct IterEntry {
    key: Vec<u8>,
    value: Vec<u8>,
    flags: KeyFlags,
    has_value: bool,
}

/// Cursor over the buffer's newest visible state.
///
/// Plain cursors skip flags-only nodes; flags-aware cursors (from
/// `iter_with_flags` and friends) include them and expose `has_value`.
pub struct BufferIter<I: KeyIndex> {
    inner: Arc<RwLock<BufferInner<I>>>,
    lower: Option<Vec<u8>>,
    upper: Option<Vec<u8>>,
    reverse: bool,
    include_flag_only: bool,
    cur: Option<IterEntry>,
}

impl<I: KeyIndex> BufferIter<I> {
    pub(crate) fn new(
        inner: Arc<RwLock<BufferInner<I>>>,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        reverse: bool,
        include_flag_only: bool,
    ) -> Self {
        let mut it = Self {
            inner,
            lower: lower.map(<[u8]>::to_vec),
            upper: upper.map(<[u8]>::to_vec),
            reverse,
            include_flag_only,
            cur: None,
        };
        it.cur = if it.reverse {
            it.step_rev(it.upper.clone())
        } else {
            it.step_fwd(it.lower.clone().unwrap_or_default())
        };
        it
    }

    fn step_fwd(&self, mut bound: Vec<u8>) -> Option<IterEntry> {
        let inner = self.inner.read();
        loop {
            let (k, slot) = inner.index.seek(&bound)?;
            if let Some(u) = &self.upper {
                if k >= u.as_slice() {
                    return None;
                }
            }
            let state = inner.slots.get(slot);
            if state.head == NULL_CELL && !self.include_flag_only {
                bound = successor(k);
                continue;
            }
            return Some(Self::entry(&inner, k, state));
        }
    }

    fn step_rev(&self, mut bound: Option<Vec<u8>>) -> Option<IterEntry> {
        let inner = self.inner.read();
        loop {
            let (k, slot) = inner.index.seek_rev(bound.as_deref())?;
            if let Some(l) = &self.lower {
                if k < l.as_slice() {
                    return None;
                }
            }
            let state = inner.slots.get(slot);
            if state.head == NULL_CELL && !self.include_flag_only {
                bound = Some(k.to_vec());
                continue;
            }
            return Some(Self::entry(&inner, k, state));
        }
    }

    fn entry(inner: &BufferInner<I>, key: &[u8], state: crate::index::KeySlot) -> IterEntry {
        let (value, has_value) = if state.head != NULL_CELL {
            (inner.log.value(state.head).to_vec(), true)
        } else {
            (Vec::new(), false)
        };
        IterEntry {
            key: key.to_vec(),
            value,
            flags: state.flags,
            has_value,
        }
    }

    pub fn valid(&self) -> bool {
        self.cur.is_some()
    }

    /// Current key, or empty when the cursor is invalid.
    pub fn key(&self) -> &[u8] {
        self.cur.as_ref().map_or(&[], |e| e.key.as_slice())
    }

    /// Current value; empty for flags-only entries (see `has_value`).
    pub fn value(&self) -> &[u8] {
        self.cur.as_ref().map_or(&[], |e| e.value.as_slice())
    }

    pub fn flags(&self) -> KeyFlags {
        self.cur.as_ref().map_or(KeyFlags::empty(), |e| e.flags)
    }

    /// Whether the current entry carries a value (false for nodes that
    /// exist only to hold flags).
    pub fn has_value(&self) -> bool {
        self.cur.as_ref().is_some_and(|e| e.has_value)
    }

    /// Advance to the next entry in range. A no-op once invalid.
    pub fn next(&mut self) -> Result<()> {
        if let Some(cur) = self.cur.take() {
            self.cur = if self.reverse {
                self.step_rev(Some(cur.key))
            } else {
                self.step_fwd(successor(&cur.key))
            };
        }
        Ok(())
    }
}
