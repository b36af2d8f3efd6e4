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

//! Ordered key index contract
//!
//! Two interchangeable engines implement [`KeyIndex`]: a balanced
//! ordered tree ([`tree::TreeIndex`]) and an adaptive radix trie
//! ([`art::ArtIndex`]). The façade is generic over the trait, and the
//! behavior test suite runs against both.
//!
//! The index maps keys to [`SlotId`]s only; the per-key state (version
//! chain head + flag word) lives in the shared [`SlotStore`]. Slot ids
//! stay stable across tree rotations and trie node reshaping, which is
//! what lets undo records and the lookup cache address keys without
//! holding engine-internal pointers.

pub mod art;
pub mod tree;

use stagedb_core::flags::KeyFlags;

use crate::arena::NULL_CELL;

/// Stable handle for one key's slot in the [`SlotStore`].
pub type SlotId = u32;

/// Per-key state: head of the version chain (or [`NULL_CELL`] for a
/// flags-only node) and the flag word.
#[derive(Debug, Clone, Copy)]
pub struct KeySlot {
    pub head: u32,
    pub flags: KeyFlags,
}

impl KeySlot {
    #[inline]
    pub fn has_value(&self) -> bool {
        self.head != NULL_CELL
    }
}

/// Contract shared by both index engines.
///
/// Keys are non-empty byte strings ordered lexicographically on unsigned
/// bytes. `insert` requires the key to be absent; `remove` exists only
/// for undo replay (deleting a node that a rolled-back stage created).
pub trait KeyIndex: Default {
    /// Point lookup.
    fn lookup(&self, key: &[u8]) -> Option<SlotId>;

    /// Insert a key known to be absent.
    fn insert(&mut self, key: &[u8], slot: SlotId);

    /// Remove a key, returning its slot if it was present.
    fn remove(&mut self, key: &[u8]) -> Option<SlotId>;

    /// First key `>= lower` (an empty `lower` positions at the smallest
    /// key), or `None` past the end.
    fn seek(&self, lower: &[u8]) -> Option<(&[u8], SlotId)>;

    /// Greatest key strictly `< upper`; `None` as the bound means the
    /// largest key. Returns `None` when nothing precedes the bound.
    fn seek_rev(&self, upper: Option<&[u8]>) -> Option<(&[u8], SlotId)>;

    /// Number of keys present (flags-only nodes included).
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every key. Capacity may be retained.
    fn clear(&mut self);

    /// Approximate allocated footprint in bytes. Must be zero for a
    /// freshly created, never-written index.
    fn mem_usage(&self) -> usize;
}

/// Slab of key slots shared by both engines, recycled through a free
/// list. Slots are only released by undo replay, which also removes
/// every record addressing them, so no generation tags are needed.
#[derive(Default)]
pub struct SlotStore {
    slots: Vec<KeySlot>,
    free: Vec<SlotId>,
}

impl SlotStore {
    pub fn alloc(&mut self) -> SlotId {
        let fresh = KeySlot {
            head: NULL_CELL,
            flags: KeyFlags::empty(),
        };
        match self.free.pop() {
            Some(id) => {
                self.slots[id as usize] = fresh;
                id
            }
            None => {
                self.slots.push(fresh);
                (self.slots.len() - 1) as SlotId
            }
        }
    }

    #[inline]
    pub fn get(&self, id: SlotId) -> KeySlot {
        self.slots[id as usize]
    }

    #[inline]
    pub fn get_mut(&mut self, id: SlotId) -> &mut KeySlot {
        &mut self.slots[id as usize]
    }

    #[inline]
    pub fn release(&mut self, id: SlotId) {
        self.free.push(id);
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
    }

    pub fn mem(&self) -> usize {
        // free-list bookkeeping is not part of the footprint the
        // memory hook reports
        self.slots.capacity() * std::mem::size_of::<KeySlot>()
    }
}
