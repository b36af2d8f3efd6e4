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

//! Stage frames, undo records and checkpoints
//!
//! The undo log is one global append-only vector shared by every stage;
//! a frame only remembers where its suffix starts. Releasing a stage
//! pops the frame and leaves the entries in place, which hands them to
//! the enclosing stage in exactly the order reverse replay needs — and
//! keeps them available for checkpoint revert after the last stage is
//! gone.

use stagedb_core::flags::KeyFlags;

use crate::index::SlotId;

/// Stage handles are 1-based stack depths. `0` is reserved as "no
/// handle" and ignored by release/cleanup.
pub type StageHandle = usize;

/// One open savepoint frame.
pub(crate) struct StageFrame {
    /// Unique, never-reused id; snapshots pin it to detect their stage
    /// disappearing.
    pub epoch: u64,
    /// Undo-log length when the stage opened.
    pub undo_start: usize,
    /// Version-cell count when the stage opened.
    pub cell_start: u32,
    /// Arena length when the stage opened.
    pub arena_start: usize,
}

/// Pre-mutation state of one key, captured once per mutation.
pub(crate) struct UndoEntry {
    pub key: Box<[u8]>,
    pub slot: SlotId,
    pub prev_head: u32,
    pub prev_flags: KeyFlags,
    /// The mutation materialized this key's node.
    pub created: bool,
}

/// Opaque position marker enabling bulk revert.
///
/// Valid while the owning buffer's stage stack is at the same or a
/// shallower depth than when the checkpoint was taken, until the next
/// `reset`.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub(crate) undo_len: usize,
    pub(crate) cell_len: u32,
    pub(crate) arena_len: usize,
    pub(crate) depth: usize,
    pub(crate) epoch: u64,
}
