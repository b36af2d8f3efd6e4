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

//! StageDB Storage
//!
//! The transactional in-memory staging buffer a distributed-KV client
//! uses to collect a transaction's writes before commit.
//!
//! # Architecture
//!
//! | Piece | Module | Role |
//! |-------|--------|------|
//! | Value arena + version log | [`arena`] | bump-allocated payloads, per-key version chains |
//! | Index engines | [`index`] | ordered key → slot mapping (balanced tree or adaptive radix trie) |
//! | Stage stack | [`staging`] | nested savepoints over one global undo log |
//! | Snapshots | [`snapshot`] | reads pinned below the bottom open stage |
//! | Façade | [`buffer`] | [`MemBuffer`]: limits, flags, cache, memory hook |
//!
//! # Example
//!
//! ```
//! use stagedb_storage::TreeMemBuffer;
//!
//! let buf = TreeMemBuffer::new();
//! buf.set(b"k", b"v1").unwrap();
//!
//! let h = buf.staging();
//! buf.set(b"k", b"v2").unwrap();
//! assert_eq!(buf.get(b"k").unwrap(), b"v2");
//! buf.cleanup(h); // roll the stage back
//! assert_eq!(buf.get(b"k").unwrap(), b"v1");
//! ```
//!
//! Both engines implement the same contract; `ArtMemBuffer` behaves
//! identically and the test suite runs every scenario against both.

pub mod arena;
pub mod buffer;
pub mod index;
pub mod iter;
pub mod snapshot;
pub mod staging;

pub use buffer::{ArtMemBuffer, MemBuffer, MemoryHook, TreeMemBuffer};
pub use index::art::ArtIndex;
pub use index::tree::TreeIndex;
pub use index::{KeyIndex, KeySlot, SlotId};
pub use iter::BufferIter;
pub use snapshot::{BatchedSnapshotIter, Snapshot, SnapshotGetter, SnapshotIter};
pub use staging::{Checkpoint, StageHandle};

pub use stagedb_core::error::{Result, StageError};
pub use stagedb_core::flags::{FlagsOp, KeyFlags};
pub use stagedb_core::key::MAX_KEY_SIZE;
