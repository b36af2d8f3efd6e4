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

//! Error types for StageDB
//!
//! Size and not-found errors are returned to the caller; staging misuse
//! (releasing or cleaning up a handle that is not the top of the stack)
//! indicates corrupt transaction control flow and panics instead of
//! surfacing here.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    #[error("key not found")]
    NotFound,

    #[error("key too large: {size} bytes exceeds the {} byte bound", crate::key::MAX_KEY_SIZE)]
    KeyTooLarge { size: usize },

    #[error("entry too large: {size} bytes exceeds the {limit} byte entry limit")]
    EntryTooLarge { limit: u64, size: u64 },

    #[error("buffer full: projected size {size} bytes exceeds the {limit} byte buffer limit")]
    BufferFull { limit: u64, size: u64 },

    #[error("snapshot invalidated: the pinning stage was released or cleaned up")]
    SnapshotInvalidated,
}

pub type Result<T> = std::result::Result<T, StageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_too_large_reports_size() {
        let err = StageError::KeyTooLarge { size: 70_000 };
        let msg = err.to_string();
        assert!(msg.contains("70000"));
        assert!(msg.contains("65535"));
    }

    #[test]
    fn test_error_equality() {
        assert_eq!(StageError::NotFound, StageError::NotFound);
        assert_ne!(
            StageError::EntryTooLarge { limit: 10, size: 11 },
            StageError::BufferFull { limit: 10, size: 11 }
        );
    }
}
