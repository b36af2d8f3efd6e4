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

//! Key bounds and ordering helpers
//!
//! Keys are non-empty byte strings ordered lexicographically on unsigned
//! bytes, bounded by [`MAX_KEY_SIZE`].

use crate::error::{Result, StageError};

/// Hard upper bound on key length in bytes.
pub const MAX_KEY_SIZE: usize = u16::MAX as usize;

/// Reject keys above [`MAX_KEY_SIZE`] with a [`StageError::KeyTooLarge`]
/// carrying the offending size.
#[inline]
pub fn check_key_size(key: &[u8]) -> Result<()> {
    if key.len() > MAX_KEY_SIZE {
        return Err(StageError::KeyTooLarge { size: key.len() });
    }
    Ok(())
}

/// The smallest key strictly greater than `key`.
///
/// Appending a zero byte is the immediate lexicographic successor, which
/// is what key-positioned iterators re-seek from after yielding `key`.
#[inline]
pub fn successor(key: &[u8]) -> Vec<u8> {
    let mut next = Vec::with_capacity(key.len() + 1);
    next.extend_from_slice(key);
    next.push(0);
    next
}
