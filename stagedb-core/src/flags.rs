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

//! Per-key metadata flags
//!
//! Every key node in the buffer carries a [`KeyFlags`] word next to its
//! version chain. Flags fall into two persistence classes:
//!
//! | Bit | Persistent across stage rollback |
//! |-----|----------------------------------|
//! | `KEY_LOCKED` | yes |
//! | `ASSERT_EXIST` | yes |
//! | `ASSERT_NOT_EXIST` | yes |
//! | `PRESUME_KEY_NOT_EXISTS` | no |
//! | `NEED_CONSTRAINT_CHECK_IN_PREWRITE` | no |
//! | `PREWRITE_ONLY` | no |
//! | `TOMBSTONE` | no |
//!
//! [`KeyFlags::PERSISTENT_MASK`] is the only source of truth for this
//! classification; nothing elsewhere infers persistence from a flag's
//! name. A persistent bit set inside a stage survives that stage's
//! rollback; non-persistent bits revert with the values.
//!
//! Mutation goes through the closed [`FlagsOp`] vocabulary so call sites
//! cannot invent bit combinations the prewrite path does not understand.

use std::fmt;
use std::ops::{BitAnd, BitOr};

use serde::{Deserialize, Serialize};

/// Per-key metadata flag word.
#[derive(Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyFlags(u16);

impl KeyFlags {
    /// The key is locked by the current transaction.
    pub const KEY_LOCKED: KeyFlags = KeyFlags(1 << 0);
    /// The key is presumed absent; prewrite must verify non-existence.
    pub const PRESUME_KEY_NOT_EXISTS: KeyFlags = KeyFlags(1 << 1);
    /// Prewrite must run a constraint check for this key.
    pub const NEED_CONSTRAINT_CHECK_IN_PREWRITE: KeyFlags = KeyFlags(1 << 2);
    /// The mutation is sent in prewrite only, never committed separately.
    pub const PREWRITE_ONLY: KeyFlags = KeyFlags(1 << 3);
    /// The key is asserted to exist on the server.
    pub const ASSERT_EXIST: KeyFlags = KeyFlags(1 << 4);
    /// The key is asserted to not exist on the server.
    pub const ASSERT_NOT_EXIST: KeyFlags = KeyFlags(1 << 5);
    /// The current value is a deletion marker.
    pub const TOMBSTONE: KeyFlags = KeyFlags(1 << 6);

    /// Bits that survive a stage rollback. This table is authoritative.
    pub const PERSISTENT_MASK: KeyFlags =
        KeyFlags(Self::KEY_LOCKED.0 | Self::ASSERT_EXIST.0 | Self::ASSERT_NOT_EXIST.0);

    #[inline]
    pub const fn empty() -> Self {
        KeyFlags(0)
    }

    #[inline]
    pub const fn bits(self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn contains(self, other: KeyFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    #[must_use]
    pub const fn with(self, other: KeyFlags) -> Self {
        KeyFlags(self.0 | other.0)
    }

    #[inline]
    #[must_use]
    pub const fn without(self, other: KeyFlags) -> Self {
        KeyFlags(self.0 & !other.0)
    }

    /// The persistent subset of this flag word.
    #[inline]
    pub const fn persistent(self) -> Self {
        KeyFlags(self.0 & Self::PERSISTENT_MASK.0)
    }

    #[inline]
    pub const fn has_locked(self) -> bool {
        self.contains(Self::KEY_LOCKED)
    }

    #[inline]
    pub const fn has_presume_key_not_exists(self) -> bool {
        self.contains(Self::PRESUME_KEY_NOT_EXISTS)
    }

    #[inline]
    pub const fn has_need_constraint_check_in_prewrite(self) -> bool {
        self.contains(Self::NEED_CONSTRAINT_CHECK_IN_PREWRITE)
    }

    #[inline]
    pub const fn has_prewrite_only(self) -> bool {
        self.contains(Self::PREWRITE_ONLY)
    }

    #[inline]
    pub const fn has_assert_exist(self) -> bool {
        self.contains(Self::ASSERT_EXIST)
    }

    #[inline]
    pub const fn has_assert_not_exist(self) -> bool {
        self.contains(Self::ASSERT_NOT_EXIST)
    }

    #[inline]
    pub const fn has_tombstone(self) -> bool {
        self.contains(Self::TOMBSTONE)
    }

    /// Apply one mutation op and return the resulting flag word.
    #[must_use]
    pub fn apply(self, op: FlagsOp) -> Self {
        match op {
            FlagsOp::SetKeyLocked => self.with(Self::KEY_LOCKED),
            FlagsOp::DelKeyLocked => self.without(Self::KEY_LOCKED),
            FlagsOp::SetPresumeKeyNotExists => self.with(Self::PRESUME_KEY_NOT_EXISTS),
            FlagsOp::DelPresumeKeyNotExists => self.without(Self::PRESUME_KEY_NOT_EXISTS),
            FlagsOp::SetNeedConstraintCheckInPrewrite => {
                self.with(Self::NEED_CONSTRAINT_CHECK_IN_PREWRITE)
            }
            FlagsOp::DelNeedConstraintCheckInPrewrite => {
                self.without(Self::NEED_CONSTRAINT_CHECK_IN_PREWRITE)
            }
            FlagsOp::SetPrewriteOnly => self.with(Self::PREWRITE_ONLY),
            // The two assertions are mutually exclusive.
            FlagsOp::SetAssertExist => self.without(Self::ASSERT_NOT_EXIST).with(Self::ASSERT_EXIST),
            FlagsOp::SetAssertNotExist => {
                self.without(Self::ASSERT_EXIST).with(Self::ASSERT_NOT_EXIST)
            }
        }
    }
}

impl BitOr for KeyFlags {
    type Output = KeyFlags;

    #[inline]
    fn bitor(self, rhs: KeyFlags) -> KeyFlags {
        KeyFlags(self.0 | rhs.0)
    }
}

impl BitAnd for KeyFlags {
    type Output = KeyFlags;

    #[inline]
    fn bitand(self, rhs: KeyFlags) -> KeyFlags {
        KeyFlags(self.0 & rhs.0)
    }
}

impl fmt::Debug for KeyFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyFlags({:#06x})", self.0)
    }
}

/// The closed vocabulary of flag mutations.
///
/// New flags must be added here together with a row in the persistence
/// table above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlagsOp {
    SetKeyLocked,
    DelKeyLocked,
    SetPresumeKeyNotExists,
    DelPresumeKeyNotExists,
    SetNeedConstraintCheckInPrewrite,
    DelNeedConstraintCheckInPrewrite,
    SetPrewriteOnly,
    SetAssertExist,
    SetAssertNotExist,
}
