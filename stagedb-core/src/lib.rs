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

//! StageDB Core
//!
//! Fundamental types shared by every StageDB buffer engine:
//!
//! - **Error taxonomy**: the closed set of error kinds a staging buffer
//!   can surface to its owning transaction ([`error::StageError`])
//! - **Key flags**: the per-key metadata bit set and its mutation
//!   vocabulary ([`flags::KeyFlags`], [`flags::FlagsOp`]), including the
//!   single authoritative persistence table
//! - **Key bounds**: the hard key-length limit and ordering helpers
//!   ([`key`])
//!
//! The buffer itself lives in `stagedb-storage`; this crate stays free of
//! engine concerns so both index engines depend on exactly the same
//! vocabulary.

pub mod error;
pub mod flags;
pub mod key;

pub use error::{Result, StageError};
pub use flags::{FlagsOp, KeyFlags};
pub use key::MAX_KEY_SIZE;
