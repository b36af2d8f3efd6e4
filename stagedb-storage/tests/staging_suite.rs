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

//! Behavior suite for the staging buffer, run against both index
//! engines through the same generic checks.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use byteorder::{BigEndian, ByteOrder};
use rand::prelude::*;

use stagedb_storage::{ArtMemBuffer, FlagsOp, KeyIndex, MemBuffer, StageError, TreeMemBuffer};

fn key4(i: u32) -> [u8; 4] {
    let mut buf = [0u8; 4];
    BigEndian::write_u32(&mut buf, i);
    buf
}

/// Open a stage, fill `[start, end)` with `value = key + base`, return
/// the handle.
fn derive_and_fill<I: KeyIndex>(buf: &MemBuffer<I>, start: u32, end: u32, base: u32) -> usize {
    let h = buf.staging();
    for i in start..end {
        buf.set(&key4(i), &key4(i + base)).unwrap();
    }
    h
}

fn fill<I: KeyIndex>(buf: &MemBuffer<I>, cnt: u32) {
    let h = derive_and_fill(buf, 0, cnt, 0);
    buf.release(h);
}

fn assert_panics(f: impl FnOnce()) {
    assert!(catch_unwind(AssertUnwindSafe(f)).is_err());
}

// -- round trip ---------------------------------------------------------

fn check_round_trip<I: KeyIndex>(buf: MemBuffer<I>) {
    const CNT: u32 = 10_000;
    fill(&buf, CNT);

    for i in 0..CNT {
        assert_eq!(buf.get(&key4(i)).unwrap(), key4(i));
    }

    let mut it = buf.iter(None, None);
    let mut i = 0u32;
    while it.valid() {
        assert_eq!(it.key(), key4(i));
        assert_eq!(it.value(), key4(i));
        i += 1;
        it.next().unwrap();
    }
    assert_eq!(i, CNT);

    let mut it = buf.iter_reverse(None, None);
    while it.valid() {
        i -= 1;
        assert_eq!(it.key(), key4(i));
        assert_eq!(it.value(), key4(i));
        it.next().unwrap();
    }
    assert_eq!(i, 0);

    const BOUND: u32 = 400;
    let mut it = buf.iter(None, Some(&key4(BOUND)[..]));
    while it.valid() {
        assert_eq!(it.key(), key4(i));
        i += 1;
        it.next().unwrap();
    }
    assert_eq!(i, BOUND);

    i = CNT;
    let mut it = buf.iter_reverse(None, Some(&key4(BOUND)[..]));
    while it.valid() {
        i -= 1;
        assert_eq!(it.key(), key4(i));
        it.next().unwrap();
    }
    assert_eq!(i, BOUND);
}

#[test]
fn test_round_trip() {
    check_round_trip(TreeMemBuffer::new());
    check_round_trip(ArtMemBuffer::new());
}

// -- discard / flush ----------------------------------------------------

fn check_discard<I: KeyIndex>(buf: MemBuffer<I>) {
    const CNT: u32 = 10_000;
    let base = derive_and_fill(&buf, 0, CNT, 0);
    let sz = buf.size();

    buf.cleanup(derive_and_fill(&buf, 0, CNT, 1));
    assert_eq!(buf.len(), CNT as usize);
    assert_eq!(buf.size(), sz);

    for i in 0..CNT {
        assert_eq!(buf.get(&key4(i)).unwrap(), key4(i));
    }
    let mut it = buf.iter(None, None);
    let mut i = 0u32;
    while it.valid() {
        assert_eq!(it.key(), key4(i));
        i += 1;
        it.next().unwrap();
    }
    assert_eq!(i, CNT);

    buf.cleanup(base);
    for i in 0..CNT {
        assert!(buf.get(&key4(i)).is_err());
    }
    assert!(!buf.iter(None, None).valid());
    assert_eq!(buf.len(), 0);
    assert_eq!(buf.size(), 0);
}

#[test]
fn test_discard() {
    check_discard(TreeMemBuffer::new());
    check_discard(ArtMemBuffer::new());
}

fn check_flush_overwrite<I: KeyIndex>(buf: MemBuffer<I>) {
    const CNT: u32 = 10_000;
    buf.release(derive_and_fill(&buf, 0, CNT, 0));
    let sz = buf.size();
    buf.release(derive_and_fill(&buf, 0, CNT, 1));

    assert_eq!(buf.len(), CNT as usize);
    assert_eq!(buf.size(), sz);

    for i in 0..CNT {
        assert_eq!(buf.get(&key4(i)).unwrap(), key4(i + 1));
    }
    let mut it = buf.iter_reverse(None, None);
    let mut i = CNT;
    while it.valid() {
        i -= 1;
        assert_eq!(it.key(), key4(i));
        assert_eq!(it.value(), key4(i + 1));
        it.next().unwrap();
    }
    assert_eq!(i, 0);
}

#[test]
fn test_flush_overwrite() {
    check_flush_overwrite(TreeMemBuffer::new());
    check_flush_overwrite(ArtMemBuffer::new());
}

fn check_complex_update<I: KeyIndex>(buf: MemBuffer<I>) {
    const KEEP: u32 = 3000;
    const OVERWRITE: u32 = 6000;
    const INSERT: u32 = 9000;

    buf.release(derive_and_fill(&buf, 0, OVERWRITE, 0));
    assert_eq!(buf.len(), OVERWRITE as usize);
    buf.release(derive_and_fill(&buf, KEEP, INSERT, 1));
    assert_eq!(buf.len(), INSERT as usize);

    for i in 0..INSERT {
        let expect = if i >= KEEP { i + 1 } else { i };
        assert_eq!(buf.get(&key4(i)).unwrap(), key4(expect));
    }
}

#[test]
fn test_complex_update() {
    check_complex_update(TreeMemBuffer::new());
    check_complex_update(ArtMemBuffer::new());
}

// -- nested stages ------------------------------------------------------

fn check_nested_stages<I: KeyIndex>(buf: MemBuffer<I>) {
    let h0 = derive_and_fill(&buf, 0, 200, 0);
    let h1 = derive_and_fill(&buf, 0, 100, 1);
    let h2 = derive_and_fill(&buf, 50, 150, 2);
    let h3 = derive_and_fill(&buf, 100, 120, 3);
    let h4 = derive_and_fill(&buf, 0, 150, 4);
    buf.cleanup(h4); // discard (0..150 -> k+4)
    buf.release(h3); // flush (100..120 -> k+3)
    buf.cleanup(h2); // discard (100..120 -> k+3) and (50..150 -> k+2)
    buf.release(h1); // flush (0..100 -> k+1)
    buf.release(h0); // flush into the committed state

    for i in 0..200 {
        let expect = if i < 100 { i + 1 } else { i };
        assert_eq!(buf.get(&key4(i)).unwrap(), key4(expect));
    }

    let mut it = buf.iter(None, None);
    let mut i = 0u32;
    while it.valid() {
        let expect = if i < 100 { i + 1 } else { i };
        assert_eq!(it.key(), key4(i));
        assert_eq!(it.value(), key4(expect));
        i += 1;
        it.next().unwrap();
    }
    assert_eq!(i, 200);

    let mut it = buf.iter_reverse(None, None);
    while it.valid() {
        i -= 1;
        let expect = if i < 100 { i + 1 } else { i };
        assert_eq!(it.key(), key4(i));
        assert_eq!(it.value(), key4(expect));
        it.next().unwrap();
    }
    assert_eq!(i, 0);
}

#[test]
fn test_nested_stages() {
    check_nested_stages(TreeMemBuffer::new());
    check_nested_stages(ArtMemBuffer::new());
}

// -- overwrite preserves size -------------------------------------------

fn check_overwrite_preserves_size<I: KeyIndex>(buf: MemBuffer<I>) {
    const CNT: u32 = 10_000;
    fill(&buf, CNT);
    let sz = buf.size();

    for i in (0..CNT).step_by(3) {
        buf.set(&key4(i), &key4(i * 10)).unwrap();
    }
    assert_eq!(buf.len(), CNT as usize);
    assert_eq!(buf.size(), sz);

    for i in 0..CNT {
        let expect = if i % 3 == 0 { i * 10 } else { i };
        assert_eq!(buf.get(&key4(i)).unwrap(), key4(expect));
    }
}

#[test]
fn test_overwrite_preserves_size() {
    check_overwrite_preserves_size(TreeMemBuffer::new());
    check_overwrite_preserves_size(ArtMemBuffer::new());
}

// -- reset --------------------------------------------------------------

fn check_reset<I: KeyIndex>(buf: MemBuffer<I>) {
    fill(&buf, 1000);
    buf.reset();
    assert_eq!(buf.get(&key4(0)), Err(StageError::NotFound));
    assert_eq!(buf.get_flags(&key4(0)), Err(StageError::NotFound));
    assert!(!buf.iter(None, None).valid());
    assert_eq!(buf.len(), 0);
    assert_eq!(buf.size(), 0);
    assert!(!buf.dirty());
}

#[test]
fn test_reset() {
    check_reset(TreeMemBuffer::new());
    check_reset(ArtMemBuffer::new());
}

// -- inspect stage ------------------------------------------------------

fn check_inspect_stage<I: KeyIndex>(buf: MemBuffer<I>) {
    let h1 = derive_and_fill(&buf, 0, 1000, 0);
    let h2 = derive_and_fill(&buf, 500, 1000, 1);
    for i in 500..1500u32 {
        buf.set(&key4(i), &key4(i + 2)).unwrap();
    }
    let h3 = derive_and_fill(&buf, 1000, 2000, 3);

    buf.inspect_stage(h3, |key, _, value| {
        let k = BigEndian::read_u32(key);
        let v = BigEndian::read_u32(value);
        assert!((1000..2000).contains(&k));
        assert_eq!(v - k, 3);
    });

    buf.inspect_stage(h2, |key, _, value| {
        let k = BigEndian::read_u32(key);
        let v = BigEndian::read_u32(value);
        assert!((500..2000).contains(&k));
        if k < 1000 {
            assert_eq!(v - k, 2);
        } else {
            assert_eq!(v - k, 3);
        }
    });

    buf.cleanup(h3);
    buf.release(h2);

    buf.inspect_stage(h1, |key, _, value| {
        let k = BigEndian::read_u32(key);
        let v = BigEndian::read_u32(value);
        assert!(k < 1500);
        if k < 500 {
            assert_eq!(v, k);
        } else {
            assert_eq!(v - k, 2);
        }
    });

    buf.release(h1);
}

#[test]
fn test_inspect_stage() {
    check_inspect_stage(TreeMemBuffer::new());
    check_inspect_stage(ArtMemBuffer::new());
}

// -- flags --------------------------------------------------------------

fn check_flags<I: KeyIndex>(buf: MemBuffer<I>, reverse: bool) {
    const CNT: u32 = 10_000;
    let h = buf.staging();
    for i in 0..CNT {
        if i % 2 == 0 {
            buf.set_with_flags(
                &key4(i),
                &key4(i),
                &[FlagsOp::SetPresumeKeyNotExists, FlagsOp::SetKeyLocked],
            )
            .unwrap();
        } else {
            buf.set_with_flags(&key4(i), &key4(i), &[FlagsOp::SetPresumeKeyNotExists])
                .unwrap();
        }
    }
    buf.cleanup(h);

    for i in 0..CNT {
        assert!(buf.get(&key4(i)).is_err());
        let flags = buf.get_flags(&key4(i));
        if i % 2 == 0 {
            let flags = flags.unwrap();
            assert!(flags.has_locked());
            assert!(!flags.has_presume_key_not_exists());
        } else {
            assert!(flags.is_err());
        }
    }

    // every value was rolled back; only flags-only nodes remain
    assert_eq!(buf.len(), 0);
    assert_eq!(buf.size(), 0);
    assert!(!buf.iter(None, None).valid());

    let mut it = if reverse {
        buf.iter_reverse_with_flags(None, None)
    } else {
        buf.iter_with_flags(None, None)
    };
    let mut seen = 0u32;
    while it.valid() {
        let k = BigEndian::read_u32(it.key());
        assert_eq!(k % 2, 0);
        assert!(!it.has_value());
        assert!(it.flags().has_locked());
        seen += 1;
        it.next().unwrap();
    }
    assert_eq!(seen, CNT / 2);

    for i in 0..CNT {
        buf.update_flags(&key4(i), &[FlagsOp::DelKeyLocked]);
    }
    for i in 0..CNT {
        assert!(buf.get(&key4(i)).is_err());
        // update_flags materialized the missing nodes
        let flags = buf.get_flags(&key4(i)).unwrap();
        assert!(!flags.has_locked());
    }
}

#[test]
fn test_flags() {
    check_flags(TreeMemBuffer::new(), false);
    check_flags(ArtMemBuffer::new(), false);
    check_flags(TreeMemBuffer::new(), true);
    check_flags(ArtMemBuffer::new(), true);
}

fn check_cleanup_keeps_persistent_flags<I: KeyIndex>(buf: MemBuffer<I>) {
    let h = buf.staging();
    buf.set_with_flags(&[1], &[1], &[FlagsOp::SetKeyLocked]).unwrap();
    buf.set_with_flags(&[2], &[2], &[FlagsOp::SetPresumeKeyNotExists])
        .unwrap();
    buf.set_with_flags(
        &[3],
        &[3],
        &[FlagsOp::SetKeyLocked, FlagsOp::SetPresumeKeyNotExists],
    )
    .unwrap();
    buf.cleanup(h);

    for key in [[1u8], [2], [3]] {
        assert!(buf.get(&key).is_err());
    }

    let flags = buf.get_flags(&[1]).unwrap();
    assert!(flags.has_locked());
    assert!(buf.get_flags(&[2]).is_err());
    let flags = buf.get_flags(&[3]).unwrap();
    assert!(flags.has_locked());
    assert!(!flags.has_presume_key_not_exists());
}

#[test]
fn test_cleanup_keeps_persistent_flags() {
    check_cleanup_keeps_persistent_flags(TreeMemBuffer::new());
    check_cleanup_keeps_persistent_flags(ArtMemBuffer::new());
}

// -- staging ------------------------------------------------------------

fn check_staging<I: KeyIndex>(buf: MemBuffer<I>) {
    buf.set(b"x", &[0; 2]).unwrap();

    let h1 = buf.staging();
    buf.set(b"x", &[0; 3]).unwrap();

    let h2 = buf.staging();
    buf.set(b"yz", &[0; 1]).unwrap();

    assert_eq!(buf.get(b"x").unwrap().len(), 3);
    buf.release(h2);
    assert_eq!(buf.get(b"yz").unwrap().len(), 1);
    buf.cleanup(h1);
    assert_eq!(buf.get(b"x").unwrap().len(), 2);
    assert!(buf.get(b"yz").is_err());
}

#[test]
fn test_staging() {
    check_staging(TreeMemBuffer::new());
    check_staging(ArtMemBuffer::new());
}

fn check_multi_level_staging<I: KeyIndex>(buf: MemBuffer<I>) {
    let key = [0u8];
    for i in 0..100usize {
        assert_eq!(buf.staging(), i + 1);
        buf.set(&key, &[i as u8]).unwrap();
        assert_eq!(buf.get(&key).unwrap(), vec![i as u8]);
    }
    for i in (0..100usize).rev() {
        let expect = if i % 2 == 1 {
            buf.cleanup(i + 1);
            i - 1
        } else {
            buf.release(i + 1);
            i
        };
        assert_eq!(buf.get(&key).unwrap(), vec![expect as u8]);
    }
}

#[test]
fn test_multi_level_staging() {
    check_multi_level_staging(TreeMemBuffer::new());
    check_multi_level_staging(ArtMemBuffer::new());
}

fn check_invalid_staging_handle<I: KeyIndex>(buf: MemBuffer<I>) {
    // release only accepts the top handle; 0 is ignored
    let h1 = buf.staging();
    assert!(h1 > 0);
    let h2 = buf.staging();
    assert!(h2 > 0);
    assert_panics(|| buf.release(h2 + 1));
    assert_panics(|| buf.release(h2 - 1));
    buf.release(0);
    buf.release(h2);
    buf.release(0);
    buf.release(h1);
    buf.release(0);

    // cleanup tolerates handles above the top, not below
    let h1 = buf.staging();
    let h2 = buf.staging();
    buf.cleanup(h2 + 1);
    assert_panics(|| buf.cleanup(h2 - 1));
    buf.cleanup(0);
    buf.cleanup(h2);
    buf.cleanup(0);
    buf.cleanup(h1);
    buf.cleanup(0);
}

#[test]
fn test_invalid_staging_handle() {
    check_invalid_staging_handle(TreeMemBuffer::new());
    check_invalid_staging_handle(ArtMemBuffer::new());
}

// -- checkpoints --------------------------------------------------------

fn check_checkpoint<I: KeyIndex>(buf: MemBuffer<I>) {
    let cp1 = buf.checkpoint();

    buf.set(b"x", b"x").unwrap();

    let cp2 = buf.checkpoint();
    buf.set(b"y", b"y").unwrap();

    let h = buf.staging();
    buf.set(b"z", b"z").unwrap();
    buf.release(h);

    for k in [b"x", b"y", b"z"] {
        assert_eq!(buf.get(k).unwrap(), k.to_vec());
    }

    buf.revert_to_checkpoint(&cp2);
    assert_eq!(buf.get(b"x").unwrap(), b"x");
    for k in [b"y", b"z"] {
        assert!(buf.get(k).is_err());
    }
    assert_eq!(buf.len(), 1);

    buf.revert_to_checkpoint(&cp1);
    assert!(buf.get(b"x").is_err());
    assert_eq!(buf.len(), 0);
    assert_eq!(buf.size(), 0);
    assert!(!buf.dirty());
}

#[test]
fn test_checkpoint() {
    check_checkpoint(TreeMemBuffer::new());
    check_checkpoint(ArtMemBuffer::new());
}

fn check_checkpoint_restores_flags<I: KeyIndex>(buf: MemBuffer<I>) {
    buf.set_with_flags(b"k", b"v", &[FlagsOp::SetKeyLocked]).unwrap();
    let cp = buf.checkpoint();
    buf.update_flags(b"k", &[FlagsOp::DelKeyLocked]);
    buf.update_flags(b"fresh", &[FlagsOp::SetKeyLocked]);
    buf.revert_to_checkpoint(&cp);
    // exact restore: the persistent bit comes back, the new node goes
    assert!(buf.get_flags(b"k").unwrap().has_locked());
    assert!(buf.get_flags(b"fresh").is_err());
}

#[test]
fn test_checkpoint_restores_flags() {
    check_checkpoint_restores_flags(TreeMemBuffer::new());
    check_checkpoint_restores_flags(ArtMemBuffer::new());
}

// -- size limits --------------------------------------------------------

fn check_buffer_limit<I: KeyIndex>(buf: MemBuffer<I>) {
    buf.set_entry_size_limit(500, 1000);

    assert!(buf.set(b"x", &[0; 500]).is_err()); // entry limit
    assert!(buf.set(b"x", &[0; 499]).is_ok());
    assert!(buf.set(b"yz", &[0; 499]).is_err()); // buffer limit

    assert!(buf.delete(&[0; 499]).is_ok());
    assert!(buf.delete(&[0; 500]).is_err());
}

#[test]
fn test_buffer_limit() {
    check_buffer_limit(TreeMemBuffer::new());
    check_buffer_limit(ArtMemBuffer::new());
}

// -- value history ------------------------------------------------------

fn check_select_value_history<I: KeyIndex>(buf: MemBuffer<I>) {
    buf.set(&[1], &[1]).unwrap();
    let h = buf.staging();
    buf.set(&[1], &[1, 1]).unwrap();

    let val = buf.select_value_history(&[1], |v| v == [1]).unwrap();
    assert_eq!(val, Some(vec![1]));
    let val = buf.select_value_history(&[1], |v| v == [1, 1]).unwrap();
    assert_eq!(val, Some(vec![1, 1]));
    let val = buf.select_value_history(&[1], |v| v == [1, 1, 1]).unwrap();
    assert_eq!(val, None);
    assert!(buf.select_value_history(&[2], |_| false).is_err());

    buf.cleanup(h);

    let val = buf.select_value_history(&[1], |v| v == [1]).unwrap();
    assert_eq!(val, Some(vec![1]));
    let val = buf.select_value_history(&[1], |v| v == [1, 1]).unwrap();
    assert_eq!(val, None);
}

#[test]
fn test_select_value_history() {
    check_select_value_history(TreeMemBuffer::new());
    check_select_value_history(ArtMemBuffer::new());
}

// -- empty and inverted ranges ------------------------------------------

fn check_iter_no_result<I: KeyIndex>(buf: MemBuffer<I>) {
    buf.set(&[1, 1], &[1, 1]).unwrap();

    let check = |lower: &[u8], upper: &[u8]| {
        assert!(!buf.iter(Some(lower), Some(upper)).valid());
        assert!(!buf.iter_reverse(Some(upper), Some(lower)).valid());
    };

    // bounds seek to the same position
    check(&[1, 1], &[1, 1]);
    check(&[1, 0, 0], &[1, 0, 1]);
    // inverted range
    check(&[1, 0, 1], &[1, 0, 0]);
}

#[test]
fn test_iter_no_result() {
    check_iter_no_result(TreeMemBuffer::new());
    check_iter_no_result(ArtMemBuffer::new());
}

// -- iterator seek positioning ------------------------------------------

fn check_iter_seek_positions<I: KeyIndex>(buf: MemBuffer<I>) {
    let kvs: &[(&[u8], &[u8])] = &[
        (b"DATA_test_tbl_record__00001", b"lock-version"),
        (b"DATA_test_tbl_record__00001_0002", b"1"),
        (b"DATA_test_tbl_record__00001_0003", b"hello"),
        (b"DATA_test_tbl_record__00002", b"lock-version"),
        (b"DATA_test_tbl_record__00002_0002", b"2"),
        (b"DATA_test_tbl_record__00002_0003", b"hello"),
    ];
    for (k, v) in kvs {
        buf.set(k, v).unwrap();
    }

    let mut cnt = 0;
    let mut it = buf.iter(None, None);
    while it.valid() {
        cnt += 1;
        it.next().unwrap();
    }
    assert_eq!(cnt, 6);

    let it = buf.iter(Some(&b"DATA_test_tbl_record__00000"[..]), None);
    assert_eq!(it.key(), b"DATA_test_tbl_record__00001");

    // seeking past the last key yields an invalid cursor
    assert!(!buf.iter(Some(&b"DATA_test_tbl_record__00003"[..]), None).valid());
}

#[test]
fn test_iter_seek_positions() {
    check_iter_seek_positions(TreeMemBuffer::new());
    check_iter_seek_positions(ArtMemBuffer::new());
}

// -- snapshots ----------------------------------------------------------

fn check_snapshot_get_iter<I: KeyIndex>(buf: MemBuffer<I>) {
    let mut getters = Vec::new();
    let mut iters = Vec::new();
    let mut reverse_iters = Vec::new();
    for i in 0..100u8 {
        buf.set(&[0], &[i]).unwrap();
        buf.set(&[1], &[i]).unwrap();
        let visible = i.min(50);

        let getter = buf.snapshot_getter();
        assert_eq!(getter.get(&[0]).unwrap(), vec![visible]);
        getters.push(getter);

        let it = buf.snapshot_iter(None, None);
        assert_eq!(it.key(), &[0]);
        assert_eq!(it.value(), vec![visible]);
        iters.push(buf.snapshot_iter(None, None));

        let rit = buf.snapshot_iter_reverse(None, None);
        assert_eq!(rit.key(), &[1]);
        assert_eq!(rit.value(), vec![visible]);
        reverse_iters.push(buf.snapshot_iter_reverse(None, None));

        // writes after this point happen inside a stage and must be
        // bypassed by every snapshot reader
        if i == 50 {
            let _ = buf.staging();
        }
    }
    for getter in &getters {
        assert_eq!(getter.get(&[0]).unwrap(), vec![50]);
    }
    for it in &iters {
        assert_eq!(it.key(), &[0]);
        assert_eq!(it.value(), vec![50]);
    }
    for it in &reverse_iters {
        assert_eq!(it.key(), &[1]);
        assert_eq!(it.value(), vec![50]);
    }

    buf.reset();
    buf.update_flags(&[255], &[FlagsOp::SetPresumeKeyNotExists]);
    // even keys live in the committed state
    for i in 1..50u8 {
        buf.set(&[2 * i], &[2 * i]).unwrap();
    }
    let h = buf.staging();
    // every key is overwritten inside the stage
    for i in 0..100u8 {
        buf.set(&[i], &[2 * i]).unwrap();
    }

    let getter = buf.snapshot_getter();
    assert_eq!(getter.get(&[2]).unwrap(), vec![2]);
    assert!(getter.get(&[1]).is_err());
    assert!(getter.get(&[254]).is_err());
    assert!(getter.get(&[255]).is_err());

    let mut it = buf.snapshot_iter(None, None);
    for i in 1..50u8 {
        assert!(it.valid());
        assert_eq!(it.key(), &[2 * i]);
        assert_eq!(it.value(), vec![2 * i]);
        it.next().unwrap();
    }
    assert!(!it.valid());

    let mut it = buf.snapshot_iter_reverse(None, None);
    for i in (1..50u8).rev() {
        assert!(it.valid());
        assert_eq!(it.key(), &[2 * i]);
        assert_eq!(it.value(), vec![2 * i]);
        it.next().unwrap();
    }
    assert!(!it.valid());

    buf.release(h);
}

#[test]
fn test_snapshot_get_iter() {
    check_snapshot_get_iter(TreeMemBuffer::new());
    check_snapshot_get_iter(ArtMemBuffer::new());
}

fn check_snapshot_reader_with_write<I: KeyIndex>(buf: MemBuffer<I>, num: u8) {
    for i in 0..num {
        buf.set(&[0, i], &[0, i]).unwrap();
    }
    let h = buf.staging();

    let mut it = buf.snapshot_iter(Some(&[0, 0][..]), Some(&[0, 255][..]));
    assert_eq!(it.key(), &[0, 0]);

    // reshape the index underneath the live iterator: freed nodes may be
    // reused by the following inserts
    buf.set(&[0, num], &[0, num]).unwrap();
    for i in 0..num {
        buf.set(&[1, i], &[1, i]).unwrap();
    }

    for i in 0..num {
        assert!(it.valid());
        assert_eq!(it.key(), &[0, i]);
        it.next().unwrap();
    }
    assert!(!it.valid());

    buf.release(h);
}

#[test]
fn test_snapshot_reader_with_write() {
    for num in [4u8, 16, 48] {
        check_snapshot_reader_with_write(TreeMemBuffer::new(), num);
        check_snapshot_reader_with_write(ArtMemBuffer::new(), num);
    }
}

// -- batched snapshot iteration -----------------------------------------

fn check_batched_snapshot_iter<I: KeyIndex>(buf: MemBuffer<I>, num: u8, reverse: bool) {
    for i in 0..num {
        buf.set(&[0, i], &[0, i]).unwrap();
    }
    let h = buf.staging();
    let snapshot = buf.get_snapshot();

    let mut it = snapshot.batched_iter(Some(&[0, 0][..]), Some(&[0, 255][..]), reverse);
    assert!(it.valid());
    let first = if reverse { num - 1 } else { 0 };
    assert_eq!(it.key(), &[0, first]);

    buf.set(&[0, num], &[0, num]).unwrap();
    for i in 0..num {
        buf.set(&[1, i], &[1, i]).unwrap();
    }

    let order: Vec<u8> = if reverse {
        (0..num).rev().collect()
    } else {
        (0..num).collect()
    };
    for i in order {
        assert!(it.valid());
        assert_eq!(it.key(), &[0, i]);
        assert_eq!(it.value(), &[0, i]);
        it.next().unwrap();
    }
    assert!(!it.valid());

    buf.release(h);
}

#[test]
fn test_batched_snapshot_iter() {
    for num in [3u8, 17, 64] {
        check_batched_snapshot_iter(TreeMemBuffer::new(), num, false);
        check_batched_snapshot_iter(ArtMemBuffer::new(), num, false);
        check_batched_snapshot_iter(TreeMemBuffer::new(), num, true);
        check_batched_snapshot_iter(ArtMemBuffer::new(), num, true);
    }
}

fn check_batched_iter_edge_cases<I: KeyIndex>(buf: MemBuffer<I>) {
    let h = buf.staging();
    let snapshot = buf.get_snapshot();
    // inverted range: invalid immediately
    let it = snapshot.batched_iter(Some(&[1][..]), Some(&[1][..]), false);
    assert!(!it.valid());
    // empty range over an empty buffer
    let it = snapshot.batched_iter(Some(&[0][..]), Some(&[1][..]), false);
    assert!(!it.valid());
    drop(snapshot);

    // single element
    buf.set(&[1], &[1]).unwrap();
    buf.release(h);
    let h = buf.staging();
    let snapshot = buf.get_snapshot();
    let mut it = snapshot.batched_iter(Some(&[1][..]), Some(&[2][..]), false);
    assert!(it.valid());
    assert_eq!(it.key(), &[1]);
    it.next().unwrap();
    assert!(!it.valid());

    // multiple elements, bounded both ways
    buf.set(&[2], &[2]).unwrap();
    buf.set(&[3], &[3]).unwrap();
    buf.set(&[4], &[4]).unwrap();
    drop(snapshot);
    buf.release(h);
    let _ = buf.staging();

    let snapshot = buf.get_snapshot();
    let mut it = snapshot.batched_iter(Some(&[2][..]), Some(&[4][..]), false);
    let mut seen = Vec::new();
    while it.valid() {
        seen.push(it.key()[0]);
        it.next().unwrap();
    }
    assert_eq!(seen, vec![2, 3]);

    let mut it = snapshot.batched_iter(Some(&[2][..]), Some(&[4][..]), true);
    let mut seen = Vec::new();
    while it.valid() {
        seen.push(it.key()[0]);
        it.next().unwrap();
    }
    assert_eq!(seen, vec![3, 2]);
}

#[test]
fn test_batched_iter_edge_cases() {
    check_batched_iter_edge_cases(TreeMemBuffer::new());
    check_batched_iter_edge_cases(ArtMemBuffer::new());
}

fn check_batched_iter_bounds<I: KeyIndex>(buf: MemBuffer<I>) {
    for k in [[1u8, 0], [1, 2], [1, 4], [1, 6], [1, 8]] {
        buf.set(&k, &k).unwrap();
    }
    let h = buf.staging();
    let snapshot = buf.get_snapshot();

    // lower bound included
    let mut it = snapshot.batched_iter(Some(&[1, 2][..]), Some(&[1, 9][..]), false);
    let mut seen = Vec::new();
    while it.valid() {
        seen.push(it.key()[1]);
        it.next().unwrap();
    }
    assert_eq!(seen, vec![2, 4, 6, 8]);

    // upper bound excluded
    let mut it = snapshot.batched_iter(Some(&[1, 0][..]), Some(&[1, 6][..]), false);
    let mut seen = Vec::new();
    while it.valid() {
        seen.push(it.key()[1]);
        it.next().unwrap();
    }
    assert_eq!(seen, vec![0, 2, 4]);

    let mut it = snapshot.batched_iter(Some(&[1, 0][..]), Some(&[1, 6][..]), true);
    let mut seen = Vec::new();
    while it.valid() {
        seen.push(it.key()[1]);
        it.next().unwrap();
    }
    assert_eq!(seen, vec![4, 2, 0]);

    buf.release(h);
}

#[test]
fn test_batched_iter_bounds() {
    check_batched_iter_bounds(TreeMemBuffer::new());
    check_batched_iter_bounds(ArtMemBuffer::new());
}

fn check_batched_iter_prefix_keys<I: KeyIndex>(buf: MemBuffer<I>) {
    let keys: [&[u8]; 4] = [&[2], &[2, 1], &[2, 1, 1], &[2, 1, 1, 1]];
    for k in keys {
        buf.set(k, k).unwrap();
    }
    let h = buf.staging();
    let snapshot = buf.get_snapshot();

    let mut it = snapshot.batched_iter(Some(&[2][..]), Some(&[3][..]), false);
    let mut count = 0;
    while it.valid() {
        assert_eq!(it.key(), keys[count]);
        it.next().unwrap();
        count += 1;
    }
    assert_eq!(count, keys.len());

    let mut it = snapshot.batched_iter(Some(&[2][..]), Some(&[3][..]), true);
    let mut count = keys.len();
    while it.valid() {
        count -= 1;
        assert_eq!(it.key(), keys[count]);
        it.next().unwrap();
    }
    assert_eq!(count, 0);

    buf.release(h);
}

#[test]
fn test_batched_iter_prefix_keys() {
    check_batched_iter_prefix_keys(TreeMemBuffer::new());
    check_batched_iter_prefix_keys(ArtMemBuffer::new());
}

fn check_batched_iter_growth<I: KeyIndex>(buf: MemBuffer<I>) {
    for i in 0..100u8 {
        buf.set(&[3, i], &[3, i]).unwrap();
    }
    let h = buf.staging();
    let snapshot = buf.get_snapshot();

    let mut it = snapshot.batched_iter(Some(&[3, 0][..]), Some(&[3, 255][..]), false);
    let mut count = 0u8;
    while it.valid() {
        assert_eq!(it.key(), &[3, count]);
        it.next().unwrap();
        count += 1;
    }
    assert_eq!(count, 100);

    let mut it = snapshot.batched_iter(Some(&[3, 0][..]), Some(&[3, 255][..]), true);
    let mut count = 100u8;
    while it.valid() {
        count -= 1;
        assert_eq!(it.key(), &[3, count]);
        it.next().unwrap();
    }
    assert_eq!(count, 0);

    buf.release(h);
}

#[test]
fn test_batched_iter_growth() {
    check_batched_iter_growth(TreeMemBuffer::new());
    check_batched_iter_growth(ArtMemBuffer::new());
}

fn check_batched_iter_stage_change<I: KeyIndex>(buf: MemBuffer<I>) {
    buf.set(&[0], &[0]).unwrap();
    let h = buf.staging();
    let snapshot = buf.get_snapshot();
    buf.set(&[1], &[1]).unwrap();

    let mut it = snapshot.batched_iter(Some(&[0][..]), Some(&[255][..]), false);
    assert!(it.valid());
    it.next().unwrap();

    // the pinning stage goes away; a fresh stage is not the same thing
    buf.release(h);
    let _ = buf.staging();
    assert!(!it.valid());
    assert_eq!(it.next(), Err(StageError::SnapshotInvalidated));
}

#[test]
fn test_batched_iter_stage_change() {
    check_batched_iter_stage_change(TreeMemBuffer::new());
    check_batched_iter_stage_change(ArtMemBuffer::new());
}

fn check_snapshot_iter_stage_change<I: KeyIndex>(buf: MemBuffer<I>) {
    buf.set(&[0], &[0]).unwrap();
    buf.set(&[5], &[5]).unwrap();
    let h = buf.staging();
    let mut it = buf.snapshot_iter(None, None);
    assert!(it.valid());

    buf.release(h);
    let _ = buf.staging();
    assert!(!it.valid());
    assert_eq!(it.next(), Err(StageError::SnapshotInvalidated));
    assert!(!it.valid());
}

#[test]
fn test_snapshot_iter_stage_change() {
    check_snapshot_iter_stage_change(TreeMemBuffer::new());
    check_snapshot_iter_stage_change(ArtMemBuffer::new());
}

// -- memory -------------------------------------------------------------

fn check_leaf_fragmentation<I: KeyIndex>(buf: MemBuffer<I>) {
    let mut h = buf.staging();
    let mut mem = 0u64;
    for _ in 0..10 {
        for k in 0..100 {
            buf.set(k.to_string().repeat(256).as_bytes(), b"value").unwrap();
        }
        let cur = buf.mem();
        if mem == 0 {
            mem = cur;
        } else {
            assert!(cur <= mem, "footprint grew across rollback cycles");
        }
        buf.cleanup(h);
        h = buf.staging();
    }
    buf.cleanup(h);
}

#[test]
fn test_leaf_fragmentation() {
    check_leaf_fragmentation(TreeMemBuffer::new());
    check_leaf_fragmentation(ArtMemBuffer::new());
}

// -- randomized oracle ---------------------------------------------------

/// Interleave writes, deletes and stage activity against a model that
/// mirrors stage semantics with saved map snapshots, then compare
/// contents, length, size and both iteration orders.
fn check_random_against_model<I: KeyIndex>(buf: MemBuffer<I>, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
    let mut saved: Vec<BTreeMap<Vec<u8>, Vec<u8>>> = Vec::new();
    let mut handles: Vec<usize> = Vec::new();

    let random_key = |rng: &mut StdRng| -> Vec<u8> {
        let len = rng.gen_range(1..=4);
        (0..len).map(|_| rng.gen_range(0..6u8)).collect()
    };

    for _ in 0..4000 {
        match rng.gen_range(0..100) {
            0..=59 => {
                let key = random_key(&mut rng);
                let len = rng.gen_range(0..=5);
                let value: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
                buf.set(&key, &value).unwrap();
                model.insert(key, value);
            }
            60..=74 => {
                let key = random_key(&mut rng);
                buf.delete(&key).unwrap();
                model.insert(key, Vec::new());
            }
            75..=84 => {
                if handles.len() < 8 {
                    handles.push(buf.staging());
                    saved.push(model.clone());
                }
            }
            85..=92 => {
                if let Some(h) = handles.pop() {
                    buf.release(h);
                    saved.pop();
                }
            }
            _ => {
                if let Some(h) = handles.pop() {
                    buf.cleanup(h);
                    model = saved.pop().unwrap();
                }
            }
        }
    }
    while let Some(h) = handles.pop() {
        buf.release(h);
        saved.pop();
    }

    assert_eq!(buf.len(), model.len());
    let expect_size: usize = model.iter().map(|(k, v)| k.len() + v.len()).sum();
    assert_eq!(buf.size(), expect_size);
    for (k, v) in &model {
        assert_eq!(&buf.get(k).unwrap(), v);
    }

    let mut it = buf.iter(None, None);
    for (k, v) in &model {
        assert!(it.valid());
        assert_eq!(it.key(), k.as_slice());
        assert_eq!(it.value(), v.as_slice());
        it.next().unwrap();
    }
    assert!(!it.valid());

    let mut it = buf.iter_reverse(None, None);
    for (k, v) in model.iter().rev() {
        assert!(it.valid());
        assert_eq!(it.key(), k.as_slice());
        assert_eq!(it.value(), v.as_slice());
        it.next().unwrap();
    }
    assert!(!it.valid());

    // arbitrary half-open sub-ranges
    for _ in 0..25 {
        let lower = random_key(&mut rng);
        let upper = random_key(&mut rng);
        let mut it = buf.iter(Some(&lower[..]), Some(&upper[..]));
        if lower >= upper {
            assert!(!it.valid());
            continue;
        }
        for (k, v) in model.range(lower.clone()..upper.clone()) {
            assert!(it.valid());
            assert_eq!(it.key(), k.as_slice());
            assert_eq!(it.value(), v.as_slice());
            it.next().unwrap();
        }
        assert!(!it.valid());
    }
}

#[test]
fn test_random_against_model() {
    check_random_against_model(TreeMemBuffer::new(), 0x0001);
    check_random_against_model(ArtMemBuffer::new(), 0x0001);
    check_random_against_model(TreeMemBuffer::new(), 0xbeef);
    check_random_against_model(ArtMemBuffer::new(), 0xbeef);
}
