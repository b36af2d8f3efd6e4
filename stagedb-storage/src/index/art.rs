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

//! Adaptive radix trie engine
//!
//! The classic ART node zoo with fan-outs {4, 16, 48, 256} and path
//! compression. Nodes promote to the next size on overflow and demote
//! (or collapse into their sole child) on erase.
//!
//! Two departures from the paper, both in favor of simplicity for this
//! single-writer workload:
//!
//! - Prefixes are stored in full (inline up to 8 bytes via `SmallVec`)
//!   rather than the truncated optimistic prefix, so no lookup ever
//!   needs a leaf to reconstruct a compressed path.
//! - Keys may be strict prefixes of other keys, so every inner node
//!   carries an optional terminal leaf for the key ending exactly at
//!   that node. The terminal sorts before all children.
//!
//! Node reshaping reuses freed structure, which is why nothing outside
//! this module may hold node references across mutations: iterators
//! address the trie by key only.

use smallvec::SmallVec;

use super::{KeyIndex, SlotId};

type Prefix = SmallVec<[u8; 8]>;

const N48_EMPTY: u8 = 0xFF;

struct Leaf {
    key: Box<[u8]>,
    slot: SlotId,
}

struct Node4 {
    prefix: Prefix,
    term: Option<Box<Leaf>>,
    len: u8,
    keys: [u8; 4],
    children: [Option<ArtNode>; 4],
}

struct Node16 {
    prefix: Prefix,
    term: Option<Box<Leaf>>,
    len: u8,
    keys: [u8; 16],
    children: [Option<ArtNode>; 16],
}

struct Node48 {
    prefix: Prefix,
    term: Option<Box<Leaf>>,
    len: u8,
    /// Maps a key byte to a dense child slot, or [`N48_EMPTY`].
    index: [u8; 256],
    children: [Option<ArtNode>; 48],
}

struct Node256 {
    prefix: Prefix,
    term: Option<Box<Leaf>>,
    len: u16,
    children: [Option<ArtNode>; 256],
}

enum ArtNode {
    Leaf(Box<Leaf>),
    N4(Box<Node4>),
    N16(Box<Node16>),
    N48(Box<Node48>),
    N256(Box<Node256>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    N4,
    N16,
    N48,
    N256,
}

impl NodeKind {
    fn grown(self) -> NodeKind {
        match self {
            NodeKind::N4 => NodeKind::N16,
            NodeKind::N16 => NodeKind::N48,
            NodeKind::N48 | NodeKind::N256 => NodeKind::N256,
        }
    }
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    let n = a.len().min(b.len());
    let mut i = 0;
    while i < n && a[i] == b[i] {
        i += 1;
    }
    i
}

impl ArtNode {
    fn kind(&self) -> NodeKind {
        match self {
            ArtNode::N4(_) => NodeKind::N4,
            ArtNode::N16(_) => NodeKind::N16,
            ArtNode::N48(_) => NodeKind::N48,
            ArtNode::N256(_) => NodeKind::N256,
            ArtNode::Leaf(_) => unreachable!("leaves have no node kind"),
        }
    }

    fn prefix(&self) -> &[u8] {
        match self {
            ArtNode::Leaf(_) => &[],
            ArtNode::N4(n) => &n.prefix,
            ArtNode::N16(n) => &n.prefix,
            ArtNode::N48(n) => &n.prefix,
            ArtNode::N256(n) => &n.prefix,
        }
    }

    fn set_prefix(&mut self, p: Prefix) {
        match self {
            ArtNode::Leaf(_) => unreachable!("leaves have no prefix"),
            ArtNode::N4(n) => n.prefix = p,
            ArtNode::N16(n) => n.prefix = p,
            ArtNode::N48(n) => n.prefix = p,
            ArtNode::N256(n) => n.prefix = p,
        }
    }

    fn term(&self) -> Option<&Leaf> {
        match self {
            ArtNode::Leaf(_) => None,
            ArtNode::N4(n) => n.term.as_deref(),
            ArtNode::N16(n) => n.term.as_deref(),
            ArtNode::N48(n) => n.term.as_deref(),
            ArtNode::N256(n) => n.term.as_deref(),
        }
    }

    fn term_mut(&mut self) -> &mut Option<Box<Leaf>> {
        match self {
            ArtNode::Leaf(_) => unreachable!("leaves have no terminal slot"),
            ArtNode::N4(n) => &mut n.term,
            ArtNode::N16(n) => &mut n.term,
            ArtNode::N48(n) => &mut n.term,
            ArtNode::N256(n) => &mut n.term,
        }
    }

    fn child_count(&self) -> usize {
        match self {
            ArtNode::Leaf(_) => 0,
            ArtNode::N4(n) => n.len as usize,
            ArtNode::N16(n) => n.len as usize,
            ArtNode::N48(n) => n.len as usize,
            ArtNode::N256(n) => n.len as usize,
        }
    }

    fn is_full(&self) -> bool {
        match self {
            ArtNode::Leaf(_) => true,
            ArtNode::N4(n) => n.len as usize == 4,
            ArtNode::N16(n) => n.len as usize == 16,
            ArtNode::N48(n) => n.len as usize == 48,
            ArtNode::N256(_) => false,
        }
    }

    fn child(&self, byte: u8) -> Option<&ArtNode> {
        match self {
            ArtNode::Leaf(_) => None,
            ArtNode::N4(n) => {
                let len = n.len as usize;
                n.keys[..len]
                    .iter()
                    .position(|k| *k == byte)
                    .and_then(|i| n.children[i].as_ref())
            }
            ArtNode::N16(n) => {
                let len = n.len as usize;
                n.keys[..len]
                    .iter()
                    .position(|k| *k == byte)
                    .and_then(|i| n.children[i].as_ref())
            }
            ArtNode::N48(n) => {
                let slot = n.index[byte as usize];
                if slot == N48_EMPTY {
                    None
                } else {
                    n.children[slot as usize].as_ref()
                }
            }
            ArtNode::N256(n) => n.children[byte as usize].as_ref(),
        }
    }

    /// Add a child under `byte`. The node must have room.
    fn add_child(&mut self, byte: u8, child: ArtNode) {
        match self {
            ArtNode::Leaf(_) => unreachable!("leaves cannot hold children"),
            ArtNode::N4(n) => {
                let len = n.len as usize;
                debug_assert!(len < 4);
                let pos = n.keys[..len].iter().position(|k| *k > byte).unwrap_or(len);
                let mut i = len;
                while i > pos {
                    n.keys[i] = n.keys[i - 1];
                    n.children[i] = n.children[i - 1].take();
                    i -= 1;
                }
                n.keys[pos] = byte;
                n.children[pos] = Some(child);
                n.len += 1;
            }
            ArtNode::N16(n) => {
                let len = n.len as usize;
                debug_assert!(len < 16);
                let pos = n.keys[..len].iter().position(|k| *k > byte).unwrap_or(len);
                let mut i = len;
                while i > pos {
                    n.keys[i] = n.keys[i - 1];
                    n.children[i] = n.children[i - 1].take();
                    i -= 1;
                }
                n.keys[pos] = byte;
                n.children[pos] = Some(child);
                n.len += 1;
            }
            ArtNode::N48(n) => {
                debug_assert!((n.len as usize) < 48);
                debug_assert_eq!(n.index[byte as usize], N48_EMPTY);
                for slot in 0..48 {
                    if n.children[slot].is_none() {
                        n.children[slot] = Some(child);
                        n.index[byte as usize] = slot as u8;
                        n.len += 1;
                        return;
                    }
                }
                debug_assert!(false, "node48 had no free slot");
            }
            ArtNode::N256(n) => {
                debug_assert!(n.children[byte as usize].is_none());
                n.children[byte as usize] = Some(child);
                n.len += 1;
            }
        }
    }

    fn remove_child(&mut self, byte: u8) -> Option<ArtNode> {
        match self {
            ArtNode::Leaf(_) => None,
            ArtNode::N4(n) => {
                let len = n.len as usize;
                let pos = n.keys[..len].iter().position(|k| *k == byte)?;
                let child = n.children[pos].take();
                for i in pos..len - 1 {
                    n.keys[i] = n.keys[i + 1];
                    n.children[i] = n.children[i + 1].take();
                }
                n.len -= 1;
                child
            }
            ArtNode::N16(n) => {
                let len = n.len as usize;
                let pos = n.keys[..len].iter().position(|k| *k == byte)?;
                let child = n.children[pos].take();
                for i in pos..len - 1 {
                    n.keys[i] = n.keys[i + 1];
                    n.children[i] = n.children[i + 1].take();
                }
                n.len -= 1;
                child
            }
            ArtNode::N48(n) => {
                let slot = n.index[byte as usize];
                if slot == N48_EMPTY {
                    return None;
                }
                n.index[byte as usize] = N48_EMPTY;
                n.len -= 1;
                n.children[slot as usize].take()
            }
            ArtNode::N256(n) => {
                let child = n.children[byte as usize].take();
                if child.is_some() {
                    n.len -= 1;
                }
                child
            }
        }
    }

    fn first_child(&self) -> Option<&ArtNode> {
        match self {
            ArtNode::Leaf(_) => None,
            ArtNode::N4(n) => n.children[..n.len as usize].first().and_then(|c| c.as_ref()),
            ArtNode::N16(n) => n.children[..n.len as usize].first().and_then(|c| c.as_ref()),
            ArtNode::N48(n) => {
                for byte in 0..256 {
                    let slot = n.index[byte];
                    if slot != N48_EMPTY {
                        return n.children[slot as usize].as_ref();
                    }
                }
                None
            }
            ArtNode::N256(n) => n.children.iter().find_map(|c| c.as_ref()),
        }
    }

    fn last_child(&self) -> Option<&ArtNode> {
        match self {
            ArtNode::Leaf(_) => None,
            ArtNode::N4(n) => {
                let len = n.len as usize;
                if len == 0 {
                    None
                } else {
                    n.children[len - 1].as_ref()
                }
            }
            ArtNode::N16(n) => {
                let len = n.len as usize;
                if len == 0 {
                    None
                } else {
                    n.children[len - 1].as_ref()
                }
            }
            ArtNode::N48(n) => {
                for byte in (0..256).rev() {
                    let slot = n.index[byte];
                    if slot != N48_EMPTY {
                        return n.children[slot as usize].as_ref();
                    }
                }
                None
            }
            ArtNode::N256(n) => n.children.iter().rev().find_map(|c| c.as_ref()),
        }
    }

    /// Smallest child whose byte is strictly greater than `byte`.
    fn child_after(&self, byte: u8) -> Option<&ArtNode> {
        match self {
            ArtNode::Leaf(_) => None,
            ArtNode::N4(n) => {
                let len = n.len as usize;
                n.keys[..len]
                    .iter()
                    .position(|k| *k > byte)
                    .and_then(|i| n.children[i].as_ref())
            }
            ArtNode::N16(n) => {
                let len = n.len as usize;
                n.keys[..len]
                    .iter()
                    .position(|k| *k > byte)
                    .and_then(|i| n.children[i].as_ref())
            }
            ArtNode::N48(n) => {
                for b in (byte as usize + 1)..256 {
                    let slot = n.index[b];
                    if slot != N48_EMPTY {
                        return n.children[slot as usize].as_ref();
                    }
                }
                None
            }
            ArtNode::N256(n) => {
                for b in (byte as usize + 1)..256 {
                    if let Some(c) = &n.children[b] {
                        return Some(c);
                    }
                }
                None
            }
        }
    }

    /// Largest child whose byte is strictly less than `byte`.
    fn child_before(&self, byte: u8) -> Option<&ArtNode> {
        match self {
            ArtNode::Leaf(_) => None,
            ArtNode::N4(n) => {
                let len = n.len as usize;
                n.keys[..len]
                    .iter()
                    .rposition(|k| *k < byte)
                    .and_then(|i| n.children[i].as_ref())
            }
            ArtNode::N16(n) => {
                let len = n.len as usize;
                n.keys[..len]
                    .iter()
                    .rposition(|k| *k < byte)
                    .and_then(|i| n.children[i].as_ref())
            }
            ArtNode::N48(n) => {
                for b in (0..byte as usize).rev() {
                    let slot = n.index[b];
                    if slot != N48_EMPTY {
                        return n.children[slot as usize].as_ref();
                    }
                }
                None
            }
            ArtNode::N256(n) => {
                for b in (0..byte as usize).rev() {
                    if let Some(c) = &n.children[b] {
                        return Some(c);
                    }
                }
                None
            }
        }
    }

    /// Detach the only child. Returns `None` unless exactly one remains.
    fn take_sole_child(&mut self) -> Option<(u8, ArtNode)> {
        if self.child_count() != 1 {
            return None;
        }
        match self {
            ArtNode::Leaf(_) => None,
            ArtNode::N4(n) => {
                let byte = n.keys[0];
                let child = n.children[0].take()?;
                n.len = 0;
                Some((byte, child))
            }
            ArtNode::N16(n) => {
                let byte = n.keys[0];
                let child = n.children[0].take()?;
                n.len = 0;
                Some((byte, child))
            }
            ArtNode::N48(n) => {
                for byte in 0..256 {
                    let slot = n.index[byte];
                    if slot != N48_EMPTY {
                        n.index[byte] = N48_EMPTY;
                        n.len = 0;
                        return n.children[slot as usize].take().map(|c| (byte as u8, c));
                    }
                }
                None
            }
            ArtNode::N256(n) => {
                for byte in 0..256 {
                    if n.children[byte].is_some() {
                        n.len = 0;
                        return n.children[byte].take().map(|c| (byte as u8, c));
                    }
                }
                None
            }
        }
    }

    /// Detach every child in ascending byte order.
    fn drain_children(&mut self) -> Vec<(u8, ArtNode)> {
        let mut out = Vec::with_capacity(self.child_count());
        match self {
            ArtNode::Leaf(_) => {}
            ArtNode::N4(n) => {
                let len = n.len as usize;
                for i in 0..len {
                    if let Some(c) = n.children[i].take() {
                        out.push((n.keys[i], c));
                    }
                }
                n.len = 0;
            }
            ArtNode::N16(n) => {
                let len = n.len as usize;
                for i in 0..len {
                    if let Some(c) = n.children[i].take() {
                        out.push((n.keys[i], c));
                    }
                }
                n.len = 0;
            }
            ArtNode::N48(n) => {
                for byte in 0..256 {
                    let slot = n.index[byte];
                    if slot != N48_EMPTY {
                        n.index[byte] = N48_EMPTY;
                        if let Some(c) = n.children[slot as usize].take() {
                            out.push((byte as u8, c));
                        }
                    }
                }
                n.len = 0;
            }
            ArtNode::N256(n) => {
                for byte in 0..256 {
                    if let Some(c) = n.children[byte].take() {
                        out.push((byte as u8, c));
                    }
                }
                n.len = 0;
            }
        }
        out
    }
}

/// Adaptive radix trie keyed by byte strings.
#[derive(Default)]
pub struct ArtIndex {
    root: Option<ArtNode>,
    leaves: usize,
    inner4: usize,
    inner16: usize,
    inner48: usize,
    inner256: usize,
    key_bytes: usize,
}

impl ArtIndex {
    fn new_leaf(&mut self, key: &[u8], slot: SlotId) -> Box<Leaf> {
        self.leaves += 1;
        self.key_bytes += key.len();
        Box::new(Leaf {
            key: key.into(),
            slot,
        })
    }

    fn free_leaf(&mut self, leaf: &Leaf) {
        self.leaves -= 1;
        self.key_bytes -= leaf.key.len();
    }

    fn new_inner(&mut self, kind: NodeKind, prefix: Prefix) -> ArtNode {
        match kind {
            NodeKind::N4 => {
                self.inner4 += 1;
                ArtNode::N4(Box::new(Node4 {
                    prefix,
                    term: None,
                    len: 0,
                    keys: [0; 4],
                    children: std::array::from_fn(|_| None),
                }))
            }
            NodeKind::N16 => {
                self.inner16 += 1;
                ArtNode::N16(Box::new(Node16 {
                    prefix,
                    term: None,
                    len: 0,
                    keys: [0; 16],
                    children: std::array::from_fn(|_| None),
                }))
            }
            NodeKind::N48 => {
                self.inner48 += 1;
                ArtNode::N48(Box::new(Node48 {
                    prefix,
                    term: None,
                    len: 0,
                    index: [N48_EMPTY; 256],
                    children: std::array::from_fn(|_| None),
                }))
            }
            NodeKind::N256 => {
                self.inner256 += 1;
                ArtNode::N256(Box::new(Node256 {
                    prefix,
                    term: None,
                    len: 0,
                    children: std::array::from_fn(|_| None),
                }))
            }
        }
    }

    fn free_inner(&mut self, node: &ArtNode) {
        match node {
            ArtNode::Leaf(_) => unreachable!("free_inner on a leaf"),
            ArtNode::N4(_) => self.inner4 -= 1,
            ArtNode::N16(_) => self.inner16 -= 1,
            ArtNode::N48(_) => self.inner48 -= 1,
            ArtNode::N256(_) => self.inner256 -= 1,
        }
    }

    /// Rebuild `node` as `target` kind, moving prefix, terminal and
    /// children over. Used for both promotion and demotion.
    fn rebuild(&mut self, mut node: ArtNode, target: NodeKind) -> ArtNode {
        let prefix: Prefix = node.prefix().into();
        let term = node.term_mut().take();
        let pairs = node.drain_children();
        self.free_inner(&node);
        let mut out = self.new_inner(target, prefix);
        *out.term_mut() = term;
        for (byte, child) in pairs {
            out.add_child(byte, child);
        }
        out
    }

    fn grow(&mut self, node: ArtNode) -> ArtNode {
        let target = node.kind().grown();
        self.rebuild(node, target)
    }

    fn split_leaf(&mut self, existing: Box<Leaf>, key: &[u8], depth: usize, slot: SlotId) -> ArtNode {
        debug_assert_ne!(existing.key.as_ref(), key);
        let common = common_prefix_len(&existing.key[depth..], &key[depth..]);
        let split = depth + common;
        let prefix: Prefix = key[depth..split].into();
        let mut parent = self.new_inner(NodeKind::N4, prefix);
        let existing_byte = (existing.key.len() > split).then(|| existing.key[split]);
        match existing_byte {
            Some(b) => parent.add_child(b, ArtNode::Leaf(existing)),
            None => *parent.term_mut() = Some(existing),
        }
        let new_leaf = self.new_leaf(key, slot);
        if key.len() > split {
            parent.add_child(key[split], ArtNode::Leaf(new_leaf));
        } else {
            *parent.term_mut() = Some(new_leaf);
        }
        parent
    }

    fn split_prefix(
        &mut self,
        mut node: ArtNode,
        key: &[u8],
        depth: usize,
        common: usize,
        slot: SlotId,
    ) -> ArtNode {
        let parent_prefix: Prefix = node.prefix()[..common].into();
        let node_byte = node.prefix()[common];
        let node_rest: Prefix = node.prefix()[common + 1..].into();
        node.set_prefix(node_rest);
        let mut parent = self.new_inner(NodeKind::N4, parent_prefix);
        parent.add_child(node_byte, node);
        let split = depth + common;
        let new_leaf = self.new_leaf(key, slot);
        if key.len() > split {
            parent.add_child(key[split], ArtNode::Leaf(new_leaf));
        } else {
            *parent.term_mut() = Some(new_leaf);
        }
        parent
    }

    fn insert_rec(&mut self, node: ArtNode, key: &[u8], depth: usize, slot: SlotId) -> ArtNode {
        let mut node = match node {
            ArtNode::Leaf(leaf) => return self.split_leaf(leaf, key, depth, slot),
            inner => inner,
        };
        let common = common_prefix_len(node.prefix(), &key[depth..]);
        if common < node.prefix().len() {
            return self.split_prefix(node, key, depth, common, slot);
        }
        let at = depth + node.prefix().len();
        if at == key.len() {
            let new_leaf = self.new_leaf(key, slot);
            if let Some(old) = node.term_mut().take() {
                debug_assert!(false, "insert of an existing key");
                self.free_leaf(&old);
            }
            *node.term_mut() = Some(new_leaf);
            return node;
        }
        let byte = key[at];
        match node.remove_child(byte) {
            Some(child) => {
                let child = self.insert_rec(child, key, at + 1, slot);
                node.add_child(byte, child);
                node
            }
            None => {
                if node.is_full() {
                    node = self.grow(node);
                }
                let leaf = self.new_leaf(key, slot);
                node.add_child(byte, ArtNode::Leaf(leaf));
                node
            }
        }
    }

    fn remove_rec(&mut self, node: ArtNode, key: &[u8], depth: usize) -> (Option<ArtNode>, Option<SlotId>) {
        let mut node = match node {
            ArtNode::Leaf(leaf) => {
                return if leaf.key.as_ref() == key {
                    let slot = leaf.slot;
                    self.free_leaf(&leaf);
                    (None, Some(slot))
                } else {
                    (Some(ArtNode::Leaf(leaf)), None)
                };
            }
            inner => inner,
        };
        let plen = node.prefix().len();
        if key.len() < depth + plen || &key[depth..depth + plen] != node.prefix() {
            return (Some(node), None);
        }
        let at = depth + plen;
        let removed;
        if at == key.len() {
            match node.term_mut().take() {
                Some(leaf) => {
                    removed = Some(leaf.slot);
                    self.free_leaf(&leaf);
                }
                None => return (Some(node), None),
            }
        } else {
            let byte = key[at];
            match node.remove_child(byte) {
                None => return (Some(node), None),
                Some(child) => {
                    let (rest, rm) = self.remove_rec(child, key, at + 1);
                    if let Some(c) = rest {
                        node.add_child(byte, c);
                    }
                    match rm {
                        Some(_) => removed = rm,
                        None => return (Some(node), None),
                    }
                }
            }
        }
        (self.collapse(node), removed)
    }

    /// Post-erase maintenance: drop empty nodes, collapse single-child
    /// paths, demote oversized nodes.
    fn collapse(&mut self, mut node: ArtNode) -> Option<ArtNode> {
        let count = node.child_count();
        if count == 0 {
            let term = node.term_mut().take();
            self.free_inner(&node);
            return term.map(ArtNode::Leaf);
        }
        if count == 1 && node.term().is_none() {
            if let Some((byte, mut child)) = node.take_sole_child() {
                if !matches!(child, ArtNode::Leaf(_)) {
                    let mut merged: Prefix = node.prefix().into();
                    merged.push(byte);
                    merged.extend_from_slice(child.prefix());
                    child.set_prefix(merged);
                }
                self.free_inner(&node);
                return Some(child);
            }
        }
        let target = match (node.kind(), count) {
            (NodeKind::N16, c) if c <= 3 => Some(NodeKind::N4),
            (NodeKind::N48, c) if c <= 12 => Some(NodeKind::N16),
            (NodeKind::N256, c) if c <= 40 => Some(NodeKind::N48),
            _ => None,
        };
        match target {
            Some(kind) => Some(self.rebuild(node, kind)),
            None => Some(node),
        }
    }

    fn min_leaf(node: &ArtNode) -> &Leaf {
        let mut cur = node;
        loop {
            if let ArtNode::Leaf(l) = cur {
                return l;
            }
            if let Some(t) = cur.term() {
                return t;
            }
            match cur.first_child() {
                Some(c) => cur = c,
                None => unreachable!("inner node without children or terminal"),
            }
        }
    }

    fn max_leaf(node: &ArtNode) -> &Leaf {
        let mut cur = node;
        loop {
            if let ArtNode::Leaf(l) = cur {
                return l;
            }
            match cur.last_child() {
                Some(c) => cur = c,
                None => match cur.term() {
                    Some(t) => return t,
                    None => unreachable!("inner node without children or terminal"),
                },
            }
        }
    }

    fn seek_at<'a>(node: &'a ArtNode, lower: &[u8], depth: usize) -> Option<&'a Leaf> {
        let inner = match node {
            ArtNode::Leaf(leaf) => {
                return (leaf.key.as_ref() >= lower).then_some(&**leaf);
            }
            inner => inner,
        };
        let rest = &lower[depth.min(lower.len())..];
        let p = inner.prefix();
        let k = p.len().min(rest.len());
        match p[..k].cmp(&rest[..k]) {
            std::cmp::Ordering::Greater => Some(Self::min_leaf(inner)),
            std::cmp::Ordering::Less => None,
            std::cmp::Ordering::Equal => {
                if rest.len() <= p.len() {
                    // bound exhausted inside the path: everything here qualifies
                    return Some(Self::min_leaf(inner));
                }
                let at = depth + p.len();
                let byte = lower[at];
                if let Some(child) = inner.child(byte) {
                    if let Some(l) = Self::seek_at(child, lower, at + 1) {
                        return Some(l);
                    }
                }
                inner.child_after(byte).map(Self::min_leaf)
            }
        }
    }

    fn seek_rev_at<'a>(node: &'a ArtNode, upper: &[u8], depth: usize) -> Option<&'a Leaf> {
        let inner = match node {
            ArtNode::Leaf(leaf) => {
                return (leaf.key.as_ref() < upper).then_some(&**leaf);
            }
            inner => inner,
        };
        let rest = &upper[depth.min(upper.len())..];
        let p = inner.prefix();
        let k = p.len().min(rest.len());
        match p[..k].cmp(&rest[..k]) {
            std::cmp::Ordering::Less => Some(Self::max_leaf(inner)),
            std::cmp::Ordering::Greater => None,
            std::cmp::Ordering::Equal => {
                if rest.len() <= p.len() {
                    // the bound is a prefix of this path: every key here is >= upper
                    return None;
                }
                let at = depth + p.len();
                let byte = upper[at];
                if let Some(child) = inner.child(byte) {
                    if let Some(l) = Self::seek_rev_at(child, upper, at + 1) {
                        return Some(l);
                    }
                }
                if let Some(c) = inner.child_before(byte) {
                    return Some(Self::max_leaf(c));
                }
                inner.term()
            }
        }
    }
}

impl KeyIndex for ArtIndex {
    fn lookup(&self, key: &[u8]) -> Option<SlotId> {
        let mut node = self.root.as_ref()?;
        let mut depth = 0;
        loop {
            match node {
                ArtNode::Leaf(leaf) => {
                    return (leaf.key.as_ref() == key).then_some(leaf.slot);
                }
                inner => {
                    let p = inner.prefix();
                    if key.len() < depth + p.len() || &key[depth..depth + p.len()] != p {
                        return None;
                    }
                    depth += p.len();
                    if depth == key.len() {
                        return inner.term().map(|l| l.slot);
                    }
                    node = inner.child(key[depth])?;
                    depth += 1;
                }
            }
        }
    }

    fn insert(&mut self, key: &[u8], slot: SlotId) {
        match self.root.take() {
            None => {
                let leaf = self.new_leaf(key, slot);
                self.root = Some(ArtNode::Leaf(leaf));
            }
            Some(node) => {
                let node = self.insert_rec(node, key, 0, slot);
                self.root = Some(node);
            }
        }
    }

    fn remove(&mut self, key: &[u8]) -> Option<SlotId> {
        let root = self.root.take()?;
        let (root, removed) = self.remove_rec(root, key, 0);
        self.root = root;
        removed
    }

    fn seek(&self, lower: &[u8]) -> Option<(&[u8], SlotId)> {
        let root = self.root.as_ref()?;
        let leaf = Self::seek_at(root, lower, 0)?;
        Some((leaf.key.as_ref(), leaf.slot))
    }

    fn seek_rev(&self, upper: Option<&[u8]>) -> Option<(&[u8], SlotId)> {
        let root = self.root.as_ref()?;
        let leaf = match upper {
            None => Self::max_leaf(root),
            Some(u) => Self::seek_rev_at(root, u, 0)?,
        };
        Some((leaf.key.as_ref(), leaf.slot))
    }

    fn len(&self) -> usize {
        self.leaves
    }

    fn clear(&mut self) {
        self.root = None;
        self.leaves = 0;
        self.inner4 = 0;
        self.inner16 = 0;
        self.inner48 = 0;
        self.inner256 = 0;
        self.key_bytes = 0;
    }

    fn mem_usage(&self) -> usize {
        self.leaves * std::mem::size_of::<Leaf>()
            + self.inner4 * std::mem::size_of::<Node4>()
            + self.inner16 * std::mem::size_of::<Node16>()
            + self.inner48 * std::mem::size_of::<Node48>()
            + self.inner256 * std::mem::size_of::<Node256>()
            + self.key_bytes
    }
}
