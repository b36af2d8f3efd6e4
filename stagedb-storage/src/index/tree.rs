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

//! Balanced ordered tree engine
//!
//! An AVL tree over owned byte-string keys, stored as a slab of nodes
//! linked by `u32` indices instead of pointers. Rebalancing moves links,
//! never payloads, so the [`SlotId`] a node carries stays valid for the
//! lifetime of the key — undo records and the lookup cache rely on that.
//!
//! Subtree sizes are maintained alongside heights (order statistics);
//! `len()` is the root's size.

use super::{KeyIndex, SlotId};

const NIL: u32 = u32::MAX;

struct TreeNode {
    key: Box<[u8]>,
    slot: SlotId,
    left: u32,
    right: u32,
    height: u8,
    size: u32,
}

/// Slab-backed AVL tree keyed by byte strings.
pub struct TreeIndex {
    nodes: Vec<TreeNode>,
    free: Vec<u32>,
    root: u32,
    key_bytes: usize,
}

impl Default for TreeIndex {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            root: NIL,
            key_bytes: 0,
        }
    }
}

impl TreeIndex {
    #[inline]
    fn height(&self, n: u32) -> u8 {
        if n == NIL {
            0
        } else {
            self.nodes[n as usize].height
        }
    }

    #[inline]
    fn size(&self, n: u32) -> u32 {
        if n == NIL {
            0
        } else {
            self.nodes[n as usize].size
        }
    }

    fn update(&mut self, n: u32) {
        let (l, r) = {
            let node = &self.nodes[n as usize];
            (node.left, node.right)
        };
        let height = 1 + self.height(l).max(self.height(r));
        let size = 1 + self.size(l) + self.size(r);
        let node = &mut self.nodes[n as usize];
        node.height = height;
        node.size = size;
    }

    fn rotate_left(&mut self, n: u32) -> u32 {
        let r = self.nodes[n as usize].right;
        let rl = self.nodes[r as usize].left;
        self.nodes[n as usize].right = rl;
        self.nodes[r as usize].left = n;
        self.update(n);
        self.update(r);
        r
    }

    fn rotate_right(&mut self, n: u32) -> u32 {
        let l = self.nodes[n as usize].left;
        let lr = self.nodes[l as usize].right;
        self.nodes[n as usize].left = lr;
        self.nodes[l as usize].right = n;
        self.update(n);
        self.update(l);
        l
    }

    fn rebalance(&mut self, n: u32) -> u32 {
        self.update(n);
        let (l, r) = {
            let node = &self.nodes[n as usize];
            (node.left, node.right)
        };
        let bf = self.height(l) as i32 - self.height(r) as i32;
        if bf > 1 {
            let ll = self.nodes[l as usize].left;
            let lr = self.nodes[l as usize].right;
            if self.height(ll) < self.height(lr) {
                let nl = self.rotate_left(l);
                self.nodes[n as usize].left = nl;
            }
            self.rotate_right(n)
        } else if bf < -1 {
            let rl = self.nodes[r as usize].left;
            let rr = self.nodes[r as usize].right;
            if self.height(rr) < self.height(rl) {
                let nr = self.rotate_right(r);
                self.nodes[n as usize].right = nr;
            }
            self.rotate_left(n)
        } else {
            n
        }
    }

    fn alloc_node(&mut self, key: &[u8], slot: SlotId) -> u32 {
        self.key_bytes += key.len();
        let node = TreeNode {
            key: key.into(),
            slot,
            left: NIL,
            right: NIL,
            height: 1,
            size: 1,
        };
        match self.free.pop() {
            Some(id) => {
                self.nodes[id as usize] = node;
                id
            }
            None => {
                self.nodes.push(node);
                (self.nodes.len() - 1) as u32
            }
        }
    }

    fn free_node(&mut self, n: u32) {
        self.key_bytes -= self.nodes[n as usize].key.len();
        self.nodes[n as usize].key = Box::default();
        self.free.push(n);
    }

    fn insert_at(&mut self, n: u32, key: &[u8], slot: SlotId) -> u32 {
        if n == NIL {
            return self.alloc_node(key, slot);
        }
        let ord = key.cmp(self.nodes[n as usize].key.as_ref());
        match ord {
            std::cmp::Ordering::Less => {
                let l = self.nodes[n as usize].left;
                let nl = self.insert_at(l, key, slot);
                self.nodes[n as usize].left = nl;
            }
            std::cmp::Ordering::Greater => {
                let r = self.nodes[n as usize].right;
                let nr = self.insert_at(r, key, slot);
                self.nodes[n as usize].right = nr;
            }
            std::cmp::Ordering::Equal => {
                // insert contract says absent, but stay well-defined
                self.nodes[n as usize].slot = slot;
                return n;
            }
        }
        self.rebalance(n)
    }

    /// Detach the minimum node of the subtree rooted at `n`.
    /// Returns `(new_subtree_root, detached_node)`.
    fn take_min(&mut self, n: u32) -> (u32, u32) {
        let l = self.nodes[n as usize].left;
        if l == NIL {
            let r = self.nodes[n as usize].right;
            return (r, n);
        }
        let (nl, m) = self.take_min(l);
        self.nodes[n as usize].left = nl;
        (self.rebalance(n), m)
    }

    fn remove_at(&mut self, n: u32, key: &[u8]) -> (u32, Option<SlotId>) {
        if n == NIL {
            return (NIL, None);
        }
        let ord = key.cmp(self.nodes[n as usize].key.as_ref());
        let removed;
        match ord {
            std::cmp::Ordering::Less => {
                let l = self.nodes[n as usize].left;
                let (nl, r) = self.remove_at(l, key);
                self.nodes[n as usize].left = nl;
                removed = r;
            }
            std::cmp::Ordering::Greater => {
                let r = self.nodes[n as usize].right;
                let (nr, rm) = self.remove_at(r, key);
                self.nodes[n as usize].right = nr;
                removed = rm;
            }
            std::cmp::Ordering::Equal => {
                removed = Some(self.nodes[n as usize].slot);
                let (l, r) = {
                    let node = &self.nodes[n as usize];
                    (node.left, node.right)
                };
                if l == NIL || r == NIL {
                    let child = if l != NIL { l } else { r };
                    self.free_node(n);
                    return (child, removed);
                }
                // Two children: splice the in-order successor's payload
                // into this node, then free the detached successor (it
                // carries the old key out for byte accounting).
                let (nr, m) = self.take_min(r);
                self.nodes[n as usize].right = nr;
                let succ_key = std::mem::take(&mut self.nodes[m as usize].key);
                let succ_slot = self.nodes[m as usize].slot;
                let old_key = std::mem::replace(&mut self.nodes[n as usize].key, succ_key);
                self.nodes[n as usize].slot = succ_slot;
                self.nodes[m as usize].key = old_key;
                self.free_node(m);
            }
        }
        (self.rebalance(n), removed)
    }
}

impl KeyIndex for TreeIndex {
    fn lookup(&self, key: &[u8]) -> Option<SlotId> {
        let mut cur = self.root;
        while cur != NIL {
            let node = &self.nodes[cur as usize];
            match key.cmp(node.key.as_ref()) {
                std::cmp::Ordering::Less => cur = node.left,
                std::cmp::Ordering::Greater => cur = node.right,
                std::cmp::Ordering::Equal => return Some(node.slot),
            }
        }
        None
    }

    fn insert(&mut self, key: &[u8], slot: SlotId) {
        let root = self.root;
        self.root = self.insert_at(root, key, slot);
    }

    fn remove(&mut self, key: &[u8]) -> Option<SlotId> {
        let root = self.root;
        let (root, removed) = self.remove_at(root, key);
        self.root = root;
        removed
    }

    fn seek(&self, lower: &[u8]) -> Option<(&[u8], SlotId)> {
        let mut cur = self.root;
        let mut best = NIL;
        while cur != NIL {
            let node = &self.nodes[cur as usize];
            if node.key.as_ref() >= lower {
                best = cur;
                cur = node.left;
            } else {
                cur = node.right;
            }
        }
        if best == NIL {
            return None;
        }
        let node = &self.nodes[best as usize];
        Some((node.key.as_ref(), node.slot))
    }

    fn seek_rev(&self, upper: Option<&[u8]>) -> Option<(&[u8], SlotId)> {
        let mut cur = self.root;
        let mut best = NIL;
        while cur != NIL {
            let node = &self.nodes[cur as usize];
            let below = match upper {
                Some(u) => node.key.as_ref() < u,
                None => true,
            };
            if below {
                best = cur;
                cur = node.right;
            } else {
                cur = node.left;
            }
        }
        if best == NIL {
            return None;
        }
        let node = &self.nodes[best as usize];
        Some((node.key.as_ref(), node.slot))
    }

    fn len(&self) -> usize {
        self.size(self.root) as usize
    }

    fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
        self.root = NIL;
        self.key_bytes = 0;
    }

    fn mem_usage(&self) -> usize {
        self.nodes.capacity() * std::mem::size_of::<TreeNode>() + self.key_bytes
    }
}
