//! Borrow Tree
//!
//! Per-region record of pointers derived from other pointers.
//!
//! # Structure
//! ```text
//!            ROOT (minted tags)
//!           /    \
//!        B1        B2        B1, B2 are siblings
//!        |
//!        B3                  B3 descends from B1
//! ```
//!
//! A write through a borrow invalidates every borrow that is neither one
//! of its ancestors nor one of its descendants: a write through B2 kills
//! B1 and B3, a write through B3 kills B2. The root is an ancestor of
//! everything and is never invalidated this way; only revocation retires
//! it.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::fmt;

/// Identifier of one borrow inside a region.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct BorrowId(u64);

impl BorrowId {
    /// The borrow every minted tag starts from.
    pub const ROOT: Self = Self(0);

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_root(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for BorrowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// Live borrows of one region and their parents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BorrowTree {
    /// Child to parent, for live borrows only. The root is implicit.
    parents: BTreeMap<BorrowId, BorrowId>,
    /// Next id to hand out; ids are never reused within a region.
    next: u64,
}

impl BorrowTree {
    pub const fn new() -> Self {
        Self {
            parents: BTreeMap::new(),
            next: 1,
        }
    }

    /// Check whether `borrow` is still usable.
    #[inline]
    pub fn is_live(&self, borrow: BorrowId) -> bool {
        borrow.is_root() || self.parents.contains_key(&borrow)
    }

    /// Number of live borrows, the root excluded.
    #[inline]
    pub fn len(&self) -> usize {
        self.parents.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    /// Parent of a live, non-root borrow.
    #[inline]
    pub fn parent(&self, borrow: BorrowId) -> Option<BorrowId> {
        self.parents.get(&borrow).copied()
    }

    /// Derive a child of `parent`. The caller checks that `parent` is live.
    pub(crate) fn derive(&mut self, parent: BorrowId) -> BorrowId {
        let child = BorrowId(self.next);
        self.next += 1;
        self.parents.insert(child, parent);
        child
    }

    /// Check whether `ancestor` lies on the path from `node` to the root
    /// (a node is its own ancestor).
    pub fn is_ancestor(&self, ancestor: BorrowId, node: BorrowId) -> bool {
        let mut current = node;
        loop {
            if current == ancestor {
                return true;
            }
            match self.parents.get(&current) {
                Some(&parent) => current = parent,
                None => return false,
            }
        }
    }

    /// Drop every borrow unrelated to `writer`, returning how many went.
    pub(crate) fn invalidate_foreign(&mut self, writer: BorrowId) -> usize {
        let foreign: Vec<BorrowId> = self
            .parents
            .keys()
            .copied()
            .filter(|&node| !self.is_ancestor(node, writer) && !self.is_ancestor(writer, node))
            .collect();

        for node in &foreign {
            self.parents.remove(node);
        }
        foreign.len()
    }

    /// Drop every borrow; the root stays.
    pub(crate) fn clear(&mut self) {
        self.parents.clear();
    }
}

impl Default for BorrowTree {
    fn default() -> Self {
        Self::new()
    }
}
