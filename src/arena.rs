// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Allocation support: the allocator compatibility shims and the node arena
//! that owns everything decoded from function bodies.
//!
//! The shims give a uniform interface for allocation APIs that works with both
//! nightly Rust (using `core`) and stable Rust (using `allocator-api2`, the
//! conventional polyfill). The `nightly` cfg value is auto-detected and set in
//! the crate's build script.

#[cfg(nightly)]
pub use core::alloc::{AllocError, Allocator};

#[cfg(nightly)]
pub use ::alloc::alloc::Global;

#[cfg(nightly)]
pub use ::alloc::collections::TryReserveError;

#[cfg(nightly)]
pub use ::alloc::vec::Vec;

#[cfg(not(nightly))]
pub use allocator_api2::alloc::{AllocError, Allocator, Global};

#[cfg(not(nightly))]
pub use allocator_api2::collections::TryReserveError;

#[cfg(not(nightly))]
pub use allocator_api2::vec::Vec;

use crate::types::{LabelIdx, Node};

/// A handle to a node owned by a [`NodeArena`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NodeId(u32);

impl NodeId {
    /// The position of the node within its arena, which is also the order in
    /// which the node was decoded.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A handle to a contiguous run of branch depths owned by a [`NodeArena`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LabelRange {
    start: u32,
    len: u32,
}

impl LabelRange {
    pub const fn len(&self) -> usize {
        self.len as usize
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Append-only storage for decoded nodes and `br_table` targets.
///
/// Nodes are referred to by [`NodeId`] rather than by reference, so that
/// structural links (e.g., from a branch to the construct it targets) stay
/// valid while the arena grows. Nothing is freed before the arena itself.
#[derive(Debug)]
pub struct NodeArena<A: crate::Allocator> {
    nodes: Vec<Node, A>,
    labels: Vec<LabelIdx, A>,
}

impl<A: crate::Allocator> NodeArena<A> {
    pub fn new_in(alloc: A) -> Self {
        Self {
            nodes: Vec::new_in(alloc.clone()),
            labels: Vec::new_in(alloc),
        }
    }

    /// Takes ownership of a node, returning its handle.
    pub fn push_node(&mut self, node: Node) -> Result<NodeId, TryReserveError> {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.try_reserve(1)?;
        self.nodes.push(node); // No allocation with previous reservation.
        Ok(id)
    }

    // Reserves space for `count` more labels ahead of a sequence of
    // push_label() calls.
    pub(crate) fn reserve_labels(&mut self, count: usize) -> Result<(), TryReserveError> {
        self.labels.try_reserve(count)
    }

    pub(crate) fn push_label(&mut self, label: LabelIdx) -> Result<(), TryReserveError> {
        self.labels.try_reserve(1)?;
        self.labels.push(label);
        Ok(())
    }

    // The range of labels pushed since `start`, a prior value of
    // label_count().
    pub(crate) fn labels_since(&self, start: usize) -> LabelRange {
        LabelRange {
            start: start as u32,
            len: (self.labels.len() - start) as u32,
        }
    }

    pub(crate) fn label_count(&self) -> usize {
        self.labels.len()
    }

    /// Returns the node with the given handle, if it was issued by this arena.
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    /// Returns the labels of the given range, if it was issued by this arena.
    pub fn labels(&self, range: LabelRange) -> Option<&[LabelIdx]> {
        let start = range.start as usize;
        self.labels.get(start..start + range.len())
    }

    /// The number of nodes decoded so far.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes in decode order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (NodeId(i as u32), node))
    }
}
