//! Cache of the upper levels of a tree.
//!
//! Holding the top `C` levels of a depth `D` tree lets writers submit proofs of only `D - C` nodes.
//! Nodes are kept in heap order without the root: tree node `n` (root = 1, children of `n` are `2n`
//! and `2n + 1`) lives at `nodes[n - 2]`, so a canopy of depth `C` has `2^(C+1) - 2` nodes. A slot
//! that was never written holds `EMPTY` and stands for the empty subtree of its level.
use std::io::{Read, Write};
use tracing::debug;

use crate::changelog::ChangeLogEvent;
use crate::config::TreeConfig;
use crate::error::{Result, RollError};
use crate::node::{EMPTY, MAX_SUPPORTED_DEPTH, Node, empty_node, hash_internal};
use crate::shadow::ShadowTree;
use crate::{Serializable, read_node};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canopy {
  max_depth: usize,
  nodes: Vec<Node>,
}

impl Canopy {
  /// Empty canopy caching `canopy_depth` levels of a `max_depth` tree.
  pub fn new(max_depth: u8, canopy_depth: u8) -> Self {
    debug_assert!(canopy_depth <= max_depth);
    Canopy { max_depth: max_depth as usize, nodes: vec![EMPTY; (1 << (canopy_depth as usize + 1)) - 2] }
  }

  /// Canopy over existing cached nodes. The node count must be two less than a power of two and no
  /// more than the tree has below its root.
  pub fn from_nodes(max_depth: u8, nodes: Vec<Node>) -> Result<Self> {
    let max_depth = max_depth as usize;
    let full = nodes.len() + 2;
    if !full.is_power_of_two() {
      return Err(RollError::CanopyLengthMismatch(format!("{} nodes is not 2 less than a power of 2", nodes.len())));
    }
    if max_depth > MAX_SUPPORTED_DEPTH || full > 1 << (max_depth + 1) {
      return Err(RollError::CanopyLengthMismatch(format!(
        "{} nodes exceed the {} a depth {max_depth} tree has",
        nodes.len(),
        (1usize << (max_depth + 1)) - 2
      )));
    }
    Ok(Canopy { max_depth, nodes })
  }

  /// Canopy holding the current top `canopy_depth` levels of `tree`, at most the whole tree below
  /// its root.
  pub fn from_tree(tree: &ShadowTree, canopy_depth: usize) -> Self {
    let max_depth = tree.depth();
    let canopy_depth = canopy_depth.min(max_depth);
    let nodes = (2..1usize << (canopy_depth + 1))
      .map(|n| {
        let k = Self::height_of(n);
        tree.node(max_depth - k, n - (1 << k))
      })
      .collect();
    Canopy { max_depth, nodes }
  }

  /// Number of cached levels below the root.
  pub fn depth(&self) -> usize {
    ((self.nodes.len() + 2).trailing_zeros() - 1) as usize
  }

  pub fn max_depth(&self) -> usize {
    self.max_depth
  }

  pub fn nodes(&self) -> &[Node] {
    &self.nodes
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  /// Distance of heap node `n` from the root.
  #[inline]
  fn height_of(n: usize) -> usize {
    (usize::BITS - 1 - n.leading_zeros()) as usize
  }

  /// Value of heap node `n`, inferring an empty subtree for an unwritten slot.
  pub fn node(&self, n: usize) -> Node {
    match self.nodes[n - 2] {
      EMPTY => empty_node((self.max_depth - Self::height_of(n)) as u32),
      node => node,
    }
  }

  /// Refresh the cached nodes on the path of the write described by `event`.
  pub fn update_from_event(&mut self, event: Option<&ChangeLogEvent>) {
    if let Some(event) = event {
      // the event path runs leaf to root; skip the root, which is not cached
      for path_node in event.path.iter().rev().skip(1).take(self.depth()) {
        self.nodes[path_node.index as usize - 2] = path_node.node;
      }
    }
  }

  /// Extend a truncated proof for leaf `index` with the cached siblings above it. Only as many
  /// nodes are added as are needed to reach the tree depth.
  pub fn fill_in_proof(&self, index: u32, proof: &mut Vec<Node>) {
    if index as u64 >= 1 << self.max_depth {
      return;
    }
    let depth = self.depth();
    let mut n = ((1usize << self.max_depth) + index as usize) >> (self.max_depth - depth);
    let mut inferred = Vec::with_capacity(depth);
    while n > 1 {
      inferred.push(self.node(n ^ 1));
      n >>= 1;
    }
    let overlap = (proof.len() + inferred.len()).saturating_sub(self.max_depth);
    proof.extend(inferred.into_iter().skip(overlap));
  }

  /// Write consecutive nodes of the lowest cached level starting at `start_index` and recompute
  /// every cached ancestor of them.
  pub fn set_leaf_nodes(&mut self, start_index: u32, nodes: &[Node]) -> Result<()> {
    if nodes.is_empty() {
      return Ok(());
    }
    let depth = self.depth();
    let width = 1usize << depth;
    if depth == 0 || start_index as usize + nodes.len() > width {
      return Err(RollError::IndexOutOfBounds {
        index: u32::try_from(start_index as u64 + nodes.len() as u64 - 1).unwrap_or(u32::MAX),
        limit: if depth == 0 { 0 } else { width as u64 },
      });
    }
    let mut start = width + start_index as usize;
    let mut end = start + nodes.len() - 1;
    self.nodes[start - 2..=end - 2].copy_from_slice(nodes);
    for _ in 1..depth {
      start >>= 1;
      end >>= 1;
      for n in start..=end {
        self.nodes[n - 2] = hash_internal(&self.node(2 * n), &self.node(2 * n + 1));
      }
    }
    debug!(start_index, count = nodes.len(), "canopy leaf nodes set");
    Ok(())
  }

  /// Fail unless the two top cached nodes hash to `root`.
  pub fn check_root(&self, root: &Node) -> Result<()> {
    if self.is_empty() {
      return Ok(());
    }
    if hash_internal(&self.node(2), &self.node(3)) != *root {
      return Err(RollError::CanopyRootMismatch);
    }
    Ok(())
  }

  /// Fail if any cached node lies entirely to the right of leaf `index`.
  pub fn check_no_nodes_to_right_of_index(&self, index: u32) -> Result<()> {
    if index as u64 >= 1 << self.max_depth {
      return Err(RollError::IndexOutOfBounds { index, limit: 1 << self.max_depth });
    }
    for k in 1..=self.depth() {
      let on_path = ((1usize << self.max_depth) + index as usize) >> (self.max_depth - k);
      if self.nodes[on_path + 1 - 2..(1 << (k + 1)) - 2].iter().any(|node| *node != EMPTY) {
        return Err(RollError::CanopyNodesToRightOfIndex { index });
      }
    }
    Ok(())
  }

  pub fn clear(&mut self) {
    self.nodes.fill(EMPTY);
  }
}

impl Serializable for Canopy {
  fn write<W: Write>(&self, w: &mut W) -> Result<usize> {
    for node in self.nodes.iter() {
      w.write_all(node)?;
    }
    Ok(self.nodes.len() * size_of::<Node>())
  }

  fn read<R: Read>(r: &mut R, config: &TreeConfig) -> Result<Self> {
    let count = (1usize << (config.canopy_depth as usize + 1)) - 2;
    let nodes = (0..count).map(|_| read_node(r)).collect::<std::io::Result<Vec<_>>>()?;
    Canopy::from_nodes(config.max_depth, nodes)
  }
}
