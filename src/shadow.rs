use crate::error::{Result, RollError};
use crate::node::{EMPTY, MAX_SUPPORTED_DEPTH, Node, empty_node, hash_internal};

/// Complete in-memory binary hash tree mirroring an authoritative concurrent tree.
///
/// Nodes are stored level by level: `levels[0]` holds the `2^depth` leaves and `levels[depth]` the
/// root alone. Proof generation only borrows the tree, so any number of threads may build proofs
/// from a shared reference while no update is in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowTree {
  levels: Vec<Vec<Node>>,
}

impl ShadowTree {
  /// Tree of the given depth with every leaf empty.
  pub fn new(depth: u8) -> Self {
    assert!(depth as usize <= MAX_SUPPORTED_DEPTH);
    let levels = (0..=depth as u32).map(|level| vec![empty_node(level); 1 << (depth as u32 - level)]).collect();
    ShadowTree { levels }
  }

  /// Build the whole tree bottom-up from its leaves. The number of leaves fixes the depth and must
  /// be a power of two.
  pub fn build(leaves: &[Node]) -> Result<Self> {
    if !leaves.len().is_power_of_two() || leaves.len() > 1 << MAX_SUPPORTED_DEPTH {
      return Err(RollError::InvalidConfig(format!("{} leaves do not form a complete binary tree", leaves.len())));
    }
    let mut levels = vec![leaves.to_vec()];
    while levels[levels.len() - 1].len() > 1 {
      let below = &levels[levels.len() - 1];
      let above = below.chunks_exact(2).map(|pair| hash_internal(&pair[0], &pair[1])).collect::<Vec<_>>();
      levels.push(above);
    }
    Ok(ShadowTree { levels })
  }

  /// Tree of the given depth whose first leaves are `leaves` and the rest empty.
  pub fn with_leaves(depth: u8, leaves: &[Node]) -> Result<Self> {
    let capacity = 1usize << depth;
    if leaves.len() > capacity {
      return Err(RollError::IndexOutOfBounds { index: leaves.len() as u32, limit: capacity as u64 });
    }
    let mut all = leaves.to_vec();
    all.resize(capacity, EMPTY);
    Self::build(&all)
  }

  pub fn depth(&self) -> usize {
    self.levels.len() - 1
  }

  pub fn size(&self) -> usize {
    self.levels[0].len()
  }

  pub fn root(&self) -> Node {
    self.levels[self.depth()][0]
  }

  pub fn leaf(&self, index: usize) -> Node {
    self.levels[0][index]
  }

  pub fn leaves(&self) -> &[Node] {
    &self.levels[0]
  }

  /// Node at `position` within `level` (0 = leaves).
  pub fn node(&self, level: usize, position: usize) -> Node {
    self.levels[level][position]
  }

  /// Overwrite one leaf and recompute its ancestors. Returns the new root.
  pub fn update(&mut self, leaf: Node, index: usize) -> Node {
    self.levels[0][index] = leaf;
    let mut position = index;
    for level in 1..=self.depth() {
      position >>= 1;
      let below = &self.levels[level - 1];
      let parent = hash_internal(&below[2 * position], &below[2 * position + 1]);
      self.levels[level][position] = parent;
    }
    self.root()
  }

  /// Siblings of every node on the path from leaf `index` up to (excluding) the root.
  pub fn proof(&self, index: usize) -> Vec<Node> {
    (0..self.depth()).map(|level| self.levels[level][(index >> level) ^ 1]).collect()
  }

  /// Like `proof`, without the top `canopy_depth` siblings a canopy holder supplies itself.
  pub fn truncated_proof(&self, index: usize, canopy_depth: usize) -> Vec<Node> {
    let mut proof = self.proof(index);
    proof.truncate(self.depth().saturating_sub(canopy_depth));
    proof
  }
}
