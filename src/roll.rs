//! The authoritative concurrent Merkle tree.
//!
//! A [`MerkleRoll`] does not store the leaves. It keeps the current root, a ring of the most recent
//! writes ([`ChangeLogBuffer`]), and the proof of the rightmost written leaf so that appends need no
//! proof from the caller. Writes are strictly serial: each one either commits completely (new
//! change log, rightmost proof and sequence number together) or leaves the roll untouched.
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};
use tracing::{debug, warn};

use crate::changelog::{ChangeLog, ChangeLogBuffer};
use crate::config::TreeConfig;
use crate::error::{Result, RollError};
use crate::node::{EMPTY, Node, empty_node, fill_in_proof, hash_to_parent, recompute, to_hex};
use crate::replay::replay;
use crate::{Serializable, read_node};

/// Proof of the rightmost written leaf. `index` is one past that leaf, i.e. the index the next
/// append writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
  pub proof: Vec<Node>,
  pub leaf: Node,
  pub index: u32,
}

impl Path {
  fn empty(max_depth: usize) -> Self {
    Path { proof: (0..max_depth as u32).map(empty_node).collect(), leaf: EMPTY, index: 0 }
  }
}

impl Serializable for Path {
  fn write<W: Write>(&self, w: &mut W) -> Result<usize> {
    for node in self.proof.iter() {
      w.write_all(node)?;
    }
    w.write_all(&self.leaf)?;
    w.write_u32::<LittleEndian>(self.index)?;
    w.write_u32::<LittleEndian>(0)?;
    Ok(32 * self.proof.len() + 32 + 8)
  }

  fn read<R: Read>(r: &mut R, config: &TreeConfig) -> Result<Self> {
    let proof = (0..config.max_depth).map(|_| read_node(r)).collect::<std::io::Result<Vec<_>>>()?;
    let leaf = read_node(r)?;
    let index = r.read_u32::<LittleEndian>()?;
    let _padding = r.read_u32::<LittleEndian>()?;
    Ok(Path { proof, leaf, index })
  }
}

pub struct InitializeWithRootArgs {
  pub root: Node,
  pub rightmost_leaf: Node,
  pub proof: Vec<Node>,
  pub index: u32,
}

pub struct SetLeafArgs {
  pub current_root: Node,
  pub previous_leaf: Node,
  pub new_leaf: Node,
  pub proof: Vec<Node>,
  pub index: u32,
}

pub struct FillEmptyOrAppendArgs {
  pub current_root: Node,
  pub leaf: Node,
  pub proof: Vec<Node>,
  pub index: u32,
}

pub struct ProveLeafArgs {
  pub current_root: Node,
  pub leaf: Node,
  pub proof: Vec<Node>,
  pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleRoll {
  max_depth: usize,
  sequence_number: u64,
  buffer: ChangeLogBuffer,
  rightmost_proof: Path,
}

impl MerkleRoll {
  /// Uninitialized roll shaped by `config`.
  pub fn new(config: &TreeConfig) -> Self {
    let max_depth = config.max_depth as usize;
    MerkleRoll {
      max_depth,
      sequence_number: 0,
      buffer: ChangeLogBuffer::new(max_depth, config.max_buffer_size as usize),
      rightmost_proof: Path::empty(max_depth),
    }
  }

  pub fn max_depth(&self) -> usize {
    self.max_depth
  }

  pub fn capacity(&self) -> u64 {
    1 << self.max_depth
  }

  /// Monotonic count of accepted writes.
  pub fn sequence_number(&self) -> u64 {
    self.sequence_number
  }

  pub fn buffer(&self) -> &ChangeLogBuffer {
    &self.buffer
  }

  pub fn rightmost_proof(&self) -> &Path {
    &self.rightmost_proof
  }

  /// Index the next append writes to.
  pub fn rightmost_index(&self) -> u32 {
    self.rightmost_proof.index
  }

  pub fn is_initialized(&self) -> bool {
    !self.buffer.is_empty()
  }

  pub fn root(&self) -> Node {
    self.buffer.newest().root
  }

  /// The change log of the newest write.
  pub fn change_log(&self) -> &ChangeLog {
    self.buffer.newest()
  }

  /// Start from the empty tree.
  pub fn initialize(&mut self) -> Result<Node> {
    if self.is_initialized() {
      return Err(RollError::TreeAlreadyInitialized);
    }
    let path = (0..self.max_depth as u32).map(empty_node).collect();
    self.buffer.reset(ChangeLog::new(empty_node(self.max_depth as u32), path, 0));
    self.rightmost_proof = Path::empty(self.max_depth);
    self.sequence_number = 0;
    Ok(self.root())
  }

  /// Start from a tree built elsewhere. Nothing about the leaves is verified except that
  /// `rightmost_leaf` hashes to `root` through `proof`; the caller vouches for the rest.
  pub fn initialize_with_root(&mut self, args: &InitializeWithRootArgs) -> Result<Node> {
    self.check_leaf_index(args.index)?;
    if self.is_initialized() {
      return Err(RollError::TreeAlreadyInitialized);
    }
    if args.proof.len() != self.max_depth || recompute(args.rightmost_leaf, &args.proof, args.index) != args.root {
      warn!(index = args.index, "rightmost proof does not match the initial root");
      return Err(RollError::InvalidProof);
    }
    self.buffer.reset(ChangeLog::from_proof(args.index, args.rightmost_leaf, &args.proof));
    self.rightmost_proof = Path { proof: args.proof.clone(), leaf: args.rightmost_leaf, index: args.index + 1 };
    self.sequence_number = 1;
    Ok(args.root)
  }

  /// Fails with `TreeNonEmpty` unless every leaf is empty.
  pub fn prove_tree_is_empty(&self) -> Result<()> {
    self.check_initialized()?;
    if self.root() != empty_node(self.max_depth as u32) {
      return Err(RollError::TreeNonEmpty);
    }
    Ok(())
  }

  /// Replace `previous_leaf` at `index` with `new_leaf`. The proof may be stale: if its root was
  /// evicted from the buffer, it is replayed through every buffered write.
  pub fn set_leaf(&mut self, args: &SetLeafArgs) -> Result<Node> {
    self.check_writable_index(args.index, &args.previous_leaf)?;
    let proof = fill_in_proof(&args.proof, self.max_depth);
    self.try_apply_proof(args.current_root, args.previous_leaf, args.new_leaf, &proof, args.index, true)
  }

  /// Verify that `leaf` is at `index` without writing anything.
  pub fn prove_leaf(&self, args: &ProveLeafArgs) -> Result<()> {
    self.check_writable_index(args.index, &args.leaf)?;
    let proof = fill_in_proof(&args.proof, self.max_depth);
    replay(&self.buffer, &args.current_root, args.leaf, &proof, args.index, true)?;
    Ok(())
  }

  /// Write `leaf` to the next never-written index. No proof is needed: the roll keeps the proof
  /// of the rightmost leaf itself.
  pub fn append(&mut self, leaf: Node) -> Result<Node> {
    self.check_initialized()?;
    if leaf == EMPTY {
      return Err(RollError::CannotAppendEmptyNode);
    }
    let cursor = self.rightmost_proof.index;
    if cursor as u64 >= self.capacity() {
      return Err(RollError::TreeFull);
    }
    if cursor == 0 {
      return self.append_first(leaf);
    }

    // the new leaf's path joins the previous rightmost leaf's path at `intersection`; below it the
    // new leaf only has empty siblings
    let intersection = cursor.trailing_zeros() as usize;
    let previous = cursor - 1;
    let mut proof = self.rightmost_proof.proof.clone();
    let mut path = Vec::with_capacity(self.max_depth);
    let mut node = leaf;
    let mut intersection_node = self.rightmost_proof.leaf;
    for level in 0..self.max_depth {
      path.push(node);
      if level < intersection {
        let sibling = empty_node(level as u32);
        hash_to_parent(&mut intersection_node, &proof[level], (previous >> level) & 1 == 0);
        hash_to_parent(&mut node, &sibling, true);
        proof[level] = sibling;
      } else if level == intersection {
        hash_to_parent(&mut node, &intersection_node, false);
        proof[level] = intersection_node;
      } else {
        hash_to_parent(&mut node, &proof[level], (previous >> level) & 1 == 0);
      }
    }
    let entry = ChangeLog::new(node, path, cursor);
    Ok(self.commit(entry, Path { proof, leaf, index: cursor + 1 }))
  }

  /// The first append, made as a replace of leaf 0 of the empty tree.
  fn append_first(&mut self, leaf: Node) -> Result<Node> {
    let proof = self.rightmost_proof.proof.clone();
    let empty_root = recompute(EMPTY, &proof, 0);
    if empty_root != empty_node(self.max_depth as u32) {
      return Err(RollError::TreeAlreadyInitialized);
    }
    self.try_apply_proof(empty_root, EMPTY, leaf, &proof, 0, false)
  }

  /// Write `leaf` at `index` if that leaf is still empty, or append it if a buffered write has
  /// filled it since the proof was taken.
  pub fn fill_empty_or_append(&mut self, args: &FillEmptyOrAppendArgs) -> Result<Node> {
    self.check_writable_index(args.index, &EMPTY)?;
    let proof = fill_in_proof(&args.proof, self.max_depth);
    match self.try_apply_proof(args.current_root, EMPTY, args.leaf, &proof, args.index, false) {
      Err(RollError::LeafContentsModified) => {
        debug!(index = args.index, "leaf was filled concurrently, appending instead");
        self.append(args.leaf)
      }
      result => result,
    }
  }

  /// Whether `proof` proves `leaf` at `index` against the current root, without any replay.
  pub fn check_valid_proof(&self, leaf: Node, proof: &[Node], index: u32) -> bool {
    self.is_initialized()
      && (index as u64) < self.capacity()
      && recompute(leaf, &fill_in_proof(proof, self.max_depth), index) == self.root()
  }

  fn check_initialized(&self) -> Result<()> {
    if !self.is_initialized() {
      return Err(RollError::TreeNotInitialized);
    }
    Ok(())
  }

  fn check_leaf_index(&self, index: u32) -> Result<()> {
    if index as u64 >= self.capacity() {
      return Err(RollError::IndexOutOfBounds { index, limit: self.capacity() });
    }
    Ok(())
  }

  /// Checks shared by every operation that takes a proof for an existing leaf. Leaves at or past
  /// the append cursor have never been written, so only the empty leaf can be claimed there.
  fn check_writable_index(&self, index: u32, claimed_leaf: &Node) -> Result<()> {
    self.check_leaf_index(index)?;
    self.check_initialized()?;
    let cursor = self.rightmost_proof.index;
    if index > cursor {
      debug!(index, cursor, "index past the rightmost leaf");
      return Err(RollError::IndexOutOfBounds { index, limit: cursor as u64 });
    }
    if index == cursor && *claimed_leaf != EMPTY {
      warn!(index, cursor, "rejecting claim of a non-empty leaf that was never written");
      return Err(RollError::FabricatedLeaf { index });
    }
    Ok(())
  }

  fn try_apply_proof(
    &mut self,
    current_root: Node,
    leaf: Node,
    new_leaf: Node,
    proof: &[Node],
    index: u32,
    allow_inferred_proof: bool,
  ) -> Result<Node> {
    debug!(
      active_index = self.buffer.active_index(),
      rightmost_index = self.rightmost_proof.index,
      buffer_size = self.buffer.len(),
      leaf_index = index,
      "applying proof"
    );
    let replayed = replay(&self.buffer, &current_root, leaf, proof, index, allow_inferred_proof)?;
    let entry = ChangeLog::from_proof(index, new_leaf, &replayed.proof);
    let rightmost = self.next_rightmost_proof(&entry, &replayed.proof);
    Ok(self.commit(entry, rightmost))
  }

  /// The rightmost proof after `entry` is applied. A write at the cursor extends the tree by one
  /// leaf; any other write only moves one node of the rightmost proof (or its leaf).
  fn next_rightmost_proof(&self, entry: &ChangeLog, proof: &[Node]) -> Path {
    let mut rightmost = self.rightmost_proof.clone();
    if entry.index < rightmost.index {
      entry.update_proof_or_leaf(rightmost.index - 1, &mut rightmost.proof, &mut rightmost.leaf);
      rightmost
    } else {
      debug!(index = entry.index, "write extends the rightmost leaf");
      Path { proof: proof.to_vec(), leaf: entry.leaf(), index: entry.index + 1 }
    }
  }

  fn commit(&mut self, entry: ChangeLog, rightmost: Path) -> Node {
    let root = entry.root;
    self.buffer.push(entry);
    self.rightmost_proof = rightmost;
    self.sequence_number = self.sequence_number.saturating_add(1);
    debug!(
      seq = self.sequence_number,
      active_index = self.buffer.active_index(),
      buffer_size = self.buffer.len(),
      root = %to_hex(&root),
      "write committed"
    );
    root
  }

  /// Forget the whole tree.
  pub fn clear(&mut self) {
    let capacity = self.buffer.capacity() as usize;
    self.buffer = ChangeLogBuffer::new(self.max_depth, capacity);
    self.rightmost_proof = Path::empty(self.max_depth);
    self.sequence_number = 0;
  }

  pub(crate) fn encoded_len(config: &TreeConfig) -> usize {
    8 + ChangeLogBuffer::encoded_len(config) + 32 * config.max_depth as usize + 32 + 8
  }
}

impl Serializable for MerkleRoll {
  fn write<W: Write>(&self, w: &mut W) -> Result<usize> {
    w.write_u64::<LittleEndian>(self.sequence_number)?;
    let mut len = 8;
    len += self.buffer.write(w)?;
    len += self.rightmost_proof.write(w)?;
    Ok(len)
  }

  fn read<R: Read>(r: &mut R, config: &TreeConfig) -> Result<Self> {
    let sequence_number = r.read_u64::<LittleEndian>()?;
    let buffer = ChangeLogBuffer::read(r, config)?;
    let rightmost_proof = Path::read(r, config)?;
    if rightmost_proof.index as u64 > config.capacity() {
      return Err(RollError::InvalidEncoding(format!(
        "rightmost index {} exceeds the capacity {}",
        rightmost_proof.index,
        config.capacity()
      )));
    }
    Ok(MerkleRoll { max_depth: config.max_depth as usize, sequence_number, buffer, rightmost_proof })
  }
}
