use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::account::TreeId;
use crate::config::TreeConfig;
use crate::error::{Result, RollError};
use crate::node::{EMPTY, Node, hash_to_parent};
use crate::{Serializable, read_node};

/// Record of one accepted write: the root it produced and the nodes on the written leaf's path.
///
/// `path[0]` is the leaf itself and `path[level]` the ancestor at that level; the root is kept apart.
/// For any other leaf, the node this entry holds at the level where both paths meet is exactly the
/// sibling that leaf's proof needs after the write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeLog {
  pub root: Node,
  pub path: Vec<Node>,
  pub index: u32,
}

impl ChangeLog {
  pub fn new(root: Node, path: Vec<Node>, index: u32) -> Self {
    ChangeLog { root, path, index }
  }

  pub fn empty(max_depth: usize) -> Self {
    ChangeLog { root: EMPTY, path: vec![EMPTY; max_depth], index: 0 }
  }

  /// Build the entry for writing `leaf` at `index`, where `proof` is valid for the current tree.
  pub fn from_proof(index: u32, leaf: Node, proof: &[Node]) -> Self {
    let mut path = Vec::with_capacity(proof.len());
    let mut node = leaf;
    for (level, sibling) in proof.iter().enumerate() {
      path.push(node);
      hash_to_parent(&mut node, sibling, (index >> level) & 1 == 0);
    }
    ChangeLog { root: node, path, index }
  }

  pub fn leaf(&self) -> Node {
    self.path[0]
  }

  pub fn depth(&self) -> usize {
    self.path.len()
  }

  /// Bring a proof for `leaf_index` up to date with this write. A write to another leaf replaces
  /// the one proof node at the level where the two paths meet; a write to the same leaf replaces
  /// the leaf instead.
  pub fn update_proof_or_leaf(&self, leaf_index: u32, proof: &mut [Node], leaf: &mut Node) {
    if leaf_index == self.index {
      *leaf = self.leaf();
    } else {
      let level = critbit(leaf_index, self.index);
      proof[level] = self.path[level];
    }
  }

  fn encoded_len(max_depth: usize) -> usize {
    32 + 32 * max_depth + 4 + 4
  }
}

/// Level at which the paths of two distinct leaves meet: the highest bit in which their indices
/// differ.
#[inline]
pub fn critbit(a: u32, b: u32) -> usize {
  debug_assert_ne!(a, b);
  (u32::BITS - 1 - (a ^ b).leading_zeros()) as usize
}

impl Serializable for ChangeLog {
  fn write<W: Write>(&self, w: &mut W) -> Result<usize> {
    w.write_all(&self.root)?;
    for node in self.path.iter() {
      w.write_all(node)?;
    }
    w.write_u32::<LittleEndian>(self.index)?;
    w.write_u32::<LittleEndian>(0)?;
    Ok(Self::encoded_len(self.path.len()))
  }

  fn read<R: Read>(r: &mut R, config: &TreeConfig) -> Result<Self> {
    let root = read_node(r)?;
    let path = (0..config.max_depth).map(|_| read_node(r)).collect::<std::io::Result<Vec<_>>>()?;
    let index = r.read_u32::<LittleEndian>()?;
    let _padding = r.read_u32::<LittleEndian>()?;
    Ok(ChangeLog { root, path, index })
  }
}

/// Fixed-capacity ring of the most recent change logs.
///
/// `active_index` is the slot of the newest entry and `buffer_size` the number of valid entries.
/// Entries are addressed by age (0 = newest) through `position`, the only place slot arithmetic
/// happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeLogBuffer {
  entries: Vec<ChangeLog>,
  active_index: u64,
  buffer_size: u64,
}

impl ChangeLogBuffer {
  pub fn new(max_depth: usize, capacity: usize) -> Self {
    assert!(capacity > 0);
    ChangeLogBuffer { entries: vec![ChangeLog::empty(max_depth); capacity], active_index: 0, buffer_size: 0 }
  }

  pub fn capacity(&self) -> u64 {
    self.entries.len() as u64
  }

  pub fn active_index(&self) -> u64 {
    self.active_index
  }

  /// Number of valid entries, saturating at the capacity.
  pub fn len(&self) -> u64 {
    self.buffer_size
  }

  pub fn is_empty(&self) -> bool {
    self.buffer_size == 0
  }

  fn position(&self, age: u64) -> usize {
    debug_assert!(age < self.capacity());
    ((self.active_index + self.capacity() - age) % self.capacity()) as usize
  }

  pub fn newest(&self) -> &ChangeLog {
    &self.entries[self.active_index as usize]
  }

  /// Entry written `age` writes before the newest one.
  pub fn get(&self, age: u64) -> Option<&ChangeLog> {
    if age < self.buffer_size { Some(&self.entries[self.position(age)]) } else { None }
  }

  /// Forget all history and start over from `entry`.
  pub fn reset(&mut self, entry: ChangeLog) {
    let depth = entry.depth();
    self.entries.iter_mut().for_each(|e| *e = ChangeLog::empty(depth));
    self.entries[0] = entry;
    self.active_index = 0;
    self.buffer_size = 1;
  }

  /// Append `entry` as the newest record, overwriting the oldest one when the ring is full.
  pub fn push(&mut self, entry: ChangeLog) {
    // the slot after the newest one is the oldest
    let next = self.position(self.capacity() - 1);
    self.entries[next] = entry;
    self.active_index = next as u64;
    if self.buffer_size < self.capacity() {
      self.buffer_size += 1;
    }
  }

  /// Age of the most recent entry whose root equals `root`.
  pub fn find_root(&self, root: &Node) -> Option<u64> {
    (0..self.buffer_size).find(|age| self.entries[self.position(*age)].root == *root)
  }

  /// Most recent write to `leaf_index` still in the buffer, with its age.
  pub fn lookup(&self, leaf_index: u32) -> Option<(u64, &ChangeLog)> {
    (0..self.buffer_size).map(|age| (age, &self.entries[self.position(age)])).find(|(_, e)| e.index == leaf_index)
  }

  /// Entries strictly newer than the one at `age`, oldest first.
  pub fn newer_than(&self, age: u64) -> impl Iterator<Item = &ChangeLog> {
    let age = age.min(self.buffer_size);
    (0..age).rev().map(move |a| &self.entries[self.position(a)])
  }

  /// All valid entries, oldest first.
  pub fn oldest_first(&self) -> impl Iterator<Item = &ChangeLog> {
    self.newer_than(self.buffer_size)
  }

  /// All valid entries, newest first.
  pub fn newest_first(&self) -> impl Iterator<Item = &ChangeLog> {
    (0..self.buffer_size).map(move |a| &self.entries[self.position(a)])
  }

  pub(crate) fn encoded_len(config: &TreeConfig) -> usize {
    8 + 8 + config.max_buffer_size as usize * ChangeLog::encoded_len(config.max_depth as usize)
  }
}

impl Serializable for ChangeLogBuffer {
  fn write<W: Write>(&self, w: &mut W) -> Result<usize> {
    w.write_u64::<LittleEndian>(self.active_index)?;
    w.write_u64::<LittleEndian>(self.buffer_size)?;
    let mut len = 16;
    for entry in self.entries.iter() {
      len += entry.write(w)?;
    }
    Ok(len)
  }

  fn read<R: Read>(r: &mut R, config: &TreeConfig) -> Result<Self> {
    let active_index = r.read_u64::<LittleEndian>()?;
    let buffer_size = r.read_u64::<LittleEndian>()?;
    let capacity = config.max_buffer_size as u64;
    if active_index >= capacity || buffer_size > capacity {
      return Err(RollError::InvalidEncoding(format!(
        "change log cursor {active_index}/{buffer_size} does not fit capacity {capacity}"
      )));
    }
    let entries = (0..capacity).map(|_| ChangeLog::read(r, config)).collect::<Result<Vec<_>>>()?;
    Ok(ChangeLogBuffer { entries, active_index, buffer_size })
  }
}

/// A node on the path of a write, tagged with its position in the tree (root = 1, the children of
/// node `i` are `2i` and `2i + 1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathNode {
  pub node: Node,
  pub index: u32,
}

/// Published after every accepted write so that indexers and canopies can follow the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeLogEvent {
  pub id: TreeId,
  /// Leaf first, root last.
  pub path: Vec<PathNode>,
  pub seq: u64,
  pub index: u32,
}

impl ChangeLogEvent {
  pub fn new(id: TreeId, change_log: &ChangeLog, seq: u64) -> Self {
    let depth = change_log.depth() as u32;
    let mut path = change_log
      .path
      .iter()
      .enumerate()
      .map(|(level, node)| PathNode { node: *node, index: (1 << (depth - level as u32)) + (change_log.index >> level) })
      .collect::<Vec<_>>();
    path.push(PathNode { node: change_log.root, index: 1 });
    ChangeLogEvent { id, path, seq, index: change_log.index }
  }

  pub fn root(&self) -> Node {
    self.path.last().map(|p| p.node).unwrap_or(EMPTY)
  }

  pub fn leaf(&self) -> Node {
    self.path.first().map(|p| p.node).unwrap_or(EMPTY)
  }
}
