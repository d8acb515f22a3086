//! Stale proof repair.
//!
//! A proof produced against an older root is brought up to date by replaying the change logs
//! written since that root, oldest first. Every replayed write to another leaf replaces exactly
//! one node of the proof (the node at the level where the two leaf paths meet); a replayed write
//! to the proven leaf itself replaces the expected leaf. The repaired proof is accepted only if it
//! hashes to the current root.
//!
//! Everything here is a pure function over borrowed change logs, so the buffer is never mutated
//! while a proof is being replayed.

use tracing::{debug, warn};

use crate::changelog::{ChangeLog, ChangeLogBuffer};
use crate::error::{Result, RollError};
use crate::node::{Node, recompute};

/// Where replay started from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
  /// The claimed root was found in the buffer, `age` writes before the newest entry.
  Root { age: u64 },
  /// The claimed root was evicted and every buffered entry was replayed.
  FullBuffer,
}

/// A proof after replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replayed {
  /// The leaf the current tree holds at the proven index according to the replayed writes.
  pub leaf: Node,
  pub proof: Vec<Node>,
  /// Whether no replayed write touched the proven leaf with a different value.
  pub leaf_unchanged: bool,
}

/// Replay `entries` (oldest first) over the proof of `leaf` at `leaf_index`.
pub fn fast_forward<'a, I>(entries: I, leaf_index: u32, leaf: Node, proof: &[Node]) -> Replayed
where
  I: IntoIterator<Item = &'a ChangeLog>,
{
  let mut proof = proof.to_vec();
  let mut updated_leaf = leaf;
  for entry in entries {
    entry.update_proof_or_leaf(leaf_index, &mut proof, &mut updated_leaf);
  }
  Replayed { leaf: updated_leaf, proof, leaf_unchanged: updated_leaf == leaf }
}

/// Decide where to start replaying from for a proof claimed against `claimed_root`.
pub fn locate(buffer: &ChangeLogBuffer, claimed_root: &Node, allow_inferred_proof: bool) -> Result<Anchor> {
  match buffer.find_root(claimed_root) {
    Some(age) => Ok(Anchor::Root { age }),
    None if allow_inferred_proof => {
      debug!(buffer_size = buffer.len(), "claimed root not in change log, replaying full buffer");
      Ok(Anchor::FullBuffer)
    }
    None => Err(RollError::RootNotFound),
  }
}

/// Repair the proof of `leaf` at `leaf_index` claimed against `claimed_root` so that it is valid for
/// the newest root of `buffer`.
///
/// A proof that already hashes to the current root is accepted as is, whatever root it claims.
/// Otherwise fails with `LeafContentsModified` if a buffered write changed the leaf after the proof
/// was taken, and with `InvalidProof` if the repaired proof does not reach the current root.
pub fn replay(
  buffer: &ChangeLogBuffer,
  claimed_root: &Node,
  leaf: Node,
  proof: &[Node],
  leaf_index: u32,
  allow_inferred_proof: bool,
) -> Result<Replayed> {
  if recompute(leaf, proof, leaf_index) == buffer.newest().root {
    return Ok(Replayed { leaf, proof: proof.to_vec(), leaf_unchanged: true });
  }
  let anchor = locate(buffer, claimed_root, allow_inferred_proof)?;
  let replayed = match anchor {
    Anchor::Root { age } => {
      debug!(age, leaf_index, "fast-forwarding proof");
      fast_forward(buffer.newer_than(age), leaf_index, leaf, proof)
    }
    Anchor::FullBuffer => fast_forward(buffer.oldest_first(), leaf_index, leaf, proof),
  };
  if !replayed.leaf_unchanged {
    debug!(leaf_index, "leaf was modified by a buffered write");
    return Err(RollError::LeafContentsModified);
  }
  if recompute(replayed.leaf, &replayed.proof, leaf_index) != buffer.newest().root {
    match anchor {
      Anchor::FullBuffer => warn!(
        leaf_index,
        buffer_size = buffer.len(),
        "rejecting proof: claimed root is older than the change log buffer and cannot be reconstructed"
      ),
      Anchor::Root { age } => debug!(leaf_index, age, "rejecting proof: replayed proof does not match root"),
    }
    return Err(RollError::InvalidProof);
  }
  Ok(replayed)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::node::{EMPTY, empty_node, hash_leaf};
  use crate::shadow::ShadowTree;

  const DEPTH: u8 = 4;

  /// Record a write to `tree` as a change log, the way the authoritative tree does.
  fn write(tree: &mut ShadowTree, index: usize, leaf: Node) -> ChangeLog {
    let proof = tree.proof(index);
    tree.update(leaf, index);
    ChangeLog::from_proof(index as u32, leaf, &proof)
  }

  fn genesis(tree: &ShadowTree) -> ChangeLog {
    let path = (0..tree.depth()).map(|level| empty_node(level as u32)).collect();
    ChangeLog::new(tree.root(), path, 0)
  }

  #[test]
  fn fast_forward_without_entries_is_identity() {
    let proof = vec![hash_leaf(b"x"); DEPTH as usize];
    let replayed = fast_forward(std::iter::empty(), 3, EMPTY, &proof);
    assert_eq!(proof, replayed.proof);
    assert!(replayed.leaf_unchanged);
  }

  #[test]
  fn fast_forward_repairs_disjoint_writes() {
    let mut tree = ShadowTree::new(DEPTH);
    let stale_proof = tree.proof(3);
    let entries = [write(&mut tree, 12, hash_leaf(b"a")), write(&mut tree, 2, hash_leaf(b"b"))];

    let replayed = fast_forward(entries.iter(), 3, EMPTY, &stale_proof);
    assert!(replayed.leaf_unchanged);
    assert_eq!(tree.proof(3), replayed.proof);
    assert_eq!(tree.root(), recompute(EMPTY, &replayed.proof, 3));
  }

  #[test]
  fn fast_forward_tracks_writes_to_the_same_leaf() {
    let mut tree = ShadowTree::new(DEPTH);
    let stale_proof = tree.proof(5);
    let entries = [write(&mut tree, 5, hash_leaf(b"taken"))];
    let replayed = fast_forward(entries.iter(), 5, EMPTY, &stale_proof);
    assert!(!replayed.leaf_unchanged);
    assert_eq!(hash_leaf(b"taken"), replayed.leaf);
  }

  #[test]
  fn replay_from_located_root() {
    let mut tree = ShadowTree::new(DEPTH);
    let mut buffer = ChangeLogBuffer::new(DEPTH as usize, 8);
    buffer.reset(genesis(&tree));
    let claimed_root = tree.root();
    let stale_proof = tree.proof(9);
    for (i, index) in [0usize, 15, 8].into_iter().enumerate() {
      buffer.push(write(&mut tree, index, hash_leaf(&[i as u8])));
    }

    assert_eq!(Anchor::Root { age: 3 }, locate(&buffer, &claimed_root, false).unwrap());
    let replayed = replay(&buffer, &claimed_root, EMPTY, &stale_proof, 9, false).unwrap();
    assert_eq!(tree.proof(9), replayed.proof);

    // a non-empty claim for the same leaf cannot be repaired into validity
    let forged = replay(&buffer, &claimed_root, hash_leaf(b"forged"), &stale_proof, 9, false);
    assert!(matches!(forged, Err(RollError::InvalidProof)));
  }

  #[test]
  fn replay_without_known_root() {
    let mut tree = ShadowTree::new(DEPTH);
    let mut buffer = ChangeLogBuffer::new(DEPTH as usize, 2);
    buffer.reset(genesis(&tree));
    let claimed_root = tree.root();
    let stale_proof = tree.proof(1);

    // 15 shares no ancestor below the root with 1; both writes patch the same top level
    for i in 0..3u8 {
      buffer.push(write(&mut tree, 15, hash_leaf(&[i])));
    }
    assert!(matches!(locate(&buffer, &claimed_root, false), Err(RollError::RootNotFound)));
    assert_eq!(Anchor::FullBuffer, locate(&buffer, &claimed_root, true).unwrap());
    let replayed = replay(&buffer, &claimed_root, EMPTY, &stale_proof, 1, true).unwrap();
    assert_eq!(tree.proof(1), replayed.proof);
  }

  #[test]
  fn fresh_proof_needs_no_known_root() {
    let mut tree = ShadowTree::new(DEPTH);
    let mut buffer = ChangeLogBuffer::new(DEPTH as usize, 2);
    buffer.reset(genesis(&tree));
    buffer.push(write(&mut tree, 6, hash_leaf(b"six")));

    let replayed = replay(&buffer, &hash_leaf(b"unknown"), hash_leaf(b"six"), &tree.proof(6), 6, false).unwrap();
    assert_eq!(tree.proof(6), replayed.proof);
    assert_eq!(hash_leaf(b"six"), replayed.leaf);
  }

  #[test]
  fn replay_rejects_when_evicted_writes_are_needed() {
    let mut tree = ShadowTree::new(DEPTH);
    let mut buffer = ChangeLogBuffer::new(DEPTH as usize, 2);
    buffer.reset(genesis(&tree));
    let claimed_root = tree.root();
    let stale_proof = tree.proof(1);

    // the write to leaf 0 changes the sibling of leaf 1 and is then evicted
    buffer.push(write(&mut tree, 0, hash_leaf(b"neighbour")));
    buffer.push(write(&mut tree, 15, hash_leaf(b"far")));
    buffer.push(write(&mut tree, 14, hash_leaf(b"far too")));

    let result = replay(&buffer, &claimed_root, EMPTY, &stale_proof, 1, true);
    assert!(matches!(result, Err(RollError::InvalidProof)));
  }
}
