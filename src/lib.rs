//! Concurrent Merkle tree with change-log replay.
//!
//! A [`MerkleRoll`] keeps the current root of a fixed-depth binary hash tree together with a ring
//! buffer of the most recent writes. A proof generated against an older root can still be applied
//! as long as the writes made since then are in the buffer: the proof is fast-forwarded through
//! them before it is checked against the current root. Off-chain parties mirror the tree with a
//! [`ShadowTree`] and build proofs with [`ProofBuilder`].
use std::io::{Read, Write};

pub mod account;
pub mod canopy;
pub mod changelog;
pub mod config;
pub mod error;
pub mod node;
pub mod proof;
pub mod replay;
pub mod roll;
pub mod shadow;

#[cfg(test)]
mod properties;

pub use account::{Authority, TreeAccount, TreeHeader, TreeId};
pub use canopy::Canopy;
pub use changelog::{ChangeLog, ChangeLogBuffer, ChangeLogEvent, PathNode};
pub use config::TreeConfig;
pub use error::{Result, RollError};
pub use node::{EMPTY, Node, empty_node, hash_internal, hash_leaf, recompute};
pub use proof::{ProofBuilder, ProofResponse, UpdateRequest};
pub use roll::{FillEmptyOrAppendArgs, InitializeWithRootArgs, MerkleRoll, ProveLeafArgs, SetLeafArgs};
pub use shadow::ShadowTree;

/// Fixed-size little-endian encoding of the persisted tree state.
///
/// The encoded length of every type depends only on the [`TreeConfig`], so readers can decode a
/// tree without replaying any write.
pub trait Serializable: Sized {
  /// Returns the number of bytes written.
  fn write<W: Write>(&self, w: &mut W) -> Result<usize>;
  fn read<R: Read>(r: &mut R, config: &TreeConfig) -> Result<Self>;
}

#[inline]
pub(crate) fn read_node<R: Read>(r: &mut R) -> std::io::Result<Node> {
  let mut node = EMPTY;
  r.read_exact(&mut node)?;
  Ok(node)
}

#[inline]
pub fn splitmix64(value: u64) -> u64 {
  let mut z = value.wrapping_add(0x9e3779b97f4a7c15);
  z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
  z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
  z ^ (z >> 31)
}

/// Reproducible non-empty leaf for the `i`-th item of a simulation or benchmark.
#[inline]
pub fn seeded_leaf(i: u64) -> Node {
  hash_leaf(&splitmix64(i).to_le_bytes())
}
