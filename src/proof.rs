use serde::{Deserialize, Serialize};

use crate::canopy::Canopy;
use crate::error::{Result, RollError};
use crate::node::{Node, fill_in_proof, recompute};
use crate::roll::{FillEmptyOrAppendArgs, ProveLeafArgs, SetLeafArgs};
use crate::shadow::ShadowTree;

/// A write as a caller submits it: the root its proof was taken against, the leaf it expects to
/// replace, the leaf to write, and the (possibly canopy-truncated) proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
  pub root: Node,
  pub previous_leaf: Node,
  pub new_leaf: Node,
  pub proof: Vec<Node>,
  pub index: u32,
}

impl UpdateRequest {
  pub fn set_leaf_args(&self) -> SetLeafArgs {
    SetLeafArgs {
      current_root: self.root,
      previous_leaf: self.previous_leaf,
      new_leaf: self.new_leaf,
      proof: self.proof.clone(),
      index: self.index,
    }
  }

  pub fn fill_empty_or_append_args(&self) -> FillEmptyOrAppendArgs {
    FillEmptyOrAppendArgs { current_root: self.root, leaf: self.new_leaf, proof: self.proof.clone(), index: self.index }
  }

  /// Arguments proving that `previous_leaf` is at `index`.
  pub fn prove_leaf_args(&self) -> ProveLeafArgs {
    ProveLeafArgs { current_root: self.root, leaf: self.previous_leaf, proof: self.proof.clone(), index: self.index }
  }
}

/// Builds the proofs writers submit from a mirror of the tree.
///
/// Only borrows the tree, so any number of builders may run in parallel against the same root.
#[derive(Debug, Clone, Copy)]
pub struct ProofBuilder<'a> {
  tree: &'a ShadowTree,
  canopy_depth: usize,
}

impl<'a> ProofBuilder<'a> {
  /// `canopy_depth` top levels are left out of every proof; the verifier caches them. A canopy
  /// deeper than the tree caches the whole tree.
  pub fn new(tree: &'a ShadowTree, canopy_depth: usize) -> Self {
    ProofBuilder { tree, canopy_depth: canopy_depth.min(tree.depth()) }
  }

  pub fn canopy_depth(&self) -> usize {
    self.canopy_depth
  }

  pub fn root(&self) -> Node {
    self.tree.root()
  }

  pub fn proof(&self, index: u32) -> Vec<Node> {
    self.tree.truncated_proof(index as usize, self.canopy_depth)
  }

  /// The canopy a verifier of these proofs needs.
  pub fn canopy(&self) -> Canopy {
    Canopy::from_tree(self.tree, self.canopy_depth)
  }

  /// Request to overwrite the leaf at `index` with `new_leaf`.
  pub fn replace(&self, index: u32, new_leaf: Node) -> UpdateRequest {
    UpdateRequest {
      root: self.tree.root(),
      previous_leaf: self.tree.leaf(index as usize),
      new_leaf,
      proof: self.proof(index),
      index,
    }
  }
}

/// Whether `leaf` at `index` hashes up to `root` through `proof`, completed from `canopy` when the
/// proof is truncated and with empty subtrees when still short.
pub fn verify_proof(
  root: &Node,
  leaf: Node,
  index: u32,
  proof: &[Node],
  canopy: Option<&Canopy>,
  max_depth: usize,
) -> bool {
  let mut proof = proof.to_vec();
  if let Some(canopy) = canopy {
    canopy.fill_in_proof(index, &mut proof);
  }
  recompute(leaf, &fill_in_proof(&proof, max_depth), index) == *root
}

/// Request for the proof of one leaf from an indexer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofRequest {
  pub leaf_asset_id: String,
}

/// Proof of one leaf as served by an indexer. Nodes are hex (with or without `0x`) or base58.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofResponse {
  pub root: String,
  pub proof: Vec<String>,
}

impl ProofResponse {
  pub fn from_json(json: &str) -> Result<Self> {
    serde_json::from_str(json).map_err(|e| RollError::InvalidEncoding(e.to_string()))
  }

  pub fn root(&self) -> Result<Node> {
    decode_node(&self.root)
  }

  pub fn proof(&self) -> Result<Vec<Node>> {
    self.proof.iter().map(|s| decode_node(s)).collect()
  }

  /// Turn the response into a write of `new_leaf` over `previous_leaf` at `index`. The response is
  /// only trusted as far as the tree accepts the resulting request.
  pub fn to_update(&self, previous_leaf: Node, new_leaf: Node, index: u32) -> Result<UpdateRequest> {
    Ok(UpdateRequest { root: self.root()?, previous_leaf, new_leaf, proof: self.proof()?, index })
  }
}

pub fn decode_node(s: &str) -> Result<Node> {
  let s = s.trim();
  let bytes = if let Some(hex) = s.strip_prefix("0x") {
    hex::decode(hex).map_err(|e| RollError::InvalidNodeEncoding(format!("{s}: {e}")))?
  } else if s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit()) {
    hex::decode(s).map_err(|e| RollError::InvalidNodeEncoding(format!("{s}: {e}")))?
  } else {
    bs58::decode(s).into_vec().map_err(|e| RollError::InvalidNodeEncoding(format!("{s}: {e}")))?
  };
  Node::try_from(bytes.as_slice())
    .map_err(|_| RollError::InvalidNodeEncoding(format!("{s}: {} bytes is not a 32-byte node", bytes.len())))
}

pub fn encode_node(node: &Node) -> String {
  bs58::encode(node).into_string()
}
