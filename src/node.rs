use blake3::Hasher;
use std::sync::OnceLock;

/// A 32-byte tree node. Leaves are caller supplied values (usually `hash_leaf` of some payload).
pub type Node = [u8; 32];

/// The canonical empty leaf.
pub const EMPTY: Node = [0u8; 32];

/// Deepest tree supported. Leaf indices are `u32` and change log critbit math needs one spare bit.
pub const MAX_SUPPORTED_DEPTH: usize = 30;

/// Hash an arbitrary payload into a leaf node.
#[inline]
pub fn hash_leaf(payload: &[u8]) -> Node {
  *blake3::hash(payload).as_bytes()
}

/// Hash two children into their parent.
#[inline]
pub fn hash_internal(left: &Node, right: &Node) -> Node {
  let mut hasher = Hasher::new();
  hasher.update(left);
  hasher.update(right);
  *hasher.finalize().as_bytes()
}

/// Replace `node` with its parent. `is_left` tells whether `node` is the left child.
#[inline]
pub fn hash_to_parent(node: &mut Node, sibling: &Node, is_left: bool) {
  *node = if is_left { hash_internal(node, sibling) } else { hash_internal(sibling, node) };
}

/// Root of a subtree of height `level` whose leaves are all `EMPTY`.
pub fn empty_node(level: u32) -> Node {
  static EMPTY_NODES: OnceLock<[Node; MAX_SUPPORTED_DEPTH + 1]> = OnceLock::new();
  let table = EMPTY_NODES.get_or_init(|| {
    let mut table = [EMPTY; MAX_SUPPORTED_DEPTH + 1];
    for level in 1..=MAX_SUPPORTED_DEPTH {
      table[level] = hash_internal(&table[level - 1], &table[level - 1]);
    }
    table
  });
  table[level as usize]
}

/// Hash `leaf` up through `proof` following the bits of `index`, and return the resulting root.
pub fn recompute(leaf: Node, proof: &[Node], index: u32) -> Node {
  let mut node = leaf;
  for (level, sibling) in proof.iter().enumerate() {
    hash_to_parent(&mut node, sibling, (index >> level) & 1 == 0);
  }
  node
}

/// Copy a (possibly truncated) proof into a full-depth proof, inferring any missing upper levels as
/// empty subtrees.
pub fn fill_in_proof(proof: &[Node], max_depth: usize) -> Vec<Node> {
  (0..max_depth).map(|level| proof.get(level).copied().unwrap_or_else(|| empty_node(level as u32))).collect()
}

/// Render a node as lowercase hex for logs and reports.
pub fn to_hex(node: &Node) -> String {
  hex::encode(node)
}
