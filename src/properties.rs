use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::account::{TreeAccount, TreeHeader};
use crate::canopy::Canopy;
use crate::config::TreeConfig;
use crate::node::{Node, hash_leaf, recompute};
use crate::proof::{ProofBuilder, verify_proof};
use crate::roll::{InitializeWithRootArgs, MerkleRoll};
use crate::shadow::ShadowTree;
use crate::{Serializable, seeded_leaf};

fn leaves(max: usize) -> impl Strategy<Value = Vec<Node>> {
  prop::collection::vec(any::<[u8; 32]>(), 1..=max)
}

fn writable_roll(tree: &ShadowTree, buffer: u32) -> MerkleRoll {
  let mut roll = MerkleRoll::new(&TreeConfig::new(tree.depth() as u8, buffer, 0).unwrap());
  let last = tree.size() - 1;
  roll
    .initialize_with_root(&InitializeWithRootArgs {
      root: tree.root(),
      rightmost_leaf: tree.leaf(last),
      proof: tree.proof(last),
      index: last as u32,
    })
    .unwrap();
  roll
}

proptest! {
  #[test]
  fn root_is_a_function_of_the_leaves(leaves in leaves(64)) {
    let built = ShadowTree::with_leaves(6, &leaves).unwrap();
    prop_assert_eq!(built.root(), ShadowTree::with_leaves(6, &leaves).unwrap().root());

    let mut incremental = ShadowTree::new(6);
    for (i, leaf) in leaves.iter().enumerate() {
      incremental.update(*leaf, i);
    }
    prop_assert_eq!(built, incremental);
  }

  #[test]
  fn proofs_are_sound(leaves in leaves(32), index in 0usize..32, other in any::<[u8; 32]>()) {
    let tree = ShadowTree::with_leaves(5, &leaves).unwrap();
    let proof = tree.proof(index);
    prop_assert_eq!(tree.root(), recompute(tree.leaf(index), &proof, index as u32));
    prop_assume!(other != tree.leaf(index));
    prop_assert_ne!(tree.root(), recompute(other, &proof, index as u32));
  }

  #[test]
  fn canopy_completes_truncated_proofs(leaves in leaves(64), index in 0usize..64, canopy_depth in 0usize..6) {
    let tree = ShadowTree::with_leaves(6, &leaves).unwrap();
    let canopy = Canopy::from_tree(&tree, canopy_depth);
    let mut proof = tree.truncated_proof(index, canopy_depth);
    canopy.fill_in_proof(index as u32, &mut proof);
    prop_assert_eq!(tree.proof(index), proof);
  }

  #[test]
  fn replaces_against_one_root_commute(depth in 4u8..12, writes in 1usize..=16, seed in any::<u64>()) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut tree = ShadowTree::new(depth);
    let mut roll = writable_roll(&tree, 16);
    let indices = rand::seq::index::sample(&mut rng, tree.size(), writes).into_vec();
    let builder = ProofBuilder::new(&tree, 0);
    let mut requests = indices
      .iter()
      .map(|&index| builder.replace(index as u32, seeded_leaf(seed ^ index as u64)))
      .collect::<Vec<_>>();
    requests.shuffle(&mut rng);

    for request in requests.iter() {
      roll.set_leaf(&request.set_leaf_args()).unwrap();
    }
    for request in requests.iter() {
      tree.update(request.new_leaf, request.index as usize);
    }
    prop_assert_eq!(tree.root(), roll.root());
    prop_assert_eq!(1 + writes as u64, roll.sequence_number());
  }

  #[test]
  fn verify_proof_matches_the_roll(leaves in leaves(16), index in 0u32..16) {
    let tree = ShadowTree::with_leaves(4, &leaves).unwrap();
    let roll = writable_roll(&tree, 4);
    let proof = tree.proof(index as usize);
    prop_assert!(verify_proof(&roll.root(), tree.leaf(index as usize), index, &proof, None, 4));
    prop_assert!(roll.check_valid_proof(tree.leaf(index as usize), &proof, index));
  }

  #[test]
  fn header_decodes_what_it_encodes(
    depth in 1u8..=30,
    buffer_log in 0u32..12,
    authority in any::<[u8; 32]>(),
    append_authority in any::<[u8; 32]>(),
    creation_seq in any::<u64>(),
  ) {
    let config = TreeConfig::new(depth, 1 << buffer_log, 0).unwrap();
    let header = TreeHeader::new(&config, authority, append_authority, creation_seq);
    let mut bytes = Vec::new();
    header.write(&mut bytes).unwrap();
    prop_assert_eq!(header, TreeHeader::read(&mut bytes.as_slice(), &config).unwrap());
  }

  #[test]
  fn account_decodes_what_it_encodes(appends in 0usize..40, canopy_depth in 0u8..5, seed in any::<u64>()) {
    let config = TreeConfig::new(6, 8, canopy_depth).unwrap();
    let authority = hash_leaf(&seed.to_le_bytes());
    let mut account = TreeAccount::new([9; 32], &config, authority, None, seed).unwrap();
    account.init_empty(&authority).unwrap();
    for i in 0..appends {
      account.append(&authority, seeded_leaf(seed.wrapping_add(i as u64))).unwrap();
    }
    let bytes = account.to_bytes().unwrap();
    prop_assert_eq!(TreeAccount::encoded_len(&config), bytes.len());
    prop_assert_eq!(account, TreeAccount::from_bytes([9; 32], &bytes).unwrap());
  }
}
