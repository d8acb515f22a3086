//! A tree as it is persisted: header, roll and canopy in one fixed-size encoding.
//!
//! Every write goes through [`TreeAccount`], which checks the signer against the header before any
//! hashing, completes truncated proofs from the canopy, applies the write to the roll and then
//! refreshes the canopy from the resulting [`ChangeLogEvent`].
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::Serializable;
use crate::canopy::Canopy;
use crate::changelog::ChangeLogEvent;
use crate::config::TreeConfig;
use crate::error::{Result, RollError};
use crate::node::Node;
use crate::proof::UpdateRequest;
use crate::roll::{FillEmptyOrAppendArgs, InitializeWithRootArgs, MerkleRoll, ProveLeafArgs};

/// Address of a tree. Not part of the encoding; the owner of the bytes knows it.
pub type TreeId = [u8; 32];

/// Public key allowed to perform a class of writes.
pub type Authority = [u8; 32];

pub const ACCOUNT_TAG: u8 = 1;
pub const HEADER_VERSION: u8 = 1;
pub const HEADER_LEN: usize = 88;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeHeader {
  pub max_depth: u8,
  pub max_buffer_size: u32,
  /// May replace leaves, manage the batch flow, hand over either role and close the tree.
  pub authority: Authority,
  /// May append.
  pub append_authority: Authority,
  /// Sequence number of the chain when the tree was created.
  pub creation_seq: u64,
  pub is_batch_initialized: bool,
}

impl TreeHeader {
  pub fn new(config: &TreeConfig, authority: Authority, append_authority: Authority, creation_seq: u64) -> Self {
    TreeHeader {
      max_depth: config.max_depth,
      max_buffer_size: config.max_buffer_size,
      authority,
      append_authority,
      creation_seq,
      is_batch_initialized: false,
    }
  }

  pub fn assert_authority(&self, signer: &Authority) -> Result<()> {
    if *signer != self.authority {
      warn!(signer = %hex::encode(signer), "signer is not the tree authority");
      return Err(RollError::Unauthorized);
    }
    Ok(())
  }

  pub fn assert_append_authority(&self, signer: &Authority) -> Result<()> {
    if *signer != self.append_authority {
      warn!(signer = %hex::encode(signer), "signer is not the append authority");
      return Err(RollError::Unauthorized);
    }
    Ok(())
  }

  /// Decode a header on its own, before the shape of the rest of the account is known.
  pub fn decode<R: Read>(r: &mut R) -> Result<Self> {
    let tag = r.read_u8()?;
    if tag != ACCOUNT_TAG {
      return Err(RollError::InvalidEncoding(format!("account tag {tag} is not a tree account")));
    }
    let version = r.read_u8()?;
    if version != HEADER_VERSION {
      return Err(RollError::InvalidEncoding(format!("unsupported header version {version}")));
    }
    let max_depth = r.read_u8()?;
    let is_batch_initialized = match r.read_u8()? {
      0 => false,
      1 => true,
      flag => return Err(RollError::InvalidEncoding(format!("batch flag {flag}"))),
    };
    let max_buffer_size = r.read_u32::<LittleEndian>()?;
    let mut authority = [0u8; 32];
    r.read_exact(&mut authority)?;
    let mut append_authority = [0u8; 32];
    r.read_exact(&mut append_authority)?;
    let creation_seq = r.read_u64::<LittleEndian>()?;
    let _reserved = r.read_u64::<LittleEndian>()?;
    Ok(TreeHeader { max_depth, max_buffer_size, authority, append_authority, creation_seq, is_batch_initialized })
  }
}

impl Serializable for TreeHeader {
  fn write<W: Write>(&self, w: &mut W) -> Result<usize> {
    w.write_u8(ACCOUNT_TAG)?;
    w.write_u8(HEADER_VERSION)?;
    w.write_u8(self.max_depth)?;
    w.write_u8(self.is_batch_initialized as u8)?;
    w.write_u32::<LittleEndian>(self.max_buffer_size)?;
    w.write_all(&self.authority)?;
    w.write_all(&self.append_authority)?;
    w.write_u64::<LittleEndian>(self.creation_seq)?;
    w.write_u64::<LittleEndian>(0)?;
    Ok(HEADER_LEN)
  }

  fn read<R: Read>(r: &mut R, config: &TreeConfig) -> Result<Self> {
    let header = Self::decode(r)?;
    if header.max_depth != config.max_depth || header.max_buffer_size != config.max_buffer_size {
      return Err(RollError::InvalidEncoding(format!(
        "header shape ({}, {}) does not match ({}, {})",
        header.max_depth, header.max_buffer_size, config.max_depth, config.max_buffer_size
      )));
    }
    Ok(header)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeAccount {
  id: TreeId,
  header: TreeHeader,
  roll: MerkleRoll,
  canopy: Canopy,
}

impl TreeAccount {
  /// Allocate an uninitialized tree. The append authority defaults to `authority`.
  pub fn new(
    id: TreeId,
    config: &TreeConfig,
    authority: Authority,
    append_authority: Option<Authority>,
    creation_seq: u64,
  ) -> Result<Self> {
    config.validate()?;
    let header = TreeHeader::new(config, authority, append_authority.unwrap_or(authority), creation_seq);
    Ok(TreeAccount {
      id,
      header,
      roll: MerkleRoll::new(config),
      canopy: Canopy::new(config.max_depth, config.canopy_depth),
    })
  }

  pub fn id(&self) -> &TreeId {
    &self.id
  }

  pub fn header(&self) -> &TreeHeader {
    &self.header
  }

  pub fn roll(&self) -> &MerkleRoll {
    &self.roll
  }

  pub fn canopy(&self) -> &Canopy {
    &self.canopy
  }

  pub fn config(&self) -> TreeConfig {
    TreeConfig {
      max_depth: self.header.max_depth,
      max_buffer_size: self.header.max_buffer_size,
      canopy_depth: self.canopy.depth() as u8,
    }
  }

  pub fn root(&self) -> Node {
    self.roll.root()
  }

  pub fn init_empty(&mut self, signer: &Authority) -> Result<ChangeLogEvent> {
    self.header.assert_authority(signer)?;
    self.roll.initialize()?;
    info!(id = %bs58::encode(self.id).into_string(), max_depth = self.header.max_depth, "tree initialized");
    Ok(self.publish())
  }

  pub fn replace_leaf(&mut self, signer: &Authority, request: &UpdateRequest) -> Result<ChangeLogEvent> {
    self.header.assert_authority(signer)?;
    self.check_leaf_index(request.index)?;
    let mut args = request.set_leaf_args();
    self.canopy.fill_in_proof(args.index, &mut args.proof);
    self.roll.set_leaf(&args)?;
    Ok(self.publish())
  }

  pub fn append(&mut self, signer: &Authority, leaf: Node) -> Result<ChangeLogEvent> {
    self.header.assert_append_authority(signer)?;
    self.roll.append(leaf)?;
    Ok(self.publish())
  }

  /// Write `request.new_leaf` over the empty leaf at `request.index`, or append it if that leaf has
  /// been filled since the proof was taken.
  pub fn insert_or_append(&mut self, signer: &Authority, request: &UpdateRequest) -> Result<ChangeLogEvent> {
    self.header.assert_authority(signer)?;
    self.check_leaf_index(request.index)?;
    let mut args: FillEmptyOrAppendArgs = request.fill_empty_or_append_args();
    self.canopy.fill_in_proof(args.index, &mut args.proof);
    self.roll.fill_empty_or_append(&args)?;
    Ok(self.publish())
  }

  /// Succeeds if `request.previous_leaf` is at `request.index`. Needs no signer.
  pub fn verify_leaf(&self, request: &UpdateRequest) -> Result<()> {
    self.check_leaf_index(request.index)?;
    let mut args: ProveLeafArgs = request.prove_leaf_args();
    self.canopy.fill_in_proof(args.index, &mut args.proof);
    self.roll.prove_leaf(&args)
  }

  pub fn transfer_authority(&mut self, signer: &Authority, new_authority: Authority) -> Result<()> {
    self.header.assert_authority(signer)?;
    self.header.authority = new_authority;
    info!(authority = %hex::encode(new_authority), "authority transferred");
    Ok(())
  }

  pub fn transfer_append_authority(&mut self, signer: &Authority, new_authority: Authority) -> Result<()> {
    self.header.assert_append_authority(signer)?;
    self.header.append_authority = new_authority;
    info!(append_authority = %hex::encode(new_authority), "append authority transferred");
    Ok(())
  }

  /// Release a tree whose leaves are all empty. The account is left zeroed and must be recreated
  /// before it can hold a tree again.
  pub fn close_empty_tree(&mut self, signer: &Authority) -> Result<()> {
    self.header.assert_authority(signer)?;
    if self.roll.is_initialized() {
      self.roll.prove_tree_is_empty()?;
    }
    self.roll.clear();
    self.canopy.clear();
    self.header.authority = [0; 32];
    self.header.append_authority = [0; 32];
    self.header.is_batch_initialized = false;
    info!(id = %bs58::encode(self.id).into_string(), "tree closed");
    Ok(())
  }

  /// Start a batch initialization: the canopy is filled with [`append_canopy_nodes`] and the tree
  /// is then opened with [`init_prepared_tree_with_root`].
  ///
  /// [`append_canopy_nodes`]: TreeAccount::append_canopy_nodes
  /// [`init_prepared_tree_with_root`]: TreeAccount::init_prepared_tree_with_root
  pub fn prepare_batch(&mut self, signer: &Authority) -> Result<()> {
    self.header.assert_authority(signer)?;
    if self.roll.is_initialized() {
      return Err(RollError::TreeAlreadyInitialized);
    }
    self.header.is_batch_initialized = true;
    Ok(())
  }

  pub fn append_canopy_nodes(&mut self, signer: &Authority, start_index: u32, nodes: &[Node]) -> Result<()> {
    self.check_prepared(signer)?;
    self.canopy.set_leaf_nodes(start_index, nodes)
  }

  /// Open a prepared tree at `args.root`. The canopy must already hash to that root and hold nothing
  /// to the right of the rightmost leaf; `args.proof` may leave out the canopy levels.
  pub fn init_prepared_tree_with_root(
    &mut self,
    signer: &Authority,
    args: &InitializeWithRootArgs,
  ) -> Result<ChangeLogEvent> {
    self.check_prepared(signer)?;
    self.check_leaf_index(args.index)?;
    self.canopy.check_root(&args.root)?;
    self.canopy.check_no_nodes_to_right_of_index(args.index)?;
    let mut proof = args.proof.clone();
    self.canopy.fill_in_proof(args.index, &mut proof);
    let args = InitializeWithRootArgs { root: args.root, rightmost_leaf: args.rightmost_leaf, proof, index: args.index };
    self.roll.initialize_with_root(&args)?;
    info!(id = %bs58::encode(self.id).into_string(), rightmost_index = args.index, "prepared tree initialized");
    Ok(self.publish())
  }

  /// Rejects indices outside the tree before the canopy is consulted.
  fn check_leaf_index(&self, index: u32) -> Result<()> {
    let capacity = self.config().capacity();
    if index as u64 >= capacity {
      debug!(index, capacity, "leaf index outside the tree");
      return Err(RollError::IndexOutOfBounds { index, limit: capacity });
    }
    Ok(())
  }

  fn check_prepared(&self, signer: &Authority) -> Result<()> {
    self.header.assert_authority(signer)?;
    if !self.header.is_batch_initialized {
      return Err(RollError::BatchNotPrepared);
    }
    if self.roll.is_initialized() {
      return Err(RollError::TreeAlreadyInitialized);
    }
    Ok(())
  }

  /// Event for the write just committed, after folding it into the canopy.
  fn publish(&mut self) -> ChangeLogEvent {
    let event = ChangeLogEvent::new(self.id, self.roll.change_log(), self.roll.sequence_number());
    self.canopy.update_from_event(Some(&event));
    debug!(seq = event.seq, index = event.index, "change log event");
    event
  }

  pub fn encoded_len(config: &TreeConfig) -> usize {
    HEADER_LEN + MerkleRoll::encoded_len(config) + ((1usize << (config.canopy_depth as usize + 1)) - 2) * 32
  }

  pub fn write<W: Write>(&self, w: &mut W) -> Result<usize> {
    let mut len = self.header.write(w)?;
    len += self.roll.write(w)?;
    len += self.canopy.write(w)?;
    Ok(len)
  }

  pub fn to_bytes(&self) -> Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(Self::encoded_len(&self.config()));
    self.write(&mut bytes)?;
    Ok(bytes)
  }

  /// Decode an account. The canopy depth is not stored; it follows from the bytes left after the
  /// roll.
  pub fn from_bytes(id: TreeId, bytes: &[u8]) -> Result<Self> {
    let mut r = bytes;
    let header = TreeHeader::decode(&mut r)?;
    let mut config = TreeConfig { max_depth: header.max_depth, max_buffer_size: header.max_buffer_size, canopy_depth: 0 };
    config.validate()?;
    let roll_len = MerkleRoll::encoded_len(&config);
    if r.len() < roll_len || (r.len() - roll_len) % 32 != 0 {
      return Err(RollError::InvalidEncoding(format!("{} bytes do not fit a tree of shape {config:?}", bytes.len())));
    }
    let canopy_nodes = (r.len() - roll_len) / 32;
    if !(canopy_nodes + 2).is_power_of_two() {
      return Err(RollError::CanopyLengthMismatch(format!("{canopy_nodes} nodes is not 2 less than a power of 2")));
    }
    config.canopy_depth = ((canopy_nodes + 2).trailing_zeros() - 1) as u8;
    config.validate()?;
    let roll = MerkleRoll::read(&mut r, &config)?;
    let canopy = Canopy::read(&mut r, &config)?;
    Ok(TreeAccount { id, header, roll, canopy })
  }

  pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
    fs::write(path.as_ref(), self.to_bytes()?)?;
    debug!(path = %path.as_ref().display(), "tree saved");
    Ok(())
  }

  pub fn load<P: AsRef<Path>>(id: TreeId, path: P) -> Result<Self> {
    let bytes = fs::read(path.as_ref())?;
    Self::from_bytes(id, &bytes)
  }
}
