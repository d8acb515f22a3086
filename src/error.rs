use thiserror::Error;

pub type Result<T> = std::result::Result<T, RollError>;

/// Reasons a tree operation is rejected. A rejected operation never leaves a partial write behind.
#[derive(Debug, Error)]
pub enum RollError {
  #[error("signer is not the authority of this tree")]
  Unauthorized,

  #[error("leaf index {index} is out of bounds (limit {limit})")]
  IndexOutOfBounds { index: u32, limit: u64 },

  #[error("proof does not hash to the current root")]
  InvalidProof,

  #[error("claimed root is not present in the change log buffer")]
  RootNotFound,

  #[error("leaf at the proven index was modified by a buffered write")]
  LeafContentsModified,

  #[error("non-empty leaf claimed at index {index}, which has never been written")]
  FabricatedLeaf { index: u32 },

  #[error("tree is not initialized")]
  TreeNotInitialized,

  #[error("tree is already initialized")]
  TreeAlreadyInitialized,

  #[error("tree is full")]
  TreeFull,

  #[error("tree contains at least one non-empty leaf")]
  TreeNonEmpty,

  #[error("the empty node cannot be appended")]
  CannotAppendEmptyNode,

  #[error("canopy length does not match the tree: {0}")]
  CanopyLengthMismatch(String),

  #[error("canopy does not hash to the expected root")]
  CanopyRootMismatch,

  #[error("canopy holds nodes to the right of leaf index {index}")]
  CanopyNodesToRightOfIndex { index: u32 },

  #[error("tree was not prepared for batch initialization")]
  BatchNotPrepared,

  #[error("invalid tree configuration: {0}")]
  InvalidConfig(String),

  #[error("invalid account encoding: {0}")]
  InvalidEncoding(String),

  #[error("invalid node encoding {0:?}")]
  InvalidNodeEncoding(String),

  #[error(transparent)]
  Io(#[from] std::io::Error),
}

impl RollError {
  /// Variant name without its fields, for tallying rejections.
  pub fn kind(&self) -> &'static str {
    match self {
      RollError::Unauthorized => "Unauthorized",
      RollError::IndexOutOfBounds { .. } => "IndexOutOfBounds",
      RollError::InvalidProof => "InvalidProof",
      RollError::RootNotFound => "RootNotFound",
      RollError::LeafContentsModified => "LeafContentsModified",
      RollError::FabricatedLeaf { .. } => "FabricatedLeaf",
      RollError::TreeNotInitialized => "TreeNotInitialized",
      RollError::TreeAlreadyInitialized => "TreeAlreadyInitialized",
      RollError::TreeFull => "TreeFull",
      RollError::TreeNonEmpty => "TreeNonEmpty",
      RollError::CannotAppendEmptyNode => "CannotAppendEmptyNode",
      RollError::CanopyLengthMismatch(_) => "CanopyLengthMismatch",
      RollError::CanopyRootMismatch => "CanopyRootMismatch",
      RollError::CanopyNodesToRightOfIndex { .. } => "CanopyNodesToRightOfIndex",
      RollError::BatchNotPrepared => "BatchNotPrepared",
      RollError::InvalidConfig(_) => "InvalidConfig",
      RollError::InvalidEncoding(_) => "InvalidEncoding",
      RollError::InvalidNodeEncoding(_) => "InvalidNodeEncoding",
      RollError::Io(_) => "Io",
    }
  }
}
