use crate::error::{Result, RollError};
use crate::node::MAX_SUPPORTED_DEPTH;

/// Shape of a concurrent Merkle tree, fixed when the tree is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeConfig {
  /// Number of levels below the root; the tree holds `2^max_depth` leaves.
  pub max_depth: u8,
  /// Capacity of the change log ring. Bounds how many writes a proof can lag behind.
  pub max_buffer_size: u32,
  /// Number of upper levels cached on the tree so that submitted proofs may omit them.
  pub canopy_depth: u8,
}

impl TreeConfig {
  pub fn new(max_depth: u8, max_buffer_size: u32, canopy_depth: u8) -> Result<Self> {
    let config = TreeConfig { max_depth, max_buffer_size, canopy_depth };
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<()> {
    if self.max_depth == 0 || self.max_depth as usize > MAX_SUPPORTED_DEPTH {
      return Err(RollError::InvalidConfig(format!(
        "max_depth {} must be within 1..={MAX_SUPPORTED_DEPTH}",
        self.max_depth
      )));
    }
    if !self.max_buffer_size.is_power_of_two() {
      return Err(RollError::InvalidConfig(format!(
        "max_buffer_size {} must be a non-zero power of two",
        self.max_buffer_size
      )));
    }
    if self.canopy_depth >= self.max_depth {
      return Err(RollError::InvalidConfig(format!(
        "canopy_depth {} must be less than max_depth {}",
        self.canopy_depth, self.max_depth
      )));
    }
    Ok(())
  }

  /// Number of leaves the tree can hold.
  pub fn capacity(&self) -> u64 {
    1u64 << self.max_depth
  }

  /// Number of proof nodes a caller must submit when the canopy supplies the rest.
  pub fn required_proof_len(&self) -> usize {
    (self.max_depth - self.canopy_depth) as usize
  }
}

impl Default for TreeConfig {
  fn default() -> Self {
    TreeConfig { max_depth: 14, max_buffer_size: 64, canopy_depth: 0 }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn accepts_supported_shapes() {
    for (depth, buffer, canopy) in [(1, 1, 0), (3, 8, 0), (14, 64, 5), (20, 1024, 10), (30, 2048, 17)] {
      TreeConfig::new(depth, buffer, canopy).unwrap();
    }
    TreeConfig::default().validate().unwrap();
  }

  #[test]
  fn rejects_unsupported_shapes() {
    for (depth, buffer, canopy) in [(0, 8, 0), (31, 8, 0), (14, 0, 0), (14, 48, 0), (5, 8, 5), (5, 8, 9)] {
      assert!(
        matches!(TreeConfig::new(depth, buffer, canopy), Err(RollError::InvalidConfig(_))),
        "({depth}, {buffer}, {canopy})"
      );
    }
  }

  #[test]
  fn derived_sizes() {
    let config = TreeConfig::new(10, 32, 3).unwrap();
    assert_eq!(1024, config.capacity());
    assert_eq!(7, config.required_proof_len());
  }
}
