use thiserror::Error;

/// Failures detected when a handle is presented back to a pool.
///
/// Detection is best-effort: a forged handle whose bytes happen to decode
/// as a live header with a matching generation cannot be told apart from a
/// genuine one.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HandleError {
  /// The handle does not name a block in this pool.
  #[error("handle does not name a block in this pool")]
  Foreign,

  /// The block is already back on the free list.
  #[error("block was already released")]
  Released,

  /// The block was released and recycled since the handle was issued.
  #[error("handle generation {handle} does not match block generation {block}")]
  Stale { handle: u32, block: u32 },
}
