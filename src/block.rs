use std::fmt;

/// Bytes occupied by a block header: a size word followed by a link word.
pub const HEADER_SIZE: usize = 16;

pub(crate) const SIZE_WORD: usize = 0;
pub(crate) const LINK_WORD: usize = 8;

// Link word patterns. The tag bit distinguishes a block that is handed out
// (generation stamp) from one sitting on the free list (successor ref).
const NIL: u64 = 0x7fff_ffff_ffff_ffff;
const LIVE_TAG: u64 = 1 << 63;

/// Position of a block inside the pool: which chunk it lives in and the
/// byte offset of its header within that chunk.
///
/// The derived ordering (chunk first, then offset) is the address order the
/// free list is kept in.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct BlockRef {
  chunk: u32,
  offset: u32,
}

impl BlockRef {
  pub(crate) fn new(
    chunk: usize,
    offset: usize,
  ) -> Self {
    debug_assert!(chunk < (1 << 31));
    debug_assert!(offset <= u32::MAX as usize);

    Self {
      chunk: chunk as u32,
      offset: offset as u32,
    }
  }

  pub(crate) fn chunk(self) -> usize {
    self.chunk as usize
  }

  pub(crate) fn offset(self) -> usize {
    self.offset as usize
  }

  /// Offset of the first payload byte within the chunk.
  pub(crate) fn payload(self) -> usize {
    self.offset() + HEADER_SIZE
  }

  pub(crate) fn advance(
    self,
    bytes: usize,
  ) -> Self {
    Self::new(self.chunk(), self.offset() + bytes)
  }

  fn pack(self) -> u64 {
    ((self.chunk as u64) << 32) | self.offset as u64
  }

  fn unpack(word: u64) -> Self {
    Self {
      chunk: (word >> 32) as u32,
      offset: word as u32,
    }
  }
}

impl fmt::Display for BlockRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{:#x}", self.chunk, self.offset)
  }
}

/// Decoded contents of a block's link word.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Link {
  /// The block is on the free list; holds its successor, if any.
  Free(Option<BlockRef>),
  /// The block is handed out; holds the generation stamped at allocation.
  Live(u32),
}

impl Link {
  pub(crate) fn encode(self) -> u64 {
    match self {
      Link::Free(None) => NIL,
      Link::Free(Some(next)) => next.pack(),
      Link::Live(generation) => LIVE_TAG | u64::from(generation),
    }
  }

  pub(crate) fn decode(word: u64) -> Self {
    if word & LIVE_TAG != 0 {
      Link::Live(word as u32)
    } else if word == NIL {
      Link::Free(None)
    } else {
      Link::Free(Some(BlockRef::unpack(word)))
    }
  }
}

/// Opaque token naming one live allocation in a [`Pool`](crate::Pool).
///
/// A handle stays valid until the allocation is released. Presenting it
/// afterwards is reported as a typed error rather than corrupting the pool.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Handle {
  pub(crate) block: BlockRef,
  pub(crate) generation: u32,
}
