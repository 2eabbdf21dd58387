use std::io::{self, Write};

use log::{debug, trace};

use crate::align;
use crate::block::{BlockRef, HEADER_SIZE, Handle, LINK_WORD, Link, SIZE_WORD};
use crate::chunk::{Chunk, ChunkSource, SystemSource};
use crate::error::HandleError;

/// Minimum allocation granule; every payload size is a multiple of this.
pub const GRANULE: usize = 16;

/// Default lower bound on chunk size, amortizing growth calls.
pub const DEFAULT_CHUNK: usize = 16000;

/// Free-list totals, as reported by [`Pool::stats`].
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Stats {
  /// Bytes ever obtained from the chunk source.
  pub total_reserved: usize,
  /// Bytes sitting on the free list, headers included.
  pub total_free: usize,
  /// Number of free-list nodes.
  pub free_blocks: usize,
}

/// A first-fit memory pool over chunks from a [`ChunkSource`].
///
/// Hands out blocks as [`Handle`]s; released blocks are recycled through an
/// address-ordered free list with immediate neighbour coalescing. Chunks go
/// back to the source only when the pool itself is dropped.
pub struct Pool<S: ChunkSource = SystemSource> {
  source: S,
  chunks: Vec<Chunk>,
  head: Option<BlockRef>,
  next_generation: u32,
  reserved: usize,
  chunk_size: usize,
}

impl Pool<SystemSource> {
  pub fn new() -> Self {
    Self::with_chunk_size(DEFAULT_CHUNK)
  }

  /// A pool whose growth requests are at least `chunk_size` bytes.
  pub fn with_chunk_size(chunk_size: usize) -> Self {
    Self::with_source(SystemSource, chunk_size)
  }
}

impl Default for Pool<SystemSource> {
  fn default() -> Self {
    Self::new()
  }
}

impl<S: ChunkSource> Pool<S> {
  pub fn with_source(
    source: S,
    chunk_size: usize,
  ) -> Self {
    Self {
      source,
      chunks: Vec::new(),
      head: None,
      next_generation: 0,
      reserved: 0,
      chunk_size,
    }
  }

  /// Hands out a block usable for at least `size` bytes.
  ///
  /// The size is rounded up to a multiple of [`GRANULE`]; the payload of
  /// the returned handle is exactly the rounded size.
  ///
  /// # Panics
  ///
  /// Panics if `size` is zero, or if the chunk source cannot satisfy a
  /// growth request.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Handle {
    assert!(size > 0, "allocation size must be positive");

    let size = align!(size, GRANULE);

    let (prev, block) = match self.find_fit(size) {
      Some(fit) => fit,
      None => self.new_block(size),
    };

    // Carve the block down unless the leftover would be too small to be a
    // usable free block of its own.
    if self.size_of(block) > size + HEADER_SIZE + GRANULE {
      self.split(block, size);
    }

    let next = self.next_of(block);
    match prev {
      None => self.head = next,
      Some(prev) => self.set_next(prev, next),
    }

    let generation = self.next_generation;
    self.next_generation = self.next_generation.wrapping_add(1);
    self.set_link(block, Link::Live(generation));
    trace!("handed out {} ({} bytes, generation {})", block, self.size_of(block), generation);

    Handle { block, generation }
  }

  /// Returns a block to the free list. `None` is a no-op.
  pub fn release(
    &mut self,
    handle: Option<Handle>,
  ) -> Result<(), HandleError> {
    let Some(handle) = handle else {
      return Ok(());
    };

    self.validate(handle)?;
    self.return_block(handle.block);

    Ok(())
  }

  /// Payload bytes of a live allocation.
  pub fn data(
    &self,
    handle: Handle,
  ) -> Result<&[u8], HandleError> {
    self.validate(handle)?;

    let block = handle.block;
    let size = self.size_of(block);

    Ok(&self.chunks[block.chunk()].bytes()[block.payload()..block.payload() + size])
  }

  /// Payload bytes of a live allocation, writable.
  pub fn data_mut(
    &mut self,
    handle: Handle,
  ) -> Result<&mut [u8], HandleError> {
    self.validate(handle)?;

    let block = handle.block;
    let size = self.size_of(block);
    let payload = block.payload();

    Ok(&mut self.chunks[block.chunk()].bytes_mut()[payload..payload + size])
  }

  /// Sums the free list.
  pub fn stats(&self) -> Stats {
    let mut stats = Stats {
      total_reserved: self.reserved,
      ..Stats::default()
    };

    let mut cur = self.head;
    while let Some(block) = cur {
      stats.free_blocks += 1;
      stats.total_free += self.size_of(block) + HEADER_SIZE;
      cur = self.next_of(block);
    }

    stats
  }

  /// Walks the free list asserting its structural invariants and returns
  /// the smallest free block size, or `None` if the list is empty.
  ///
  /// Intended for test harnesses; a violation aborts via `assert!`.
  pub fn check_invariants(&self) -> Option<usize> {
    let mut smallest: Option<usize> = None;
    let mut prev: Option<BlockRef> = None;

    let mut cur = self.head;
    while let Some(block) = cur {
      let size = self.size_of(block);

      assert!(size >= GRANULE, "free block {block} is below the granule");
      assert!(
        block.payload() + size <= self.chunks[block.chunk()].len(),
        "free block {block} overruns its chunk"
      );

      if let Some(prev) = prev {
        assert!(prev < block, "free list is out of address order at {block}");
        if prev.chunk() == block.chunk() {
          assert!(
            prev.payload() + self.size_of(prev) < block.offset(),
            "free blocks {prev} and {block} overlap or should have been merged"
          );
        }
      }

      smallest = Some(smallest.map_or(size, |s| s.min(size)));
      prev = Some(block);
      cur = self.next_of(block);
    }

    smallest
  }

  /// Writes one line per free node for inspection.
  pub fn dump_free_list<W: Write>(
    &self,
    sink: &mut W,
  ) -> io::Result<()> {
    let mut cur = self.head;
    while let Some(block) = cur {
      let next = self.next_of(block);
      match next {
        Some(next) => writeln!(sink, "{}, size: {}, next: {}", block, self.size_of(block), next)?,
        None => writeln!(sink, "{}, size: {}, next: -", block, self.size_of(block))?,
      }
      cur = next;
    }

    Ok(())
  }

  fn find_fit(
    &self,
    size: usize,
  ) -> Option<(Option<BlockRef>, BlockRef)> {
    let mut prev = None;

    let mut cur = self.head;
    while let Some(block) = cur {
      if self.size_of(block) >= size {
        return Some((prev, block));
      }
      prev = Some(block);
      cur = self.next_of(block);
    }

    None
  }

  // Grows the pool by one chunk big enough for `size` and threads it onto
  // the free list. Returns the new block together with its predecessor as
  // the list stands after insertion.
  fn new_block(
    &mut self,
    size: usize,
  ) -> (Option<BlockRef>, BlockRef) {
    let len = size.max(self.chunk_size) + HEADER_SIZE;
    assert!(len <= u32::MAX as usize, "chunk of {len} bytes exceeds the offset space");

    let Some(chunk) = self.source.acquire(len) else {
      panic!("chunk source failed to produce {len} bytes");
    };
    debug!("pool grown by {} bytes (chunk #{})", len, self.chunks.len());

    let block = BlockRef::new(self.chunks.len(), 0);
    self.chunks.push(chunk);
    self.reserved += len;
    self.set_size(block, len - HEADER_SIZE);

    self.return_block(block)
  }

  // Inserts `block` in address order, merging it with address-adjacent
  // neighbours. Returns the node finally carrying the freed bytes and that
  // node's predecessor, both valid after any merging.
  fn return_block(
    &mut self,
    block: BlockRef,
  ) -> (Option<BlockRef>, BlockRef) {
    let mut before_prev = None;
    let mut prev = None;

    let mut cur = self.head;
    while let Some(node) = cur {
      if node > block {
        break;
      }
      before_prev = prev;
      prev = Some(node);
      cur = self.next_of(node);
    }

    self.set_next(block, cur);
    match prev {
      None => self.head = Some(block),
      Some(prev) => self.set_next(prev, Some(block)),
    }

    if let Some(next) = cur {
      if self.adjacent(block, next) {
        trace!("merged {} with successor {}", block, next);
        self.absorb(block, next);
      }
    }

    match prev {
      Some(prev) if self.adjacent(prev, block) => {
        trace!("merged {} into predecessor {}", block, prev);
        self.absorb(prev, block);
        (before_prev, prev)
      }
      _ => (prev, block),
    }
  }

  fn split(
    &mut self,
    block: BlockRef,
    size: usize,
  ) {
    let rest = block.advance(HEADER_SIZE + size);
    let rest_size = self.size_of(block) - size - HEADER_SIZE;
    trace!("carved {} bytes off {}, {} bytes left at {}", size, block, rest_size, rest);

    self.set_size(rest, rest_size);
    let next = self.next_of(block);
    self.set_next(rest, next);

    self.set_size(block, size);
    self.set_next(block, Some(rest));
  }

  fn adjacent(
    &self,
    left: BlockRef,
    right: BlockRef,
  ) -> bool {
    left.chunk() == right.chunk() && left.payload() + self.size_of(left) == right.offset()
  }

  fn absorb(
    &mut self,
    node: BlockRef,
    next: BlockRef,
  ) {
    let merged = self.size_of(node) + HEADER_SIZE + self.size_of(next);
    let after = self.next_of(next);

    self.set_size(node, merged);
    self.set_next(node, after);
  }

  fn validate(
    &self,
    handle: Handle,
  ) -> Result<(), HandleError> {
    let block = handle.block;

    let Some(chunk) = self.chunks.get(block.chunk()) else {
      return Err(HandleError::Foreign);
    };
    if block.offset() % GRANULE != 0 || block.payload() > chunk.len() {
      return Err(HandleError::Foreign);
    }

    match Link::decode(chunk.read_word(block.offset() + LINK_WORD)) {
      Link::Live(generation) if generation == handle.generation => Ok(()),
      Link::Live(generation) => Err(HandleError::Stale {
        handle: handle.generation,
        block: generation,
      }),
      Link::Free(_) => Err(HandleError::Released),
    }
  }

  fn size_of(
    &self,
    block: BlockRef,
  ) -> usize {
    self.chunks[block.chunk()].read_word(block.offset() + SIZE_WORD) as usize
  }

  fn set_size(
    &mut self,
    block: BlockRef,
    size: usize,
  ) {
    self.chunks[block.chunk()].write_word(block.offset() + SIZE_WORD, size as u64);
  }

  fn link_of(
    &self,
    block: BlockRef,
  ) -> Link {
    Link::decode(self.chunks[block.chunk()].read_word(block.offset() + LINK_WORD))
  }

  fn set_link(
    &mut self,
    block: BlockRef,
    link: Link,
  ) {
    self.chunks[block.chunk()].write_word(block.offset() + LINK_WORD, link.encode());
  }

  fn next_of(
    &self,
    block: BlockRef,
  ) -> Option<BlockRef> {
    let Link::Free(next) = self.link_of(block) else {
      unreachable!("free-list node {block} carries a live link word");
    };

    next
  }

  fn set_next(
    &mut self,
    block: BlockRef,
    next: Option<BlockRef>,
  ) {
    self.set_link(block, Link::Free(next));
  }
}

impl<S: ChunkSource> Drop for Pool<S> {
  fn drop(&mut self) {
    for chunk in self.chunks.drain(..) {
      self.source.release(chunk);
    }
  }
}

#[cfg(test)]
mod tests {
  use std::cell::Cell;
  use std::rc::Rc;

  use test_env_log::test;

  use super::*;

  #[derive(Clone, Default)]
  struct CountingSource {
    calls: Rc<Cell<usize>>,
    last_len: Rc<Cell<usize>>,
  }

  impl ChunkSource for CountingSource {
    fn acquire(&mut self, len: usize) -> Option<Chunk> {
      self.calls.set(self.calls.get() + 1);
      self.last_len.set(len);
      SystemSource.acquire(len)
    }

    fn release(&mut self, chunk: Chunk) {
      SystemSource.release(chunk);
    }
  }

  // Builds a pool whose free list holds blocks of exactly `sizes` bytes,
  // lowest address first, with a live spacer between each pair so nothing
  // coalesces. Returns the payload address of each listed block.
  fn pool_with_free_sizes(sizes: &[usize]) -> (Pool, Vec<*const u8>) {
    let mut pool = Pool::new();

    let handles: Vec<Handle> = sizes
      .iter()
      .map(|&size| {
        let handle = pool.allocate(size);
        pool.allocate(GRANULE);
        handle
      })
      .collect();

    let addrs = handles
      .iter()
      .map(|&handle| pool.data(handle).unwrap().as_ptr())
      .collect();

    for handle in handles {
      pool.release(Some(handle)).unwrap();
    }

    (pool, addrs)
  }

  #[test]
  fn test_round_trip() {
    let mut pool = Pool::new();

    let first = pool.allocate(100);
    assert_eq!(pool.data(first).unwrap().len(), 112);
    let addr = pool.data(first).unwrap().as_ptr();

    pool.release(Some(first)).unwrap();

    let second = pool.allocate(100);
    assert_eq!(pool.data(second).unwrap().as_ptr(), addr);
    assert!(pool.data(second).unwrap().len() >= 100);
  }

  #[test]
  fn test_first_fit_in_address_order() {
    let (mut pool, addrs) = pool_with_free_sizes(&[16, 48, 32]);

    // 20 rounds to 32; both the 48 and the 32 block would fit, but the 48
    // one comes first in address order.
    let handle = pool.allocate(20);
    assert_eq!(pool.data(handle).unwrap().as_ptr(), addrs[1]);
    assert_eq!(pool.data(handle).unwrap().len(), 48);
  }

  #[test]
  fn test_splits_when_leftover_is_usable() {
    // 112 = 64 + header + two granules: enough room for a leftover block.
    let (mut pool, addrs) = pool_with_free_sizes(&[112]);
    let free_before = pool.stats().free_blocks;

    let handle = pool.allocate(64);
    assert_eq!(pool.data(handle).unwrap().as_ptr(), addrs[0]);
    assert_eq!(pool.data(handle).unwrap().len(), 64);

    // The leftover replaced the node on the free list.
    assert_eq!(pool.stats().free_blocks, free_before);
    pool.check_invariants();
  }

  #[test]
  fn test_grants_whole_block_when_leftover_would_be_unusable() {
    // 96 = 64 + header + one granule: a split would leave nothing usable.
    let (mut pool, addrs) = pool_with_free_sizes(&[96]);
    let free_before = pool.stats().free_blocks;

    let handle = pool.allocate(64);
    assert_eq!(pool.data(handle).unwrap().as_ptr(), addrs[0]);
    assert_eq!(pool.data(handle).unwrap().len(), 96);

    assert_eq!(pool.stats().free_blocks, free_before - 1);
  }

  #[test]
  fn test_growth_request_size() {
    let source = CountingSource::default();
    let calls = source.calls.clone();
    let lens = source.last_len.clone();
    let mut pool = Pool::with_source(source, DEFAULT_CHUNK);

    pool.allocate(100);
    assert_eq!(calls.get(), 1);
    assert_eq!(lens.get(), DEFAULT_CHUNK + HEADER_SIZE);

    // Larger than anything on the free list: exactly one more chunk, sized
    // by the request itself.
    let big = pool.allocate(2 * DEFAULT_CHUNK);
    assert_eq!(calls.get(), 2);
    assert_eq!(lens.get(), 2 * DEFAULT_CHUNK + HEADER_SIZE);
    assert!(pool.data(big).unwrap().len() >= 2 * DEFAULT_CHUNK);

    // The excess of the first chunk serves the next request without growth.
    pool.allocate(1000);
    assert_eq!(calls.get(), 2);
  }

  #[test]
  fn test_reuses_freed_region_without_growth() {
    let source = CountingSource::default();
    let calls = source.calls.clone();
    let mut pool = Pool::with_source(source, DEFAULT_CHUNK);

    let first = pool.allocate(100);
    let second = pool.allocate(200);
    let third = pool.allocate(50);
    let second_addr = pool.data(second).unwrap().as_ptr();
    assert_eq!(calls.get(), 1);

    pool.release(Some(second)).unwrap();

    let reused = pool.allocate(150);
    assert_eq!(calls.get(), 1);
    assert_eq!(pool.data(reused).unwrap().as_ptr(), second_addr);
    assert_eq!(pool.data(reused).unwrap().len(), 160);

    pool.release(Some(first)).unwrap();
    pool.release(Some(third)).unwrap();
    pool.release(Some(reused)).unwrap();
    pool.check_invariants();
    assert_eq!(pool.stats().free_blocks, 1);
  }

  #[test]
  fn test_release_none_is_noop() {
    let mut pool = Pool::new();

    pool.release(None).unwrap();
    assert_eq!(pool.stats(), Stats::default());
  }

  #[test]
  fn test_double_release() {
    let mut pool = Pool::new();

    let handle = pool.allocate(32);
    pool.release(Some(handle)).unwrap();

    assert_eq!(pool.release(Some(handle)), Err(HandleError::Released));
  }

  #[test]
  fn test_stale_handle() {
    let mut pool = Pool::new();

    let first = pool.allocate(32);
    pool.release(Some(first)).unwrap();

    // Recycles the same block under a fresh generation.
    let second = pool.allocate(32);
    assert!(matches!(pool.release(Some(first)), Err(HandleError::Stale { .. })));

    pool.release(Some(second)).unwrap();
  }

  #[test]
  fn test_foreign_handle() {
    let mut pool = Pool::new();
    pool.allocate(32);

    let forged = Handle {
      block: BlockRef::new(7, 0),
      generation: 0,
    };
    assert_eq!(pool.release(Some(forged)), Err(HandleError::Foreign));

    let misaligned = Handle {
      block: BlockRef::new(0, 8),
      generation: 0,
    };
    assert_eq!(pool.data(misaligned).unwrap_err(), HandleError::Foreign);
  }

  #[test]
  fn test_data_round_trip() {
    let mut pool = Pool::new();

    let first = pool.allocate(64);
    let second = pool.allocate(64);

    pool.data_mut(first).unwrap().fill(0xaa);
    pool.data_mut(second).unwrap().fill(0xbb);

    assert!(pool.data(first).unwrap().iter().all(|&byte| byte == 0xaa));
    assert!(pool.data(second).unwrap().iter().all(|&byte| byte == 0xbb));
  }

  #[test]
  fn test_stats_accounting() {
    let mut pool = Pool::new();
    assert_eq!(pool.stats(), Stats::default());

    let handle = pool.allocate(100);
    let stats = pool.stats();
    assert_eq!(stats.total_reserved, DEFAULT_CHUNK + HEADER_SIZE);
    assert_eq!(stats.free_blocks, 1);
    assert_eq!(stats.total_free, DEFAULT_CHUNK - 112);

    pool.release(Some(handle)).unwrap();
    let stats = pool.stats();
    assert_eq!(stats.free_blocks, 1);
    assert_eq!(stats.total_free, stats.total_reserved);
  }

  #[test]
  fn test_check_invariants_reports_minimum() {
    let pool = Pool::new();
    assert_eq!(pool.check_invariants(), None);

    let (pool, _) = pool_with_free_sizes(&[48, 16]);
    assert_eq!(pool.check_invariants(), Some(16));
  }

  #[test]
  fn test_dump_free_list() {
    let (pool, _) = pool_with_free_sizes(&[16, 32]);

    let mut out = Vec::new();
    pool.dump_free_list(&mut out).unwrap();
    let dump = String::from_utf8(out).unwrap();

    assert_eq!(dump.lines().count(), pool.stats().free_blocks);
    assert_eq!(dump.lines().next().unwrap(), "0:0x0, size: 16, next: 0:0x40");
    assert!(dump.lines().last().unwrap().ends_with("next: -"));
  }

  #[test]
  #[should_panic(expected = "must be positive")]
  fn test_zero_size_is_a_contract_violation() {
    let mut pool = Pool::new();
    pool.allocate(0);
  }
}
