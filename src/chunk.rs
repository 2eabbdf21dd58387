use std::ptr::NonNull;
use std::slice;

/// One raw region obtained from a [`ChunkSource`].
///
/// A chunk owns its bytes for as long as it exists, but does not free them
/// on drop; hand it back to the source it came from instead.
pub struct Chunk {
  ptr: NonNull<u8>,
  len: usize,
}

impl Chunk {
  /// Wraps a raw region in a chunk.
  ///
  /// # Safety
  ///
  /// `ptr` must point to `len` initialized bytes that are exclusively owned
  /// by the returned chunk for its entire lifetime.
  pub unsafe fn new(
    ptr: NonNull<u8>,
    len: usize,
  ) -> Self {
    Self { ptr, len }
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  /// Releases ownership of the region, for handing back to its source.
  pub fn into_raw(self) -> (NonNull<u8>, usize) {
    (self.ptr, self.len)
  }

  pub(crate) fn bytes(&self) -> &[u8] {
    // SAFETY: the region is owned by this chunk and initialized, per the
    // `new` contract.
    unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
  }

  pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
    // SAFETY: same as `bytes`, and `&mut self` guarantees exclusivity.
    unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
  }

  pub(crate) fn read_word(
    &self,
    offset: usize,
  ) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&self.bytes()[offset..offset + 8]);
    u64::from_ne_bytes(word)
  }

  pub(crate) fn write_word(
    &mut self,
    offset: usize,
    word: u64,
  ) {
    self.bytes_mut()[offset..offset + 8].copy_from_slice(&word.to_ne_bytes());
  }
}

/// Where a pool gets its memory from.
///
/// The pool calls `acquire` once per growth event and `release` only when
/// it is dropped; chunks are never returned earlier.
pub trait ChunkSource {
  /// Hands over ownership of a fresh region of exactly `len` initialized
  /// bytes, or `None` if the underlying allocator is exhausted.
  fn acquire(&mut self, len: usize) -> Option<Chunk>;

  /// Takes a region previously produced by `acquire` back.
  fn release(&mut self, chunk: Chunk);
}

/// Chunk source backed by the C allocator.
#[derive(Clone, Copy, Default)]
pub struct SystemSource;

impl ChunkSource for SystemSource {
  fn acquire(
    &mut self,
    len: usize,
  ) -> Option<Chunk> {
    // calloc rather than malloc: the pool reads headers through safe byte
    // slices, so the region must come back initialized.
    let ptr = unsafe { libc::calloc(len, 1) };

    // SAFETY: a non-null calloc result owns `len` zeroed bytes.
    NonNull::new(ptr.cast::<u8>()).map(|ptr| unsafe { Chunk::new(ptr, len) })
  }

  fn release(&mut self, chunk: Chunk) {
    let (ptr, _) = chunk.into_raw();

    unsafe { libc::free(ptr.as_ptr().cast()) };
  }
}
