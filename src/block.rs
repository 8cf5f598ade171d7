//! Boundary-tag block layout.
//!
//! Every block carries a 4-byte header and a 4-byte footer, both encoding
//! `size | allocated_bit` where `size` counts the whole block including the
//! two tags. Blocks are addressed by the byte offset of their payload from
//! the heap anchor, so a handle stays valid no matter how the region was
//! obtained.
//!
//! ```text
//!     header            payload                        footer
//!   ┌────────┬──────────────────────────────────────┬────────┐
//!   │ size|a │  user bytes (free: pred, succ links) │ size|a │
//!   └────────┴──────────────────────────────────────┴────────┘
//!            ▲
//!            └── bp (offset handle, 8-byte aligned)
//! ```

/// Header/footer word size in bytes.
pub const WSIZE: usize = 4;

/// Alignment unit; payload pointers and block sizes are multiples of this.
pub const DSIZE: usize = 8;

/// Smallest legal block: header + footer + room for the two link words.
pub const MIN_BLOCK: usize = 16;

/// Upper bound of size class 0 and the split threshold.
pub const MIN_LIST_SIZE: usize = 16;

/// Highest size-class index; class sizes are `MIN_LIST_SIZE << k`.
pub const MAX_LIST: usize = 12;

/// Default heap extension in bytes.
pub const CHUNK_SIZE: usize = 256;

/// Packs a block size and its allocated bit into a tag word.
pub(crate) fn pack(
  size: usize,
  alloc: bool,
) -> u32 {
  debug_assert!(size <= u32::MAX as usize);
  debug_assert_eq!(size & (DSIZE - 1), 0);
  size as u32 | alloc as u32
}

/// Word-level access to the heap bytes, relative to the anchor captured at
/// init. Copyable by design; it carries no ownership, the allocator owning
/// the region keeps the bytes alive.
#[derive(Clone, Copy)]
pub(crate) struct HeapView {
  anchor: usize,
}

impl HeapView {
  pub(crate) fn new(anchor: usize) -> Self {
    Self { anchor }
  }

  pub(crate) fn anchor(self) -> usize {
    self.anchor
  }

  /// Raw payload pointer for an offset handle.
  pub(crate) fn ptr(
    self,
    off: usize,
  ) -> *mut u8 {
    (self.anchor + off) as *mut u8
  }

  /// Offset handle for a payload pointer returned to a caller.
  pub(crate) fn offset_of(
    self,
    ptr: *const u8,
  ) -> usize {
    ptr as usize - self.anchor
  }

  /// Reads the little-endian word at `off`.
  ///
  /// # Safety
  ///
  /// `off..off + 4` must lie inside bytes the region has handed out.
  pub(crate) unsafe fn word(
    self,
    off: usize,
  ) -> u32 {
    unsafe { u32::from_le_bytes(*(self.ptr(off) as *const [u8; 4])) }
  }

  /// Writes the little-endian word at `off`.
  ///
  /// # Safety
  ///
  /// Same bounds requirement as [`HeapView::word`], and the word must not
  /// overlap a live payload.
  pub(crate) unsafe fn put(
    self,
    off: usize,
    value: u32,
  ) {
    unsafe {
      *(self.ptr(off) as *mut [u8; 4]) = value.to_le_bytes();
    }
  }

  pub(crate) fn header(bp: usize) -> usize {
    bp - WSIZE
  }

  /// # Safety
  ///
  /// `bp` must be the payload offset of an initialized block.
  pub(crate) unsafe fn size(
    self,
    bp: usize,
  ) -> usize {
    unsafe { (self.word(Self::header(bp)) & !(DSIZE as u32 - 1)) as usize }
  }

  /// # Safety
  ///
  /// `bp` must be the payload offset of an initialized block.
  pub(crate) unsafe fn is_alloc(
    self,
    bp: usize,
  ) -> bool {
    unsafe { self.word(Self::header(bp)) & 1 != 0 }
  }

  /// # Safety
  ///
  /// `bp` must be the payload offset of an initialized block.
  pub(crate) unsafe fn footer(
    self,
    bp: usize,
  ) -> usize {
    unsafe { bp + self.size(bp) - DSIZE }
  }

  /// Payload offset of the physically next block.
  ///
  /// # Safety
  ///
  /// `bp` must be the payload offset of an initialized block that is not
  /// the epilogue.
  pub(crate) unsafe fn next_phys(
    self,
    bp: usize,
  ) -> usize {
    unsafe { bp + self.size(bp) }
  }

  /// Payload offset of the physically previous block, read from its footer.
  ///
  /// # Safety
  ///
  /// The preceding footer must be initialized; inside the heap interior the
  /// prologue guarantees this.
  pub(crate) unsafe fn prev_phys(
    self,
    bp: usize,
  ) -> usize {
    unsafe { bp - (self.word(bp - DSIZE) & !(DSIZE as u32 - 1)) as usize }
  }

  /// Writes matching header and footer tags for a block at `bp`.
  ///
  /// # Safety
  ///
  /// The `size` bytes starting at the header must lie inside the region and
  /// hold no live payload.
  pub(crate) unsafe fn write_tags(
    self,
    bp: usize,
    size: usize,
    alloc: bool,
  ) {
    unsafe {
      self.put(Self::header(bp), pack(size, alloc));
      self.put(bp + size - DSIZE, pack(size, alloc));
    }
  }

  /// Writes a header tag only; used for the epilogue sentinel.
  ///
  /// # Safety
  ///
  /// The four header bytes must lie inside the region.
  pub(crate) unsafe fn write_header(
    self,
    bp: usize,
    size: usize,
    alloc: bool,
  ) {
    unsafe {
      self.put(Self::header(bp), pack(size, alloc));
    }
  }

  /// Rewrites both tags keeping the size, flipping the allocated bit.
  ///
  /// # Safety
  ///
  /// `bp` must be the payload offset of an initialized block.
  pub(crate) unsafe fn mark(
    self,
    bp: usize,
    alloc: bool,
  ) {
    unsafe {
      let size = self.size(bp);
      self.write_tags(bp, size, alloc);
    }
  }

  // Free-list link fields live in the first two payload words of a free
  // block, stored as anchor-relative offsets. Offset 0 is the null link.

  /// # Safety
  ///
  /// `bp` must be the payload offset of a free block.
  pub(crate) unsafe fn pred(
    self,
    bp: usize,
  ) -> usize {
    unsafe { self.word(bp) as usize }
  }

  /// # Safety
  ///
  /// `bp` must be the payload offset of a free block.
  pub(crate) unsafe fn succ(
    self,
    bp: usize,
  ) -> usize {
    unsafe { self.word(bp + WSIZE) as usize }
  }

  /// # Safety
  ///
  /// `bp` must be the payload offset of a free block and `to` a valid
  /// offset handle or 0.
  pub(crate) unsafe fn set_pred(
    self,
    bp: usize,
    to: usize,
  ) {
    debug_assert!(to <= u32::MAX as usize);
    unsafe { self.put(bp, to as u32) }
  }

  /// # Safety
  ///
  /// Same as [`HeapView::set_pred`].
  pub(crate) unsafe fn set_succ(
    self,
    bp: usize,
    to: usize,
  ) {
    debug_assert!(to <= u32::MAX as usize);
    unsafe { self.put(bp + WSIZE, to as u32) }
  }
}
