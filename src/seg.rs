//! # Segregated-fit allocator
//!
//! The allocator services allocation, release, resize, and zeroed-allocation
//! requests over a single contiguous region obtained from a [`Region`]
//! provider. Free blocks are indexed by power-of-two size class, adjacent
//! free blocks coalesce eagerly, and placement is first-fit within the
//! smallest adequate class.
//!
//! ## Heap Layout
//!
//! The region starts with the persistent free-list table, followed by an
//! alignment pad and the two sentinel blocks that remove every edge case
//! from neighbor traversal:
//!
//! ```text
//!          table (13 words)     pad    prologue   interior blocks   epilogue
//!   ┌──────────────────────────┬─────┬─────┬─────┬────────////────┬─────┐
//!   │ head[0] ... head[12]     │  8  │ 8|1 │ 8|1 │   blocks ...   │ 0|1 │
//!   └──────────────────────────┴─────┴─────┴─────┴────────////────┴─────┘
//!   ▲                                ▲hdr  ▲ftr                   ▲hdr
//!   anchor (region base)             60    64                     last word
//! ```
//!
//! Every interior block carries matching header and footer tags; free blocks
//! additionally thread pred/succ offsets through their payload, forming the
//! segregated class lists.
//!
//! ## Request Flow
//!
//! ```text
//!   allocate(n)                         release(p)
//!        │                                  │
//!        ▼                                  ▼
//!   round up to asize                clear alloc bits
//!        │                                  │
//!        ▼                                  ▼
//!   find_fit: scan classes           insert into class list
//!   upward, first fit                       │
//!        │        │ miss                    ▼
//!        │        ▼                   coalesce with free
//!        │   extend region            physical neighbors,
//!        │   by >= CHUNK_SIZE         reinsert the union
//!        ▼
//!   place: split when the
//!   remainder beats the
//!   split threshold
//! ```
//!
//! ## Thread Safety
//!
//! The allocator is strictly single-threaded; nothing blocks, suspends, or
//! tolerates reentrancy. Wrapping an instance in a coarse lock is the
//! documented extension point for shared use.

use std::ptr;

use log::{debug, trace};
use thiserror::Error;

use crate::align;
use crate::block::{
  CHUNK_SIZE, DSIZE, HeapView, MAX_LIST, MIN_BLOCK, MIN_LIST_SIZE, WSIZE,
};
use crate::check::{self, CheckError};
use crate::freelist::{Freelist, TABLE_BYTES, class_of};
use crate::region::Region;

/// Offset of the prologue block payload: table, pad, one header word in.
pub(crate) const PROLOGUE_BP: usize = TABLE_BYTES + DSIZE + WSIZE;

/// Offset of the first interior block payload. Also the byte length of the
/// initial skeleton (table + pad + prologue + epilogue header), since the
/// first epilogue sits where the first interior block will start.
pub(crate) const FIRST_BP: usize = PROLOGUE_BP + DSIZE;

/// Setup failure reported by [`SegAllocator::init`].
#[derive(Debug, Error)]
pub enum InitError {
  /// The region provider could not supply the initial heap.
  #[error("region provider exhausted during heap setup")]
  RegionExhausted,
}

/// Rounds a request up to a legal block size: payload plus both tags,
/// aligned, never below the minimum block. `None` means the request cannot
/// be represented and is treated as exhaustion.
fn adjusted_size(size: usize) -> Option<usize> {
  let padded = size.checked_add(DSIZE + DSIZE - 1)?;
  let asize = (padded & !(DSIZE - 1)).max(MIN_BLOCK);

  if asize > u32::MAX as usize & !(DSIZE - 1) {
    return None;
  }

  Some(asize)
}

/// A segregated-fit storage allocator over a [`Region`].
///
/// All heap metadata (boundary tags, free links, the class table) lives in
/// the region's bytes; the struct itself holds only the provider and the
/// anchor-relative view. Payload pointers handed out stay valid until the
/// matching [`release`](SegAllocator::release).
pub struct SegAllocator<R: Region> {
  region: R,
  view: HeapView,
  list: Freelist,
}

impl<R: Region> SegAllocator<R> {
  /// Builds a heap inside `region`: zeroed class table, alignment pad,
  /// prologue and epilogue sentinels, then a first extension of
  /// [`CHUNK_SIZE`] bytes, coalesced into one free block.
  ///
  /// Consuming the region here is what makes double initialization
  /// unrepresentable.
  pub fn init(mut region: R) -> Result<Self, InitError> {
    let base = region.extend(FIRST_BP).ok_or(InitError::RegionExhausted)?;
    let anchor = base.as_ptr() as usize;
    debug_assert_eq!(anchor % DSIZE, 0);

    let view = HeapView::new(anchor);
    let list = Freelist::new(view, 0);
    let mut heap = Self { region, view, list };

    unsafe {
      for class in 0..=MAX_LIST {
        list.set_head(class, 0);
      }

      view.write_tags(PROLOGUE_BP, DSIZE, true);
      view.write_header(FIRST_BP, 0, true);

      heap
        .extend_heap(CHUNK_SIZE)
        .ok_or(InitError::RegionExhausted)?;
    }

    debug!("init: anchor={anchor:#x}, initial chunk={CHUNK_SIZE}");
    heap.debug_check();

    Ok(heap)
  }

  /// Allocates `size` bytes and returns an 8-byte-aligned payload pointer,
  /// or null when `size` is zero or the region is exhausted. On failure the
  /// heap is left exactly as it was.
  ///
  /// # Safety
  ///
  /// The returned pointer is valid until the matching
  /// [`release`](SegAllocator::release); the caller must not read past
  /// `size` bytes and must not release it twice.
  pub unsafe fn allocate(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    unsafe {
      if size == 0 {
        return ptr::null_mut();
      }

      let Some(asize) = adjusted_size(size) else {
        return ptr::null_mut();
      };

      let bp = match self.find_fit(asize) {
        Some(bp) => bp,
        None => {
          let request = asize.max(CHUNK_SIZE);
          match self.extend_heap(request) {
            Some(bp) => bp,
            None => return ptr::null_mut(),
          }
        }
      };

      self.place(bp, asize);
      debug!("allocate: size={size} asize={asize} bp={bp:#x}");
      self.debug_check();

      self.view.ptr(bp)
    }
  }

  /// Returns the block at `ptr` to the heap and merges it with any free
  /// physical neighbor. Null is a no-op.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a pointer previously returned by
  /// [`allocate`](SegAllocator::allocate), [`resize`](SegAllocator::resize)
  /// or [`zeroed_allocate`](SegAllocator::zeroed_allocate) on this
  /// allocator and not yet released.
  pub unsafe fn release(
    &mut self,
    ptr: *mut u8,
  ) {
    unsafe {
      if ptr.is_null() {
        return;
      }

      let bp = self.view.offset_of(ptr);
      debug!("release: bp={bp:#x} size={}", self.view.size(bp));
      self.free_block(bp);
      self.debug_check();
    }
  }

  /// Resizes the allocation at `ptr` to `size` bytes.
  ///
  /// Null `ptr` allocates; zero `size` releases and returns null. Shrinks
  /// happen in place, carving the tail off as a free block when it is large
  /// enough to stand alone. Growth moves the payload to a fresh block and
  /// releases the old one; if that allocation fails, null comes back and
  /// the original block is untouched.
  ///
  /// # Safety
  ///
  /// Same contract as [`release`](SegAllocator::release) for `ptr`; the
  /// returned pointer supersedes it unless the call fails.
  pub unsafe fn resize(
    &mut self,
    ptr: *mut u8,
    size: usize,
  ) -> *mut u8 {
    unsafe {
      if ptr.is_null() {
        return self.allocate(size);
      }
      if size == 0 {
        self.release(ptr);
        return ptr::null_mut();
      }

      let Some(asize) = adjusted_size(size) else {
        return ptr::null_mut();
      };

      let bp = self.view.offset_of(ptr);
      let old = self.view.size(bp);

      if asize == old {
        return ptr;
      }

      if asize < old {
        let remainder = old - asize;
        if remainder <= MIN_BLOCK {
          // The tail cannot stand alone as a block; the caller keeps it.
          return ptr;
        }

        self.view.write_tags(bp, asize, true);
        let rest = bp + asize;
        self.view.write_tags(rest, remainder, true);
        debug!("resize: shrink bp={bp:#x} {old}->{asize}, freeing tail");
        self.free_block(rest);
        self.debug_check();
        return ptr;
      }

      let new_ptr = self.allocate(size);
      if new_ptr.is_null() {
        return ptr::null_mut();
      }

      let old_payload = old - DSIZE;
      ptr::copy_nonoverlapping(ptr, new_ptr, size.min(old_payload));
      debug!("resize: moved bp={bp:#x} {old}->{asize}");
      self.release(ptr);

      new_ptr
    }
  }

  /// Allocates `count * size` bytes of zeroed memory. Overflow of the
  /// multiplication is reported as exhaustion.
  ///
  /// # Safety
  ///
  /// Same contract as [`allocate`](SegAllocator::allocate).
  pub unsafe fn zeroed_allocate(
    &mut self,
    count: usize,
    size: usize,
  ) -> *mut u8 {
    unsafe {
      let Some(total) = count.checked_mul(size) else {
        return ptr::null_mut();
      };

      let ptr = self.allocate(total);
      if !ptr.is_null() {
        ptr::write_bytes(ptr, 0, total);
      }

      ptr
    }
  }

  /// Usable payload bytes of the allocation at `ptr`.
  ///
  /// # Safety
  ///
  /// `ptr` must be a live pointer returned by this allocator.
  pub unsafe fn payload_size(
    &self,
    ptr: *const u8,
  ) -> usize {
    unsafe { self.view.size(self.view.offset_of(ptr)) - DSIZE }
  }

  /// Runs the full consistency check over the heap and every class list.
  pub fn check(&self) -> Result<(), CheckError> {
    check::check_heap(self)
  }

  /// Logs one line per block, prologue to epilogue. Read-only.
  pub fn dump(&self) {
    unsafe {
      let mut bp = FIRST_BP;

      debug!(
        "heap: anchor={:#x} span={} bytes",
        self.view.anchor(),
        self.region.high() - self.region.low() + 1,
      );

      while self.view.size(bp) > 0 {
        debug!(
          "  bp={bp:#x} size={} {}",
          self.view.size(bp),
          if self.view.is_alloc(bp) { "allocated" } else { "free" },
        );
        bp = self.view.next_phys(bp);
      }
    }
  }

  /// Clears the allocated bit, indexes the block, and coalesces.
  unsafe fn free_block(
    &mut self,
    bp: usize,
  ) {
    unsafe {
      self.view.mark(bp, false);
      self.list.insert(bp, self.view.size(bp));
      self.coalesce(bp);
    }
  }

  /// Merges the free block `bp` with whichever physical neighbors are free
  /// and reindexes the union by its final size. Returns the union's offset.
  unsafe fn coalesce(
    &mut self,
    bp: usize,
  ) -> usize {
    unsafe {
      let prev = self.view.prev_phys(bp);
      let next = self.view.next_phys(bp);
      let prev_free = !self.view.is_alloc(prev);
      let next_free = !self.view.is_alloc(next);

      if !prev_free && !next_free {
        return bp;
      }

      self.list.remove(bp);
      let mut start = bp;
      let mut size = self.view.size(bp);

      if next_free {
        self.list.remove(next);
        size += self.view.size(next);
      }

      if prev_free {
        self.list.remove(prev);
        size += self.view.size(prev);
        start = prev;
      }

      // The union is inserted exactly once, after both tags carry the
      // final size, so it lands in the class of the merged block.
      self.view.write_tags(start, size, false);
      self.list.insert(start, size);
      trace!("coalesce: bp={bp:#x} -> start={start:#x} size={size}");

      start
    }
  }

  /// First fit: walk class lists in insertion order, starting at the
  /// request's class and moving up.
  unsafe fn find_fit(
    &self,
    asize: usize,
  ) -> Option<usize> {
    unsafe {
      for class in class_of(asize)..=MAX_LIST {
        let mut bp = self.list.head(class);

        while bp != 0 {
          if self.view.size(bp) >= asize {
            return Some(bp);
          }
          bp = self.view.succ(bp);
        }
      }

      None
    }
  }

  /// Claims `asize` bytes of the free block `bp`, splitting off the
  /// remainder when it strictly beats the split threshold. A remainder of
  /// exactly one minimum class would fragment the heap for nothing, so it
  /// is consumed with the allocation.
  unsafe fn place(
    &mut self,
    bp: usize,
    asize: usize,
  ) {
    unsafe {
      let csize = self.view.size(bp);
      debug_assert!(csize >= asize);

      self.list.remove(bp);

      let remainder = csize - asize;
      if remainder > MIN_LIST_SIZE {
        self.view.write_tags(bp, asize, true);
        let rest = bp + asize;
        self.view.write_tags(rest, remainder, false);
        self.list.insert(rest, remainder);
        trace!("place: bp={bp:#x} asize={asize}, split rest={rest:#x} remainder={remainder}");
      } else {
        self.view.write_tags(bp, csize, true);
        trace!("place: bp={bp:#x} consumed whole block csize={csize}");
      }
    }
  }

  /// Grows the region, lays a free block over the new bytes, moves the
  /// epilogue to the new end, and coalesces backward. Returns the offset of
  /// the resulting free block, or `None` on exhaustion (heap untouched).
  unsafe fn extend_heap(
    &mut self,
    bytes: usize,
  ) -> Option<usize> {
    unsafe {
      let size = align!(bytes);

      // Offsets are packed into u32 link words; refuse growth past that.
      let span = self.region.high() - self.region.low() + 1;
      if span + size > u32::MAX as usize & !(DSIZE - 1) {
        return None;
      }

      let base = self.region.extend(size)?;
      let bp = self.view.offset_of(base.as_ptr());

      // The new bytes start where the old epilogue header sat; that word
      // becomes the header of the new free block.
      self.view.write_tags(bp, size, false);
      self.view.write_header(bp + size, 0, true);
      self.list.insert(bp, size);

      debug!("extend: +{size} bytes at bp={bp:#x}");
      Some(self.coalesce(bp))
    }
  }

  pub(crate) fn view(&self) -> HeapView {
    self.view
  }

  pub(crate) fn freelist(&self) -> Freelist {
    self.list
  }

  /// Current region bounds as `(low, high)`, both inclusive.
  pub(crate) fn bounds(&self) -> (usize, usize) {
    (self.region.low(), self.region.high())
  }

  #[cfg(feature = "heapcheck")]
  fn debug_check(&self) {
    if let Err(err) = self.check() {
      log::warn!("heap check failed: {err}");
    }
  }

  #[cfg(not(feature = "heapcheck"))]
  fn debug_check(&self) {}
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::region::ArenaRegion;

  fn heap() -> SegAllocator<ArenaRegion> {
    SegAllocator::init(ArenaRegion::with_capacity(64 * 1024)).unwrap()
  }

  #[test]
  fn init_produces_a_consistent_heap() {
    let heap = heap();
    heap.check().unwrap();
  }

  #[test]
  fn allocate_zero_returns_null_without_heap_change() {
    let mut heap = heap();
    let high_before = heap.bounds().1;

    let p = unsafe { heap.allocate(0) };

    assert!(p.is_null());
    assert_eq!(heap.bounds().1, high_before);
    heap.check().unwrap();
  }

  #[test]
  fn allocate_one_returns_minimum_block() {
    let mut heap = heap();

    unsafe {
      let p = heap.allocate(1);
      assert!(!p.is_null());
      assert_eq!(heap.view().size(heap.view().offset_of(p)), MIN_BLOCK);
    }
    heap.check().unwrap();
  }

  #[test]
  fn allocations_are_aligned_and_disjoint() {
    let mut heap = heap();

    unsafe {
      let mut ptrs = Vec::new();
      for size in [1usize, 7, 8, 24, 100, 500] {
        let p = heap.allocate(size);
        assert!(!p.is_null());
        assert_eq!(p as usize % DSIZE, 0);
        ptrs.push((p as usize, size));
      }

      ptrs.sort();
      for pair in ptrs.windows(2) {
        assert!(pair[0].0 + pair[0].1 <= pair[1].0, "payloads overlap");
      }
    }
    heap.check().unwrap();
  }

  #[test]
  fn released_block_is_reused_for_same_size() {
    let mut heap = heap();

    unsafe {
      let a = heap.allocate(24);
      let _b = heap.allocate(24);
      heap.release(a);

      let c = heap.allocate(24);
      assert_eq!(c, a);
    }
    heap.check().unwrap();
  }

  #[test]
  fn payload_survives_between_allocate_and_release() {
    let mut heap = heap();

    unsafe {
      let p = heap.allocate(64);
      ptr::write_bytes(p, 0x5A, 64);

      // Neighbor traffic must not corrupt the payload.
      let q = heap.allocate(32);
      ptr::write_bytes(q, 0xFF, 32);

      for i in 0..64 {
        assert_eq!(*p.add(i), 0x5A);
      }
      heap.release(p);
      heap.release(q);
    }
    heap.check().unwrap();
  }

  #[test]
  fn allocation_larger_than_chunk_extends_the_region() {
    let mut heap = heap();

    unsafe {
      let p = heap.allocate(4096);
      assert!(!p.is_null());

      let bp = heap.view().offset_of(p);
      assert!(heap.view().size(bp) >= 4096 + DSIZE);
      ptr::write_bytes(p, 0xCD, 4096);
    }
    heap.check().unwrap();
  }

  #[test]
  fn resize_same_class_is_identity() {
    let mut heap = heap();

    unsafe {
      let p = heap.allocate(24);
      let q = heap.resize(p, 24);
      assert_eq!(q, p);

      // Shrinks whose tail cannot stand alone keep the block whole.
      let r = heap.resize(p, 8);
      assert_eq!(r, p);
      assert_eq!(heap.view().size(heap.view().offset_of(r)), 32);
    }
    heap.check().unwrap();
  }

  #[test]
  fn resize_shrink_carves_a_free_tail() {
    let mut heap = heap();

    unsafe {
      let p = heap.allocate(100);
      let bp = heap.view().offset_of(p);
      let old = heap.view().size(bp);
      assert_eq!(old, 112);

      let q = heap.resize(p, 16);
      assert_eq!(q, p);
      assert_eq!(heap.view().size(bp), 24);

      // The carved tail is free and coalesces onward.
      let tail = heap.view().next_phys(bp);
      assert!(!heap.view().is_alloc(tail));
    }
    heap.check().unwrap();
  }

  #[test]
  fn resize_growth_preserves_prefix_and_frees_old() {
    let mut heap = heap();

    unsafe {
      let p = heap.allocate(100);
      for i in 0..100 {
        *p.add(i) = 0xAB;
      }

      // Pin a block behind p so the grow cannot happen in place.
      let _pin = heap.allocate(24);

      let q = heap.resize(p, 200);
      assert!(!q.is_null());
      assert_ne!(q, p);
      for i in 0..100 {
        assert_eq!(*q.add(i), 0xAB);
      }

      // The old block went back to the free pool.
      assert!(!heap.view().is_alloc(heap.view().offset_of(p)));
      heap.release(q);
    }
    heap.check().unwrap();
  }

  #[test]
  fn zeroed_allocate_zeroes_and_checks_overflow() {
    let mut heap = heap();

    unsafe {
      let p = heap.zeroed_allocate(10, 16);
      assert!(!p.is_null());
      for i in 0..160 {
        assert_eq!(*p.add(i), 0);
      }

      let q = heap.zeroed_allocate(usize::MAX, 2);
      assert!(q.is_null());
    }
    heap.check().unwrap();
  }

  #[test]
  fn exhaustion_returns_null_and_leaves_heap_usable() {
    let mut heap = SegAllocator::init(ArenaRegion::with_capacity(1024)).unwrap();

    unsafe {
      let p = heap.allocate(100_000);
      assert!(p.is_null());
      heap.check().unwrap();

      let q = heap.allocate(24);
      assert!(!q.is_null());
    }
    heap.check().unwrap();
  }

  #[test]
  fn triple_release_coalesces_into_one_block() {
    let mut heap = heap();

    unsafe {
      let a = heap.allocate(16);
      let b = heap.allocate(16);
      let c = heap.allocate(16);

      heap.release(a);
      heap.release(c);
      heap.release(b);

      // Everything merged back; the next allocation of the combined size
      // starts where `a` sat.
      let big = heap.allocate(3 * 24 - DSIZE);
      assert_eq!(big, a);
    }
    heap.check().unwrap();
  }

  #[test]
  fn adjusted_size_rounds_and_rejects_overflow() {
    assert_eq!(adjusted_size(1), Some(MIN_BLOCK));
    assert_eq!(adjusted_size(8), Some(MIN_BLOCK));
    assert_eq!(adjusted_size(9), Some(24));
    assert_eq!(adjusted_size(24), Some(32));
    assert_eq!(adjusted_size(usize::MAX), None);
    assert_eq!(adjusted_size(u32::MAX as usize), None);
  }
}
