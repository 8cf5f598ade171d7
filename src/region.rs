//! The region provider seam.
//!
//! The allocator consumes exactly three operations from whatever backs its
//! memory: grow the region by `n` bytes, and query the current low and high
//! bounds. Everything else about the backing store is opaque; the bytes only
//! need to be contiguous and stay put once handed out.
//!
//! Two providers ship with the crate:
//!
//! * [`SbrkRegion`] moves the program break with `sbrk(2)`, the classic
//!   process heap.
//! * [`ArenaRegion`] bumps a watermark through a fixed, owned buffer; its
//!   determinism makes it the backend of the test suite and the demo.

use std::ptr::NonNull;

use libc::{c_void, intptr_t, sbrk};

use crate::{align, block::DSIZE};

/// A contiguous, growable run of bytes.
///
/// `extend` requests are positive multiples of 8 and the base handed back
/// by the first `extend` is 8-byte aligned; both bounds are meaningful only
/// after the first successful `extend`.
pub trait Region {
  /// Grows the region by `n` bytes, returning the address of the first new
  /// byte, or `None` when the backing store is exhausted. The new bytes
  /// start exactly where the previous extension ended.
  fn extend(
    &mut self,
    n: usize,
  ) -> Option<NonNull<u8>>;

  /// Address of the first byte of the region.
  fn low(&self) -> usize;

  /// Address of the last byte of the region (inclusive).
  fn high(&self) -> usize;
}

/// Region backed by the process program break.
///
/// `sbrk(n)` returns the old break, which is the start of the fresh bytes.
/// Exhaustion shows up as `(void *)-1`. The process must not move the break
/// behind the region's back while an allocator owns it.
pub struct SbrkRegion {
  low: usize,
  high: usize,
}

impl SbrkRegion {
  pub fn new() -> Self {
    Self { low: 0, high: 0 }
  }
}

impl Region for SbrkRegion {
  fn extend(
    &mut self,
    n: usize,
  ) -> Option<NonNull<u8>> {
    debug_assert!(n > 0 && n % DSIZE == 0);

    // sbrk returns the OLD program break (start of new memory) and
    // (void*)-1 on failure.
    let raw = unsafe { sbrk(n as intptr_t) };
    if raw == usize::MAX as *mut c_void {
      return None;
    }

    let base = raw as usize;
    if self.low == 0 {
      self.low = base;
    }
    self.high = base + n - 1;

    NonNull::new(raw as *mut u8)
  }

  fn low(&self) -> usize {
    self.low
  }

  fn high(&self) -> usize {
    self.high
  }
}

/// Region backed by a fixed-capacity owned buffer.
///
/// Extension bumps a watermark until the capacity is hit, after which every
/// `extend` reports exhaustion. The buffer is u64-backed so its base carries
/// the 8-byte alignment the allocator relies on.
pub struct ArenaRegion {
  buf: Box<[u64]>,
  used: usize,
}

impl ArenaRegion {
  /// Creates an arena able to hand out `capacity` bytes, rounded up to the
  /// alignment unit.
  pub fn with_capacity(capacity: usize) -> Self {
    let words = align!(capacity) / DSIZE;
    Self {
      buf: vec![0u64; words].into_boxed_slice(),
      used: 0,
    }
  }

  /// Bytes handed out so far.
  pub fn used(&self) -> usize {
    self.used
  }

  /// Total bytes the arena can hand out.
  pub fn capacity(&self) -> usize {
    self.buf.len() * DSIZE
  }
}

impl Region for ArenaRegion {
  fn extend(
    &mut self,
    n: usize,
  ) -> Option<NonNull<u8>> {
    debug_assert!(n > 0 && n % DSIZE == 0);

    if n > self.capacity() - self.used {
      return None;
    }

    let base = unsafe { (self.buf.as_mut_ptr() as *mut u8).add(self.used) };
    self.used += n;

    NonNull::new(base)
  }

  fn low(&self) -> usize {
    self.buf.as_ptr() as usize
  }

  fn high(&self) -> usize {
    self.buf.as_ptr() as usize + self.used - 1
  }
}
