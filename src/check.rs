//! Heap consistency checker.
//!
//! A read-only pass over the whole heap: the physical block walk from
//! prologue to epilogue, then every class list. Each violated invariant maps
//! to one [`CheckError`] variant; the first hit is reported. The checker
//! never mutates; it is safe to call at any point between operations.

use thiserror::Error;

use crate::block::{DSIZE, HeapView, MAX_LIST, MIN_BLOCK, WSIZE, pack};
use crate::freelist::class_of;
use crate::region::Region;
use crate::seg::{FIRST_BP, PROLOGUE_BP, SegAllocator};

/// A structural invariant violation found in the heap.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CheckError {
  #[error("prologue tags damaged")]
  BadPrologue,

  #[error("epilogue header damaged or not at the region end")]
  BadEpilogue,

  #[error("block at offset {0:#x}: payload not 8-byte aligned")]
  Misaligned(usize),

  #[error("block at offset {0:#x}: illegal size {1}")]
  BadSize(usize, usize),

  #[error("block at offset {0:#x}: header and footer disagree")]
  TagMismatch(usize),

  #[error("block at offset {0:#x}: outside the region bounds")]
  OutOfBounds(usize),

  #[error("blocks at offsets {0:#x} and {1:#x}: adjacent free blocks left uncoalesced")]
  UncoalescedPair(usize, usize),

  #[error("block at offset {0:#x}: allocated but reachable from class list {1}")]
  AllocatedOnList(usize, usize),

  #[error("free block at offset {0:#x}: stored in class {1}, size implies class {2}")]
  WrongClass(usize, usize, usize),

  #[error("free block at offset {0:#x}: predecessor link does not point back")]
  BrokenLink(usize),

  #[error("class list {0}: walk visited more blocks than the heap holds")]
  ListCycle(usize),

  #[error("free-block counts disagree: {physical} by physical walk, {listed} across class lists")]
  CountMismatch { physical: usize, listed: usize },
}

/// Verifies every structural invariant of the heap. Pure read of state.
pub(crate) fn check_heap<R: Region>(heap: &SegAllocator<R>) -> Result<(), CheckError> {
  let view = heap.view();
  let list = heap.freelist();
  let (low, high) = heap.bounds();
  let anchor = view.anchor();

  unsafe {
    if view.word(HeapView::header(PROLOGUE_BP)) != pack(DSIZE, true)
      || view.word(PROLOGUE_BP) != pack(DSIZE, true)
    {
      return Err(CheckError::BadPrologue);
    }

    // Physical walk: every block between the sentinels, in address order.
    let mut physical_free = 0usize;
    let mut prev_free = false;
    let mut prev_bp = PROLOGUE_BP;
    let mut bp = FIRST_BP;

    loop {
      let hdr = anchor + HeapView::header(bp);
      if hdr < low || hdr + WSIZE - 1 > high {
        return Err(CheckError::OutOfBounds(bp));
      }

      let size = view.size(bp);
      if size == 0 {
        // The epilogue must be allocated, zero-sized, and the region's
        // final word.
        if view.word(HeapView::header(bp)) != pack(0, true) || hdr + WSIZE - 1 != high {
          return Err(CheckError::BadEpilogue);
        }
        break;
      }

      if (anchor + bp) % DSIZE != 0 {
        return Err(CheckError::Misaligned(bp));
      }
      if size < MIN_BLOCK || size % DSIZE != 0 {
        return Err(CheckError::BadSize(bp, size));
      }
      if hdr + size - 1 > high {
        return Err(CheckError::OutOfBounds(bp));
      }
      if view.word(HeapView::header(bp)) != view.word(view.footer(bp)) {
        return Err(CheckError::TagMismatch(bp));
      }

      let free = !view.is_alloc(bp);
      if free {
        physical_free += 1;
        if prev_free {
          return Err(CheckError::UncoalescedPair(prev_bp, bp));
        }
      }

      prev_free = free;
      prev_bp = bp;
      bp = view.next_phys(bp);
    }

    // List walk: membership, symmetry, classification.
    let mut listed_free = 0usize;

    for class in 0..=MAX_LIST {
      let mut steps = 0usize;
      let mut pred = 0usize;
      let mut bp = list.head(class);

      while bp != 0 {
        let addr = anchor + bp;
        if addr % DSIZE != 0 || addr < low || addr > high {
          return Err(CheckError::OutOfBounds(bp));
        }
        if view.is_alloc(bp) {
          return Err(CheckError::AllocatedOnList(bp, class));
        }
        if view.word(HeapView::header(bp)) != view.word(view.footer(bp)) {
          return Err(CheckError::TagMismatch(bp));
        }

        let implied = class_of(view.size(bp));
        if implied != class {
          return Err(CheckError::WrongClass(bp, class, implied));
        }
        if view.pred(bp) != pred {
          return Err(CheckError::BrokenLink(bp));
        }

        steps += 1;
        if steps > physical_free {
          return Err(CheckError::ListCycle(class));
        }

        listed_free += 1;
        pred = bp;
        bp = view.succ(bp);
      }
    }

    if physical_free != listed_free {
      return Err(CheckError::CountMismatch {
        physical: physical_free,
        listed: listed_free,
      });
    }
  }

  Ok(())
}
