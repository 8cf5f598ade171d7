//! # segalloc - A Segregated-Fit Storage Allocator
//!
//! This crate provides a **segregated-fit allocator** with boundary-tag
//! blocks over a single contiguous region obtained from a pluggable
//! provider (the process program break, or an owned arena).
//!
//! ## Overview
//!
//! Requests are served from a heap of blocks, each framed by a header and a
//! footer word. Free blocks are indexed by power-of-two size class and
//! merged with their physical neighbors the moment they become free:
//!
//! ```text
//!   Heap:
//!
//!   ┌───────────┬─────┬──────────┬──────────────┬──────────┬────┐
//!   │ class     │ pro │ alloc    │ free         │ alloc    │ epi│
//!   │ table     │ log │ block    │ block        │ block    │ log│
//!   └───────────┴─────┴──────────┴──────────────┴──────────┴────┘
//!        │                            ▲
//!        │ head[k]                    │
//!        └────────────────────────────┘
//!
//!   Each free block sits on exactly one class list; each class holds
//!   blocks up to twice the size of the class below it.
//! ```
//!
//! Placement is first-fit within the smallest adequate class, splitting the
//! chosen block when the remainder is worth keeping. Resize shrinks in
//! place and falls back to copy-and-release for growth.
//!
//! ## Crate Structure
//!
//! ```text
//!   segalloc
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── region     - Region providers (SbrkRegion, ArenaRegion)
//!   ├── block      - Boundary-tag layout and word access (internal)
//!   ├── freelist   - Segregated free-list index (internal)
//!   ├── seg        - SegAllocator implementation
//!   └── check      - Heap consistency checker
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use segalloc::{ArenaRegion, SegAllocator};
//!
//! fn main() {
//!     let mut heap = SegAllocator::init(ArenaRegion::with_capacity(64 * 1024))
//!         .expect("region exhausted");
//!
//!     unsafe {
//!         let p = heap.allocate(100);
//!         assert!(!p.is_null());
//!
//!         // Use the memory, then hand it back.
//!         p.write_bytes(0xAB, 100);
//!         heap.release(p);
//!     }
//! }
//! ```
//!
//! ## Consistency Checking
//!
//! [`SegAllocator::check`] walks the whole heap and every class list and
//! reports the first violated invariant. With the `heapcheck` feature the
//! allocator re-checks itself after every mutating operation and logs
//! violations through the `log` facade.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: no synchronization primitives; wrap the
//!   instance in a lock if you must share it
//! - **Monotonic region**: memory is never returned to the provider
//! - **One allocator per sbrk region**: [`SbrkRegion`] manipulates the
//!   process-wide program break
//!
//! ## Safety
//!
//! The allocation API deals in raw pointers and therefore lives behind
//! `unsafe`. Callers must ensure:
//! - Pointers passed to `release`/`resize` came from this allocator and are
//!   still live
//! - No pointer is released twice or used after release

pub mod align;
pub mod block;
mod check;
mod freelist;
pub mod region;
mod seg;

pub use check::CheckError;
pub use region::{ArenaRegion, Region, SbrkRegion};
pub use seg::{InitError, SegAllocator};
