//! End-to-end allocator scenarios over the arena region.
//!
//! Everything here drives the public API only; structural invariants are
//! verified through `check()` between steps.

use std::ptr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use segalloc::{ArenaRegion, SegAllocator};

fn heap() -> SegAllocator<ArenaRegion> {
  let _ = env_logger::builder().is_test(true).try_init();
  SegAllocator::init(ArenaRegion::with_capacity(256 * 1024)).unwrap()
}

#[test]
fn s1_freed_block_is_reused_first() {
  let mut heap = heap();

  unsafe {
    let a = heap.allocate(24);
    let b = heap.allocate(24);
    assert!(!a.is_null() && !b.is_null());

    heap.release(a);
    let c = heap.allocate(24);

    assert_eq!(c, a);
  }

  heap.check().unwrap();
}

#[test]
fn s2_triple_release_merges_the_region() {
  let mut heap = heap();

  unsafe {
    let a = heap.allocate(16);
    let b = heap.allocate(16);
    let c = heap.allocate(16);

    heap.release(a);
    heap.release(c);
    heap.release(b);
    heap.check().unwrap();

    // The three blocks and the trailing remainder merged back into one
    // region; an allocation spanning all of them starts where `a` sat.
    let big = heap.allocate(200);
    assert_eq!(big, a);
  }

  heap.check().unwrap();
}

#[test]
fn s3_large_request_extends_the_region() {
  let mut heap = heap();

  unsafe {
    let a = heap.allocate(4096);
    assert!(!a.is_null());
    assert_eq!(a as usize % 8, 0);
    assert!(heap.payload_size(a) >= 4096);

    ptr::write_bytes(a, 0x77, 4096);
    assert_eq!(*a.add(4095), 0x77);
  }

  heap.check().unwrap();
}

#[test]
fn s4_growth_preserves_the_old_payload() {
  let mut heap = heap();

  unsafe {
    let a = heap.allocate(100);
    ptr::write_bytes(a, 0xAB, 100);

    let b = heap.resize(a, 200);
    assert!(!b.is_null());

    for i in 0..100 {
      assert_eq!(*b.add(i), 0xAB);
    }
  }

  heap.check().unwrap();
}

#[test]
fn s5_small_shrink_stays_in_place() {
  let mut heap = heap();

  unsafe {
    let p = heap.allocate(24);
    let q = heap.resize(p, 8);

    assert_eq!(q, p);
  }

  heap.check().unwrap();
}

#[test]
fn s6_zeroed_allocation() {
  let mut heap = heap();

  unsafe {
    let p = heap.zeroed_allocate(10, 16);
    assert!(!p.is_null());
    assert_eq!(p as usize % 8, 0);

    for i in 0..160 {
      assert_eq!(*p.add(i), 0);
    }
  }

  heap.check().unwrap();
}

#[test]
fn law_payload_round_trip() {
  let mut heap = heap();

  unsafe {
    let p = heap.allocate(64);
    for i in 0..64 {
      *p.add(i) = i as u8;
    }

    let q = heap.allocate(64);
    ptr::write_bytes(q, 0xEE, 64);

    for i in 0..64 {
      assert_eq!(*p.add(i), i as u8);
    }

    heap.release(p);
    heap.release(q);
  }

  heap.check().unwrap();
}

#[test]
fn law_resize_to_own_size_is_identity() {
  let mut heap = heap();

  unsafe {
    let p = heap.allocate(48);
    let n = heap.payload_size(p);

    assert_eq!(heap.resize(p, n), p);
  }

  heap.check().unwrap();
}

#[test]
fn law_double_resize_is_stable() {
  let mut heap = heap();

  unsafe {
    let p = heap.allocate(32);
    ptr::write_bytes(p, 0x42, 32);

    let q = heap.resize(p, 300);
    let r = heap.resize(q, 300);

    assert_eq!(r, q);
    for i in 0..32 {
      assert_eq!(*r.add(i), 0x42);
    }
  }

  heap.check().unwrap();
}

#[test]
fn boundary_zero_and_one() {
  let mut heap = heap();

  unsafe {
    assert!(heap.allocate(0).is_null());

    // A one-byte request still gets the 16-byte minimum block.
    let p = heap.allocate(1);
    assert!(!p.is_null());
    assert_eq!(heap.payload_size(p), 8);
  }

  heap.check().unwrap();
}

#[test]
fn boundary_alternating_same_size_is_stable() {
  let mut heap = heap();

  unsafe {
    let first = heap.allocate(40);
    heap.release(first);

    for _ in 0..5 {
      let p = heap.allocate(40);
      assert_eq!(p, first);
      heap.release(p);
    }
  }

  heap.check().unwrap();
}

#[test]
fn randomized_mix_keeps_the_heap_consistent() {
  let _ = env_logger::builder().is_test(true).try_init();
  let mut heap = SegAllocator::init(ArenaRegion::with_capacity(1 << 20)).unwrap();
  let mut rng = StdRng::seed_from_u64(0x5E6A110C);
  let mut live: Vec<(*mut u8, usize, u8)> = Vec::new();

  unsafe {
    for step in 0..2000usize {
      match rng.gen_range(0..100) {
        // Allocate and stamp a pattern.
        0..=49 => {
          let size = rng.gen_range(1..=512);
          let fill = (step % 251) as u8;
          let p = heap.allocate(size);
          if !p.is_null() {
            ptr::write_bytes(p, fill, size);
            live.push((p, size, fill));
          }
        }

        // Release a random allocation, verifying its pattern first.
        50..=79 => {
          if !live.is_empty() {
            let idx = rng.gen_range(0..live.len());
            let (p, size, fill) = live.swap_remove(idx);
            for i in 0..size {
              assert_eq!(*p.add(i), fill, "payload damaged before release");
            }
            heap.release(p);
          }
        }

        // Resize a random allocation; the common prefix must survive.
        _ => {
          if !live.is_empty() {
            let idx = rng.gen_range(0..live.len());
            let (p, size, fill) = live[idx];
            let new_size = rng.gen_range(1..=768);

            let q = heap.resize(p, new_size);
            if q.is_null() {
              continue;
            }

            for i in 0..size.min(new_size) {
              assert_eq!(*q.add(i), fill, "payload damaged by resize");
            }

            ptr::write_bytes(q, fill, new_size);
            live[idx] = (q, new_size, fill);
          }
        }
      }

      if step % 64 == 0 {
        heap.check().unwrap();
      }
    }

    for (p, size, fill) in live.drain(..) {
      for i in 0..size {
        assert_eq!(*p.add(i), fill);
      }
      heap.release(p);
    }
  }

  heap.check().unwrap();
}
