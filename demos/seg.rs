use std::{io::Read, ptr};

use libc::sbrk;
use segalloc::{SbrkRegion, SegAllocator};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`,
/// `htop`, `gdb`, or just visually track how allocations change the
/// program break.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break using `sbrk(0)`.
/// The program break is the upper boundary of the heap managed via brk/sbrk.
fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    unsafe { sbrk(0) },
  );
}

fn main() {
  // Log to stderr; run with RUST_LOG=trace to watch every placement,
  // split, and coalesce as it happens.
  env_logger::init();

  print_program_break("start");

  // The allocator owns its region from here on. With SbrkRegion that means
  // it owns the program break.
  let mut heap =
    SegAllocator::init(SbrkRegion::new()).expect("could not reserve the initial heap");

  println!("\nHeap initialized: class table, sentinels, and one free chunk.");
  print_program_break("after init");
  block_until_enter_pressed();

  unsafe {
    // --------------------------------------------------------------------
    // 1) Allocate 24 bytes and write a recognizable pattern.
    // --------------------------------------------------------------------
    let first = heap.allocate(24);
    println!("\n[1] allocate(24) = {first:?}");
    ptr::write_bytes(first, 0xAB, 24);
    println!("[1] payload filled with 0xAB, usable = {} bytes", heap.payload_size(first));

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 2) A second allocation lands right behind the first; the free chunk
    //    is split, not extended.
    // --------------------------------------------------------------------
    let second = heap.allocate(24);
    println!("\n[2] allocate(24) = {second:?}");
    println!(
      "[2] distance from first = {} bytes (block size incl. tags)",
      second as usize - first as usize
    );

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 3) Release the first block and allocate the same size again: the
    //    free list hands the identical block back.
    // --------------------------------------------------------------------
    heap.release(first);
    println!("\n[3] released the first block");

    let third = heap.allocate(24);
    println!("[3] allocate(24) = {third:?}");
    println!(
      "[3] third == first? {}",
      if third == first {
        "Yes, the freed block was reused"
      } else {
        "No, it landed somewhere else"
      }
    );

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 4) Grow an allocation. The payload moves, the content survives.
    // --------------------------------------------------------------------
    let grown = heap.resize(third, 200);
    println!("\n[4] resize(24 -> 200) = {grown:?}");
    println!("[4] first payload byte after the move = {:#04x}", *grown);

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 5) Zeroed allocation.
    // --------------------------------------------------------------------
    let table = heap.zeroed_allocate(10, 16);
    println!("\n[5] zeroed_allocate(10, 16) = {table:?}");
    println!(
      "[5] all 160 bytes zero? {}",
      (0..160).all(|i| *table.add(i) == 0)
    );

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 6) A large allocation forces the region to extend; watch the program
    //    break move.
    // --------------------------------------------------------------------
    print_program_break("before large alloc");

    let big = heap.allocate(64 * 1024);
    println!("\n[6] allocate(64 KiB) = {big:?}");

    print_program_break("after large alloc");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 7) Verify the heap structure, then walk it into the log.
    // --------------------------------------------------------------------
    match heap.check() {
      Ok(()) => println!("\n[7] consistency check passed"),
      Err(err) => println!("\n[7] consistency check FAILED: {err}"),
    }
    heap.dump();

    println!("\n[8] End of demo. Process will exit and the OS will reclaim all memory.");
  }
}
