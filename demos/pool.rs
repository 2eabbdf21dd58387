use std::io::{Read, stdout};

use rpool::Pool;

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`,
/// `htop`, or just watch the free list evolve step by step.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the pool totals: everything obtained from the system allocator is
/// either handed out or sitting on the free list.
fn print_stats(label: &str, pool: &Pool) {
  let stats = pool.stats();
  println!(
    "[{}] reserved = {} bytes, free = {} bytes across {} blocks",
    label, stats.total_reserved, stats.total_free, stats.free_blocks
  );
}

fn main() {
  // Run with RUST_LOG=trace to watch the pool grow, carve and merge.
  env_logger::init();

  let mut pool = Pool::new();

  // --------------------------------------------------------------------
  // 1) Allocate 100 bytes (rounds up to 112, the next granule multiple).
  //    The first allocation grows the pool by one chunk.
  // --------------------------------------------------------------------
  let first = pool.allocate(100);
  println!("\n[1] Allocate 100 bytes -> {:?}", first);
  print_stats("1", &pool);

  // Write something into the block to show it's usable.
  pool.data_mut(first).unwrap().fill(0xab);
  println!("[1] Payload of {} bytes filled with 0xAB", pool.data(first).unwrap().len());

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 2) Allocate two more blocks; all three are carved from the same chunk.
  // --------------------------------------------------------------------
  let second = pool.allocate(200);
  let third = pool.allocate(50);
  println!("\n[2] Allocate 200 and 50 bytes -> {:?}, {:?}", second, third);
  print_stats("2", &pool);

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 3) Dump the free list: one line per free node, in address order.
  // --------------------------------------------------------------------
  println!("\n[3] Free list:");
  pool.dump_free_list(&mut stdout()).unwrap();

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 4) Release the middle block. It lands on the free list between the
  //    live neighbours, so nothing can merge yet.
  // --------------------------------------------------------------------
  pool.release(Some(second)).unwrap();
  println!("\n[4] Released the 200-byte block");
  print_stats("4", &pool);
  pool.dump_free_list(&mut stdout()).unwrap();

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 5) Allocate 150 bytes: first-fit reuses the freed region instead of
  //    growing the pool.
  // --------------------------------------------------------------------
  let reused = pool.allocate(150);
  println!("\n[5] Allocate 150 bytes -> {:?} (reused the freed region)", reused);
  print_stats("5", &pool);

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 6) Ask for more than any free block holds: the pool grows by another
  //    chunk, sized by the request.
  // --------------------------------------------------------------------
  let big = pool.allocate(64 * 1024);
  println!("\n[6] Allocate 64 KiB -> {:?} (new chunk)", big);
  print_stats("6", &pool);

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 7) Releasing a handle twice is reported, not undefined behavior.
  // --------------------------------------------------------------------
  println!("\n[7] Second release of the 200-byte handle: {}", pool.release(Some(second)).unwrap_err());

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 8) Release everything. Adjacent blocks merge on the way back, so each
  //    chunk collapses to a single free block.
  // --------------------------------------------------------------------
  for handle in [first, third, reused, big] {
    pool.release(Some(handle)).unwrap();
  }
  println!("\n[8] Released everything");
  print_stats("8", &pool);
  pool.dump_free_list(&mut stdout()).unwrap();

  println!("\n[9] End of demo. Dropping the pool returns the chunks to the system.");
}
