use std::io::Read;

use segalloc::{Allocator, HeapSource, MemLib, Sbrk};

/// Waits until the user presses ENTER when `--step` was passed.
/// Useful when you want to inspect memory state with tools like `pmap`,
/// `gdb`, or just follow how the heap changes between steps.
fn block_until_enter_pressed(step: bool) {
  if step {
    println!("\n>>> Press ENTER to continue...");
    let _ = std::io::stdin().bytes().next();
  }
}

fn print_heap<S: HeapSource>(
  label: &str,
  allocator: &Allocator<S>,
) {
  match allocator.check() {
    Ok(stats) => println!(
      "[{}] heap = {} bytes, {} allocated / {} free blocks, {} extensions",
      label, stats.heap_size, stats.allocated_blocks, stats.free_blocks, stats.extensions
    ),
    Err(err) => println!("[{}] heap check failed: {}", label, err),
  }
}

fn run<S: HeapSource>(
  allocator: &mut Allocator<S>,
  step: bool,
) -> Result<(), segalloc::AllocError> {
  print_heap("start", allocator);
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 1) Two allocations, written to show they are usable.
  // --------------------------------------------------------------------
  let a = allocator.allocate(100)?;
  let b = allocator.allocate(200)?;
  allocator.payload_mut(a)?[..4].copy_from_slice(&0xDEADBEEFu32.to_ne_bytes());
  println!(
    "\n[1] a = {:#x} ({} usable), b = {:#x} ({} usable)",
    allocator.address(a),
    allocator.usable_size(a)?,
    allocator.address(b),
    allocator.usable_size(b)?
  );
  print_heap("1", allocator);
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 2) Free `a` and allocate something slightly smaller: the freed block
  //    is reused without growing the heap.
  // --------------------------------------------------------------------
  allocator.free(a)?;
  let c = allocator.allocate(90)?;
  println!(
    "\n[2] c = {:#x}, reused a's block? {}",
    allocator.address(c),
    if c == a { "yes" } else { "no" }
  );
  print_heap("2", allocator);
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 3) Grow `c` a few bytes at a time. After the first move the block
  //    grows in place.
  // --------------------------------------------------------------------
  let mut grown = c;
  for size in (100..=500).step_by(8) {
    if let Some(ptr) = allocator.reallocate(Some(grown), size)? {
      if ptr != grown {
        println!("[3] moved to {:#x} at {} bytes", allocator.address(ptr), size);
      }
      grown = ptr;
    }
  }
  print_heap("3", allocator);
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 4) A large block forces the heap to grow.
  // --------------------------------------------------------------------
  let big = allocator.allocate(64 * 1024)?;
  println!("\n[4] 64 KiB block at {:#x}", allocator.address(big));
  print_heap("4", allocator);
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 5) Free everything: neighbours merge back together.
  // --------------------------------------------------------------------
  allocator.free(big)?;
  allocator.free(grown)?;
  allocator.free(b)?;
  print_heap("5", allocator);
  Ok(())
}

fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .init();

  let step = std::env::args().any(|arg| arg == "--step");

  println!("PID = {}, program break = {:?}", std::process::id(), Sbrk::program_break());

  // The process break is shared with the system allocator, so fall back to a
  // simulated heap when it cannot be grown contiguously.
  let result = match Allocator::new(Sbrk::new()) {
    Ok(mut allocator) => {
      println!("using the process break");
      let result = run(&mut allocator, step);
      println!("program break = {:?}", Sbrk::program_break());
      result
    }
    Err(err) => {
      println!("process break unavailable ({}), using a simulated heap", err);
      MemLib::new()
        .and_then(Allocator::new)
        .and_then(|mut allocator| run(&mut allocator, step))
    }
  };

  if let Err(err) = result {
    eprintln!("demo failed: {}", err);
    std::process::exit(1);
  }
}
