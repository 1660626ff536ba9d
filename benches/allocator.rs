//! Allocator benchmarks.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use segalloc::{Allocator, MemLib};

fn allocator() -> Allocator {
  Allocator::new(MemLib::new().unwrap()).unwrap()
}

fn bench_alloc_free_cycle(c: &mut Criterion) {
  let sizes: &[usize] = &[16, 64, 256, 1024, 4096, 32768];
  let mut group = c.benchmark_group("alloc_free_cycle");

  for &size in sizes {
    group.bench_with_input(BenchmarkId::new("segalloc", size), &size, |b, &sz| {
      let mut allocator = allocator();
      b.iter(|| {
        let ptr = allocator.allocate(sz).unwrap();
        allocator.free(criterion::black_box(ptr)).unwrap();
      });
    });
  }
  group.finish();
}

fn bench_alloc_burst(c: &mut Criterion) {
  let mut group = c.benchmark_group("alloc_burst");

  group.bench_function("1000x64B", |b| {
    b.iter(|| {
      let mut allocator = allocator();
      let ptrs: Vec<_> = (0..1000).map(|_| allocator.allocate(64).unwrap()).collect();
      for ptr in ptrs {
        allocator.free(ptr).unwrap();
      }
    });
  });

  group.finish();
}

fn bench_realloc_growth(c: &mut Criterion) {
  let mut group = c.benchmark_group("realloc_growth");

  group.bench_function("8B_steps_to_4KiB", |b| {
    b.iter(|| {
      let mut allocator = allocator();
      let mut ptr = allocator.allocate(8).unwrap();
      for size in (16..=4096).step_by(8) {
        ptr = allocator.reallocate(Some(ptr), size).unwrap().unwrap();
      }
      criterion::black_box(allocator.extensions());
    });
  });

  group.finish();
}

criterion_group!(benches, bench_alloc_free_cycle, bench_alloc_burst, bench_realloc_growth);
criterion_main!(benches);
