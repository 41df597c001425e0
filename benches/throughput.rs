//! Throughput benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use image::{Rgba, RgbaImage};
use remote_test_harness::core::image_utils::{compare_equal, count_pixels};
use remote_test_harness::{Buffer, BufferWatcher};
use std::sync::Arc;
use std::time::Duration;

fn comparator_benchmark(c: &mut Criterion) {
    let reference = RgbaImage::from_fn(512, 512, |x, y| Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255]));
    let mut candidate = reference.clone();
    for x in 0..64 {
        candidate.put_pixel(x, x, Rgba([0, 0, 0, 255]));
    }

    let mut group = c.benchmark_group("comparator");
    group.throughput(Throughput::Elements(u64::from(reference.width() * reference.height())));

    group.bench_function("count_pixels", |b| {
        b.iter(|| black_box(count_pixels(black_box(&candidate), black_box(&reference), 0.02, 0.0)))
    });

    group.bench_function("compare_equal", |b| {
        b.iter(|| black_box(compare_equal(black_box(&candidate), black_box(&reference), 0.001, 0.02)))
    });

    group.bench_function("compare_identical", |b| {
        b.iter(|| black_box(compare_equal(black_box(&reference), black_box(&reference), 0.0, 0.0)))
    });

    group.finish();
}

fn buffer_scan_benchmark(c: &mut Criterion) {
    let buffer = Arc::new(Buffer::new());
    for i in 0..10_000 {
        buffer.append(format!("[ 0 ms] RamsesRenderer: frame {i} rendered in 16 ms"));
    }
    buffer.append("Ramsh commands registered from RamsesRenderer");
    let watcher = BufferWatcher::new("bench", Arc::clone(&buffer));

    let mut group = c.benchmark_group("buffer");
    group.throughput(Throughput::Elements(buffer.len() as u64));

    group.bench_function("scan_from_beginning", |b| {
        b.iter(|| {
            let watch = watcher.get_watch_from_beginning();
            let found = watcher.wait_for_msg(
                Some(watch),
                Some(black_box("Ramsh commands registered from (DisplayManager|RamsesRenderer)")),
                Some(Duration::from_secs(1)),
            );
            black_box(found)
        })
    });

    group.finish();
}

criterion_group!(benches, comparator_benchmark, buffer_scan_benchmark);
criterion_main!(benches);
