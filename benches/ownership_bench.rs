use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;

use grid_registry::algs::checksum::h2d_checksums;
use grid_registry::algs::communicator::NoComm;
use grid_registry::algs::redistribute::find_duplicate_key;
use grid_registry::geometry::CellData;

fn shuffled_pairs(n: usize) -> Vec<(u64, u64)> {
    let mut rng = SmallRng::seed_from_u64(42);
    let mut keys: Vec<u64> = (0..n as u64).collect();
    keys.shuffle(&mut rng);
    keys.into_iter().map(|k| (k, 0)).collect()
}

fn bench_ownership(c: &mut Criterion) {
    let mut group = c.benchmark_group("ownership");

    for &n in &[10_000usize, 100_000] {
        let pairs = shuffled_pairs(n);
        group.bench_with_input(BenchmarkId::new("find_duplicate_key", n), &n, |b, &n| {
            b.iter(|| {
                let dup = find_duplicate_key(&NoComm, &pairs, n as u64).unwrap();
                black_box(dup);
            });
        });

        let cells = CellData::replicated(
            (0..n).map(|i| i as f64 * 0.01).collect(),
            (0..n).map(|i| (i % 180) as f64 - 89.5).collect(),
            Some((0..n).map(|i| (i % 2) as i32).collect()),
        );
        group.bench_with_input(BenchmarkId::new("h2d_checksums", n), &n, |b, _| {
            b.iter(|| {
                let sums = h2d_checksums(&NoComm, &cells).unwrap();
                black_box(sums);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_ownership);
criterion_main!(benches);
