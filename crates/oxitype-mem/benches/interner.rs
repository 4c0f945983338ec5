//! String interning performance benchmarks.
//!
//! Measures the performance of:
//! - Interning new strings (write lock + arena copy)
//! - Interning known strings (read lock + hash lookup)
//! - Symbol resolution (read lock + index)

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use oxitype_mem::{Symbol, SyncInterner};

fn bench_intern_new(c: &mut Criterion) {
    let mut group = c.benchmark_group("intern_new");

    for size in [10, 100, 1_000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let strings: Vec<String> = (0..size).map(|i| format!("property_{i}")).collect();

            b.iter(|| {
                let interner = SyncInterner::new();
                for s in &strings {
                    black_box(interner.intern(s));
                }
            });
        });
    }

    group.finish();
}

fn bench_intern_known(c: &mut Criterion) {
    let interner = SyncInterner::new();
    let strings: Vec<String> = (0..1_000).map(|i| format!("signal_{i}")).collect();
    for s in &strings {
        interner.intern(s);
    }

    c.bench_function("intern_known", |b| {
        b.iter(|| {
            for s in &strings {
                black_box(interner.intern(s));
            }
        });
    });
}

fn bench_resolve(c: &mut Criterion) {
    let interner = SyncInterner::new();
    let symbols: Vec<Symbol> = (0..1_000)
        .map(|i| interner.intern(&format!("quark_{i}")))
        .collect();

    c.bench_function("resolve", |b| {
        b.iter(|| {
            for &sym in &symbols {
                black_box(interner.resolve(sym));
            }
        });
    });
}

criterion_group!(benches, bench_intern_new, bench_intern_known, bench_resolve);
criterion_main!(benches);
