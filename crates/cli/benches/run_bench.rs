use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use memtable::Memtable;
use record::Clock;
use sstable::{RunReader, RunWriter};
use tempfile::tempdir;

const N_KEYS: usize = 10_000;
const VALUE_SIZE: usize = 100;

fn build_memtable() -> Memtable {
    let mut mem = Memtable::new(Arc::new(Clock::new()));
    for i in 0..N_KEYS {
        mem.put(format!("key{i:06}"), "x".repeat(VALUE_SIZE));
    }
    mem
}

fn write_run(path: &std::path::Path, mem: &Memtable) {
    let mut writer = RunWriter::create(path).unwrap();
    for record in mem.snapshot().iter() {
        writer.write(record).unwrap();
    }
    writer.finish().unwrap();
}

fn run_write_benchmark(c: &mut Criterion) {
    c.bench_function("run_write_from_memtable_10k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let path = dir.path().join("run_000001.dat");
                let mem = build_memtable();
                (dir, path, mem)
            },
            |(_dir, path, mem)| {
                write_run(&path, &mem);
            },
            BatchSize::SmallInput,
        );
    });
}

fn run_get_hit_benchmark(c: &mut Criterion) {
    c.bench_function("run_get_hit_10k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let path = dir.path().join("run_000001.dat");
                write_run(&path, &build_memtable());
                let reader = RunReader::open(&path).unwrap();
                (dir, reader)
            },
            |(_dir, reader)| {
                for i in 0..N_KEYS {
                    let key = format!("key{i:06}");
                    let record = reader.get(&key).unwrap();
                    assert!(record.is_some());
                }
            },
            BatchSize::LargeInput,
        );
    });
}

fn run_get_miss_benchmark(c: &mut Criterion) {
    c.bench_function("run_get_miss_10k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let path = dir.path().join("run_000001.dat");
                write_run(&path, &build_memtable());
                let reader = RunReader::open(&path).unwrap();
                (dir, reader)
            },
            |(_dir, reader)| {
                for i in 0..N_KEYS {
                    // keys sort inside [min, max] but never match
                    let key = format!("key{i:06}x");
                    let record = reader.get(&key).unwrap();
                    assert!(record.is_none());
                }
            },
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(
    benches,
    run_write_benchmark,
    run_get_hit_benchmark,
    run_get_miss_benchmark
);
criterion_main!(benches);
