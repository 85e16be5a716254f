//! Benchmarks for Reed-Solomon parity generation and reconstruction
//!
//! Run with: cargo bench --package genaro-core

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use genaro_core::erasure::{parity_for, ErasureCoder, ErasureConfig};
use genaro_core::{prepare_shards, EncryptionKey, ShardLayout};

const SHARD_SIZE: usize = 2 * 1024 * 1024;

fn data_shards(k: usize) -> Vec<Bytes> {
    (0..k)
        .map(|i| Bytes::from((0..SHARD_SIZE).map(|j| ((i + j) % 256) as u8).collect::<Vec<_>>()))
        .collect()
}

/// Parity generation for typical data shard counts
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("parity_encode");

    for k in [4usize, 16, 64] {
        let coder = ErasureCoder::new(ErasureConfig::for_data_shards(k).unwrap()).unwrap();
        let data = data_shards(k);

        group.throughput(Throughput::Bytes((k * SHARD_SIZE) as u64));
        group.bench_with_input(BenchmarkId::new("data_shards", k), &data, |b, data| {
            b.iter(|| coder.encode(black_box(data)))
        });
    }

    group.finish();
}

/// Reconstruction with an increasing number of lost data shards
fn bench_reconstruct(c: &mut Criterion) {
    let k = 16;
    let coder = ErasureCoder::new(ErasureConfig::for_data_shards(k).unwrap()).unwrap();
    let data = data_shards(k);
    let parity = coder.encode(&data).unwrap();
    let all: Vec<Vec<u8>> = data.iter().chain(parity.iter()).map(|s| s.to_vec()).collect();

    let mut group = c.benchmark_group("parity_reconstruct");
    group.throughput(Throughput::Bytes((k * SHARD_SIZE) as u64));

    for missing in [1usize, 4, parity_for(k)] {
        group.bench_with_input(BenchmarkId::new("missing", missing), &missing, |b, &missing| {
            b.iter(|| {
                let mut slots: Vec<Option<Vec<u8>>> = all.iter().cloned().map(Some).collect();
                for slot in slots.iter_mut().take(missing) {
                    *slot = None;
                }
                coder.reconstruct(black_box(&mut slots))
            })
        });
    }

    group.finish();
}

/// Full upload preparation: encrypt, parity, hash and challenges
fn bench_prepare(c: &mut Criterion) {
    let key = EncryptionKey::generate();
    let data: Vec<u8> = (0..32 * 1024 * 1024).map(|i| (i % 256) as u8).collect();
    let layout = ShardLayout::for_upload(data.len() as u64, true).unwrap();

    let mut group = c.benchmark_group("prepare_shards_32MB");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.sample_size(10);
    group.bench_function("reed_solomon", |b| {
        b.iter(|| prepare_shards(black_box(&data), &layout, &key, 4))
    });
    group.finish();
}

criterion_group!(benches, bench_encode, bench_reconstruct, bench_prepare);
criterion_main!(benches);
