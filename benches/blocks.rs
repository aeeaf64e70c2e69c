#![allow(unused)]
extern crate heapscope;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use heapscope::{lowlevel::Block, File};
use std::hint::black_box;

const CHUNK_SIZE: u64 = 4096;
const CHUNKS: u64 = 256;

/// A file holding `CHUNKS` chunks of `CHUNK_SIZE` bytes, and the chunk offsets of a block
/// covering them either in file order or in reverse file order.
fn chunked_file(scattered: bool) -> (File, Block) {
    let data: Vec<u8> = (0..CHUNK_SIZE * CHUNKS).map(|i| (i % 251) as u8).collect();
    let offsets: Vec<u64> = if scattered {
        (0..CHUNKS).rev().map(|i| i * CHUNK_SIZE).collect()
    } else {
        (0..CHUNKS).map(|i| i * CHUNK_SIZE).collect()
    };

    let block = Block::new(CHUNK_SIZE, CHUNK_SIZE * CHUNKS, offsets).unwrap();
    (File::from_mem(data).unwrap(), block)
}

/// Benchmark whole-block and single-element reads over contiguous and scattered chunks
///
/// Contiguous chunks are merged into one range and served as a borrowed slice; scattered
/// chunks force a copy that stitches every chunk together.
fn bench_block_reads(c: &mut Criterion) {
    let total = (CHUNK_SIZE * CHUNKS) as usize;

    for (name, scattered) in [("contiguous", false), ("scattered", true)] {
        let (file, block) = chunked_file(scattered);

        let mut group = c.benchmark_group(format!("block_{name}"));
        group.throughput(Throughput::Bytes(total as u64));
        group.bench_function("read_cow_full", |b| {
            b.iter(|| {
                let bytes = block.read_cow(black_box(&file), 0, total).unwrap();
                black_box(bytes.len())
            });
        });
        group.bench_function("read_full", |b| {
            b.iter(|| black_box(block.read(black_box(&file), 0, total).unwrap()));
        });
        group.finish();

        let mut group = c.benchmark_group(format!("block_{name}_elements"));
        group.throughput(Throughput::Elements(1024));
        group.bench_function("read_cow_straddling", |b| {
            b.iter(|| {
                for i in 0..1024u64 {
                    let offset = (i * 1021) % (total as u64 - 64);
                    black_box(block.read_cow(&file, black_box(offset), 64).unwrap());
                }
            });
        });
        group.finish();
    }
}

criterion_group!(benches, bench_block_reads);
criterion_main!(benches);
