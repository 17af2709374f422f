//! Register map benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use geco_registers::{Block, RegisterMap, Value};

fn bench_block_decode(c: &mut Criterion) {
    let map = RegisterMap::pcwu();
    let mut group = c.benchmark_group("block_decode");

    for block in Block::ALL {
        let raw: Vec<u8> = (0..block.byte_len() as u8).collect();
        group.bench_function(block.as_str(), |b| {
            b.iter(|| black_box(map.decode(block, &raw).unwrap()));
        });
    }

    group.finish();
}

fn bench_decode_window(c: &mut Criterion) {
    let map = RegisterMap::pcwu();
    let window = [0x00u8, 0xC8, 0x01, 0xC2, 0x00, 0x10, 0xFF, 0x9C];

    c.bench_function("decode_window", |b| {
        b.iter(|| black_box(map.decode_window(Block::Status, 104, &window)));
    });
}

fn bench_read_modify_write(c: &mut Criterion) {
    let map = RegisterMap::pcwu();
    let current = vec![0u8; Block::Config.byte_len()];
    let value = Value::Float(52.5);

    c.bench_function("encode_register", |b| {
        b.iter(|| {
            black_box(
                map.encode(Block::Config, &current, "TapWaterTemp", &value)
                    .unwrap(),
            )
        });
    });
}

criterion_group!(
    benches,
    bench_block_decode,
    bench_decode_window,
    bench_read_modify_write,
);

criterion_main!(benches);
