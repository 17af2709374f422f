//! Frame encoding/decoding benchmarks.

use bytes::{Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use geco_protocol::checksum::{header_crc, payload_crc};
use geco_protocol::{function, Endpoint, Frame, FrameDecoder};

fn status_response() -> Frame {
    Frame::read_request(
        Endpoint::new(1, 1),
        Endpoint::new(2, 2),
        function::STATUS_REQUEST,
        100,
        50,
    )
    .response_to(Bytes::from(vec![0x42u8; 100]))
}

fn bench_frame_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode");

    let request = Frame::read_request(
        Endpoint::new(1, 1),
        Endpoint::new(2, 2),
        function::STATUS_REQUEST,
        100,
        50,
    );
    group.bench_function("read_request", |b| {
        b.iter(|| black_box(request.encode().unwrap()));
    });

    let response = status_response();
    group.throughput(Throughput::Bytes(100));
    group.bench_function("block_response", |b| {
        b.iter(|| black_box(response.encode().unwrap()));
    });

    group.finish();
}

fn bench_frame_decode(c: &mut Criterion) {
    let encoded = status_response().encode().unwrap();

    c.bench_function("frame_decode", |b| {
        b.iter(|| {
            let mut buf = BytesMut::from(&encoded[..]);
            black_box(Frame::decode(&mut buf).unwrap())
        });
    });
}

/// A stream of responses separated by line noise, fed in small chunks the
/// way a serial adapter delivers them.
fn bench_stream_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_decode");

    for frames in [1usize, 10, 100] {
        let one = status_response().encode().unwrap();
        let mut stream = Vec::new();
        for _ in 0..frames {
            stream.extend_from_slice(&[0x00, 0x69, 0x13]);
            stream.extend_from_slice(&one);
        }

        group.throughput(Throughput::Bytes(stream.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(frames), &stream, |b, stream| {
            b.iter(|| {
                let mut decoder = FrameDecoder::new();
                let mut decoded = 0;
                for chunk in stream.chunks(32) {
                    decoder.extend(chunk);
                    decoded += decoder.drain_frames().len();
                }
                black_box(decoded)
            });
        });
    }

    group.finish();
}

fn bench_checksums(c: &mut Criterion) {
    let header = [0x69u8, 0x02, 0x01, 0x84, 0x00, 0x00, 0x0c];
    c.bench_function("crc8_header", |b| b.iter(|| black_box(header_crc(&header))));

    let payload = vec![0x42u8; 110];
    let mut group = c.benchmark_group("crc16_payload");
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("block", |b| b.iter(|| black_box(payload_crc(&payload))));
    group.finish();
}

criterion_group!(
    benches,
    bench_frame_encode,
    bench_frame_decode,
    bench_stream_decode,
    bench_checksums,
);

criterion_main!(benches);
