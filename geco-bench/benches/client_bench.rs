//! Client exchange benchmarks against an in-memory heat pump.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use geco_client::{Client, ClientConfig, QueuedConnector};
use geco_protocol::{function, sub_function, Frame, FrameDecoder};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::runtime::Runtime;

/// Answers reads with fixed blocks and echoes writes.
async fn heat_pump(mut stream: DuplexStream) {
    let mut decoder = FrameDecoder::new();
    let mut config = vec![0u8; 100];
    let mut buf = [0u8; 512];
    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        decoder.extend(&buf[..n]);
        for request in decoder.drain_frames() {
            let data = match (request.function, request.sub_function) {
                (function::STATUS_REQUEST, _) => Bytes::from(vec![0x01u8; 100]),
                (function::CONFIG_REQUEST, sub_function::WRITE) => {
                    config = request.data.to_vec();
                    request.data.clone()
                }
                _ => Bytes::from(config.clone()),
            };
            let reply = request.response_to(data).encode().unwrap();
            if stream.write_all(&reply).await.is_err() {
                return;
            }
        }
    }
}

fn setup(rt: &Runtime) -> Client<QueuedConnector<DuplexStream>> {
    let (client_side, device_side) = duplex(4096);
    rt.spawn(heat_pump(device_side));
    Client::new(
        QueuedConnector::from_iter([client_side]),
        ClientConfig::default(),
    )
}

fn bench_read_status(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let client = setup(&rt);

    c.bench_function("read_status", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(client.read_status().await.unwrap()) });
    });
}

fn bench_write_register(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let client = setup(&rt);
    rt.block_on(async { client.read_config().await.unwrap() });

    c.bench_function("write_register", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(client.write_register("TapWaterTemp", 50.0).await.unwrap())
        });
    });
}

criterion_group!(benches, bench_read_status, bench_write_register);

criterion_main!(benches);
