//! Music pipe throughput benchmarks.
//!
//! Measures the chunk hand-off path between the player and the outputs:
//! push, peek and consume with one and with several registered consumers.

use chorus_common::AudioFormat;
use chorus_engine::{MusicChunk, MusicPipe};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

const FORMAT: AudioFormat = AudioFormat::new(44100, 2);
const CHUNK_SAMPLES: usize = 2048;

fn make_chunk() -> MusicChunk {
    MusicChunk::new(FORMAT, vec![0.1f32; CHUNK_SAMPLES])
}

fn bench_single_consumer(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipe_single_consumer");
    group.throughput(Throughput::Elements(1));

    group.bench_function("push_peek_consume", |b| {
        let pipe = MusicPipe::new(64);
        pipe.register_consumer(0);

        b.iter(|| {
            let seq = pipe.push(make_chunk()).unwrap();
            let chunk = pipe.peek(0).unwrap();
            black_box(&chunk.samples);
            pipe.consume(0, seq);
        })
    });

    group.finish();
}

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipe_fan_out");

    for consumers in [2usize, 4, 8] {
        group.throughput(Throughput::Elements(consumers as u64));
        group.bench_function(BenchmarkId::new("consumers", consumers), |b| {
            let pipe = MusicPipe::new(64);
            for id in 0..consumers {
                pipe.register_consumer(id);
            }

            b.iter(|| {
                let seq = pipe.push(make_chunk()).unwrap();
                for id in 0..consumers {
                    let chunk = pipe.peek(id).unwrap();
                    black_box(chunk.seq);
                    pipe.consume(id, seq);
                }
                assert!(pipe.is_empty());
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_single_consumer, bench_fan_out);
criterion_main!(benches);
