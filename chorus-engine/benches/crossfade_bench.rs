//! Crossfade and replay-gain filter benchmarks.

use chorus_common::{AudioFormat, ReplayGainInfo, ReplayGainMode, ReplayGainTuple};
use chorus_engine::config::PlayerConfig;
use chorus_engine::filter::{mix_crossfade, render_chunk, ReplayGainFilter};
use chorus_engine::MusicChunk;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

const FORMAT: AudioFormat = AudioFormat::new(44100, 2);

fn bench_mix(c: &mut Criterion) {
    let mut group = c.benchmark_group("crossfade_mix");

    for (name, frames) in [("10ms", 441usize), ("100ms", 4410), ("1s", 44100)] {
        let samples = frames * 2;
        group.throughput(Throughput::Elements(samples as u64));

        group.bench_function(BenchmarkId::new("stereo", name), |b| {
            let mut a = vec![0.5f32; samples];
            let other = vec![0.7f32; samples];

            b.iter(|| {
                mix_crossfade(&mut a, &other, 0.5);
                black_box(&a);
            })
        });
    }

    group.finish();
}

fn bench_render_chunk(c: &mut Criterion) {
    let mut group = c.benchmark_group("render_chunk");
    group.throughput(Throughput::Elements(2048));

    let config = PlayerConfig::default();
    let info = ReplayGainInfo {
        track: Some(ReplayGainTuple::new(-6.0, 0.9)),
        album: None,
    };

    group.bench_function("gain_only", |b| {
        let mut rg = ReplayGainFilter::new(&config);
        rg.set_mode(ReplayGainMode::Track);
        let mut other_rg = ReplayGainFilter::new(&config);

        let mut chunk = MusicChunk::new(FORMAT, vec![0.5f32; 2048]);
        chunk.rg_serial = 1;
        chunk.replay_gain = Some(info);

        b.iter(|| {
            let out = render_chunk(&chunk, &mut rg, &mut other_rg, None).unwrap();
            black_box(out);
        })
    });

    group.bench_function("gain_and_overlap", |b| {
        let mut rg = ReplayGainFilter::new(&config);
        rg.set_mode(ReplayGainMode::Track);
        let mut other_rg = ReplayGainFilter::new(&config);
        other_rg.set_mode(ReplayGainMode::Track);

        let mut chunk = MusicChunk::new(FORMAT, vec![0.5f32; 2048]);
        chunk.rg_serial = 1;
        chunk.replay_gain = Some(info);
        chunk.other = Some(Box::new(MusicChunk::new(FORMAT, vec![0.7f32; 2048])));
        chunk.mix_ratio = 0.3;

        b.iter(|| {
            let out = render_chunk(&chunk, &mut rg, &mut other_rg, None).unwrap();
            black_box(out);
        })
    });

    group.finish();
}

criterion_group!(benches, bench_mix, bench_render_chunk);
criterion_main!(benches);
