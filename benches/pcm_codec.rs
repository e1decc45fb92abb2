use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use live_audio_session::audio::PlaybackSegment;
use live_audio_session::codec::pcm;
use live_audio_session::constants::{CAPTURE_BLOCK_SIZE, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};

fn capture_block() -> Vec<f32> {
    (0..CAPTURE_BLOCK_SIZE)
        .map(|i| (i as f32 * 0.01).sin() * 0.8)
        .collect()
}

fn bench_encode(c: &mut Criterion) {
    let block = capture_block();
    let mut group = c.benchmark_group("capture");
    group.throughput(Throughput::Elements(CAPTURE_BLOCK_SIZE as u64));

    group.bench_function("float_to_chunk", |b| {
        b.iter(|| {
            let samples = pcm::float_to_pcm16(black_box(&block));
            pcm::encode(&samples, INPUT_SAMPLE_RATE)
        })
    });
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    // 100 ms of model audio
    let samples: Vec<i16> = (0..2400).map(|i| (i * 13 % 65536 - 32768) as i16).collect();
    let chunk = pcm::encode(&samples, OUTPUT_SAMPLE_RATE);

    let mut group = c.benchmark_group("playback");
    group.throughput(Throughput::Elements(samples.len() as u64));

    group.bench_function("chunk_to_segment", |b| {
        b.iter(|| {
            let decoded = pcm::decode(black_box(&chunk)).unwrap();
            PlaybackSegment::from_pcm16(&decoded, OUTPUT_SAMPLE_RATE, 1)
        })
    });
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
