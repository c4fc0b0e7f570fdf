use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use airwave::audio::SampleFormat;
use airwave::mixer::{BlockKernel, Envelope, Lane, MixKernel, PortableKernel, VolumeCurve};

fn source_frames(count: usize, len: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|s| (0..len).map(|i| ((i * 31 + s * 17) % 251) as u8).collect())
        .collect()
}

fn bench_kernels(c: &mut Criterion) {
    let format = SampleFormat::new(16, 2, 48000).unwrap();
    let frame_len = format.frame_len(20);
    let kernels: [(&str, &dyn MixKernel); 2] =
        [("portable", &PortableKernel), ("block", &BlockKernel)];

    let mut group = c.benchmark_group("mix_16bit_stereo");
    group.throughput(Throughput::Bytes(frame_len as u64));

    for sources in [1usize, 4, 8] {
        let frames = source_frames(sources, frame_len);
        for (name, kernel) in kernels {
            group.bench_with_input(BenchmarkId::new(name, sources), &frames, |b, frames| {
                let mut envelopes: Vec<Envelope> = (0..sources).map(|_| Envelope::new(0.8)).collect();
                let mut out = vec![0u8; frame_len];
                b.iter(|| {
                    let mut lanes: Vec<Lane<'_>> = frames
                        .iter()
                        .zip(envelopes.iter_mut())
                        .map(|(pcm, envelope)| Lane { pcm, envelope })
                        .collect();
                    kernel.mix(&mut lanes, &format, VolumeCurve::Linear, &mut out);
                    black_box(&out);
                });
            });
        }
    }
    group.finish();
}

fn bench_fading(c: &mut Criterion) {
    let format = SampleFormat::new(16, 2, 48000).unwrap();
    let frame_len = format.frame_len(20);
    let frames = source_frames(4, frame_len);

    c.bench_function("mix_block_4_sources_fading", |b| {
        let mut envelopes: Vec<Envelope> = (0..4).map(|_| Envelope::new(0.0)).collect();
        let mut out = vec![0u8; frame_len];
        b.iter(|| {
            for envelope in envelopes.iter_mut() {
                if !envelope.is_transitioning() {
                    let target = if envelope.volume() > 0.5 { 0.0 } else { 1.0 };
                    envelope.fade_to(target, 48000);
                }
            }
            let mut lanes: Vec<Lane<'_>> = frames
                .iter()
                .zip(envelopes.iter_mut())
                .map(|(pcm, envelope)| Lane { pcm, envelope })
                .collect();
            BlockKernel.mix(&mut lanes, &format, VolumeCurve::Perceptual, &mut out);
            black_box(&out);
        });
    });
}

criterion_group!(benches, bench_kernels, bench_fading);
criterion_main!(benches);
