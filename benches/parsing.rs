use criterion::{criterion_group, criterion_main, Criterion};
use std::path::Path;

use mboxsort::classify::{Classifier, RuleSet};
use mboxsort::config::ClassificationConfig;
use mboxsort::parser::decoder::{FrameDecoder, MessageDecoder};
use mboxsort::parser::mbox::FrameSplitter;
use mboxsort::pipeline::Pipeline;

fn fixture_bytes() -> Vec<u8> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("simple.mbox");
    let one = std::fs::read(path).unwrap();
    // Repeat the fixture so the parallel decoder has something to chew on.
    let mut data = Vec::with_capacity(one.len() * 200);
    for _ in 0..200 {
        data.extend_from_slice(&one);
        data.push(b'\n');
    }
    data
}

fn bench_split_frames(c: &mut Criterion) {
    let data = fixture_bytes();
    c.bench_function("split_frames", |b| {
        b.iter(|| FrameSplitter::from_bytes(&data).count())
    });
}

fn bench_decode_frames(c: &mut Criterion) {
    let data = fixture_bytes();
    let frames: Vec<_> = FrameSplitter::from_bytes(&data)
        .collect::<Result<_, _>>()
        .unwrap();
    let decoder = MessageDecoder::new();
    c.bench_function("decode_frames", |b| {
        b.iter(|| frames.iter().filter(|f| decoder.decode(f).is_ok()).count())
    });
}

fn bench_full_pipeline(c: &mut Criterion) {
    let data = fixture_bytes();
    let cfg = ClassificationConfig {
        group_by: vec!["sender".into(), "date".into(), "thread".into()],
        ..ClassificationConfig::default()
    };
    let rules = RuleSet::from_config(&cfg).unwrap();

    for workers in [1, 0] {
        let pipeline =
            Pipeline::new(MessageDecoder::new(), Classifier::new(rules.clone())).workers(workers);
        let name = if workers == 1 {
            "pipeline_sequential"
        } else {
            "pipeline_parallel"
        };
        c.bench_function(name, |b| {
            b.iter(|| pipeline.run(FrameSplitter::from_bytes(&data)).unwrap())
        });
    }
}

criterion_group!(
    benches,
    bench_split_frames,
    bench_decode_frames,
    bench_full_pipeline
);
criterion_main!(benches);
