#![allow(missing_docs)]

//! Benchmarks for payload encoding, decoding and side-channel packing.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use stepwire::serdes::{deserialize_value, serialize_value};
use stepwire::shared::channel::{compress_payload, decompress_payload, ChannelSelector};
use stepwire::types::{
    CodePointer, ExecuteStepArgs, JobOrigin, KnownExecutionState, Message, RepositoryPythonOrigin,
    StepOutputHandle,
};

fn step_args(step_count: usize) -> ExecuteStepArgs {
    let origin = JobOrigin::new(
        "etl",
        RepositoryPythonOrigin::new("python3", CodePointer::module("jobs", "defs")),
    );
    let keys: Vec<String> = (0..step_count).map(|i| format!("step_{i}")).collect();
    let known = keys.iter().fold(KnownExecutionState::default(), |state, key| {
        state
            .with_ready_output(StepOutputHandle::new(key.clone(), "result"))
            .with_retry_attempt(key.clone())
    });
    ExecuteStepArgs::new(origin, "bench-run", Some(keys))
        .with_known_state(known)
        .with_step_verification(true)
}

fn codec_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    for step_count in [1_usize, 100, 1_000] {
        let args = step_args(step_count);
        let text = serialize_value(&args);

        group.bench_function(format!("encode_step_args_{step_count}"), |b| {
            b.iter(|| black_box(serialize_value(black_box(&args))));
        });
        group.bench_function(format!("decode_step_args_{step_count}"), |b| {
            b.iter(|| black_box(deserialize_value::<ExecuteStepArgs>(black_box(&text))));
        });
        group.bench_function(format!("decode_message_{step_count}"), |b| {
            b.iter(|| black_box(Message::decode(black_box(&text))));
        });
    }

    group.finish();
}

fn side_channel_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("side_channel");
    let args = step_args(1_000);
    let text = serialize_value(&args);
    let packed = compress_payload(&text).unwrap_or_default();
    let selector = ChannelSelector::default();

    group.bench_function("compress", |b| {
        b.iter(|| black_box(compress_payload(black_box(&text))));
    });
    group.bench_function("decompress", |b| {
        b.iter(|| black_box(decompress_payload(black_box(&packed))));
    });
    group.bench_function("build_launch", |b| {
        b.iter(|| black_box(selector.execute_step(black_box(&args))));
    });

    group.finish();
}

criterion_group!(benches, codec_benchmark, side_channel_benchmark);
criterion_main!(benches);
