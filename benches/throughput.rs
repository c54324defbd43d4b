//! Decode throughput benchmarks
//!
//! Run with: cargo bench

use ais_pipeline::checksum;
use ais_pipeline::pipeline::{
    dearmour_batch, ingest_bytes, reassemble_and_validate, FragmentBatch, MessageBatch,
    PayloadBatch,
};
use ais_pipeline::{
    spsc, BlockingQueue, BufferPool, PackedPayload, PayloadDeArmourer, Pooled, Reassembler,
    SentenceParser,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

const SINGLE: &str = "!AIVDM,1,1,,B,15M67FC000G?ufbE`FepT@3n00Sa,0*5C\r\n";
const PART1: &str =
    "!AIVDM,2,1,3,B,55P5TL01VIaAL@7WKO@mBplU@<PDhh000000001S;AJ::4A80?4i@E53,0*3E\r\n";
const PART2: &str = "!AIVDM,2,2,3,B,1@0000000000000,2*55\r\n";

/// `lines` sentences, one two-part message per hundred
fn sample_input(lines: usize) -> Vec<u8> {
    let mut input = String::new();
    for i in 0..lines {
        if i % 100 == 0 {
            input.push_str(PART1);
            input.push_str(PART2);
        } else {
            input.push_str(SINGLE);
        }
    }
    input.into_bytes()
}

fn bench_checksum(c: &mut Criterion) {
    let body = &SINGLE.as_bytes()[1..SINGLE.len() - 5];
    let mut group = c.benchmark_group("checksum");
    group.throughput(Throughput::Bytes(body.len() as u64));
    group.bench_function("wide", |b| b.iter(|| checksum::compute(black_box(body))));
    group.bench_function("naive", |b| {
        b.iter(|| checksum::compute_naive(black_box(body)))
    });
    group.finish();
}

fn bench_dearmour(c: &mut Criterion) {
    let armoured = b"55P5TL01VIaAL@7WKO@mBplU@<PDhh000000001S;AJ::4A80?4i@E531@0000000000000";
    let mut out = PackedPayload::new();
    let mut group = c.benchmark_group("dearmour");
    group.throughput(Throughput::Elements(1));
    group.bench_function("type5", |b| {
        b.iter(|| PayloadDeArmourer::dearmour(black_box(armoured), 2, &mut out))
    });
    group.finish();
}

fn bench_stages(c: &mut Criterion) {
    let mut group = c.benchmark_group("stages");
    for lines in [1_000, 10_000] {
        let input = sample_input(lines);
        group.throughput(Throughput::Elements(lines as u64));
        group.bench_with_input(BenchmarkId::from_parameter(lines), &input, |b, input| {
            let parser = SentenceParser::default();
            let fragment_pool = BufferPool::<FragmentBatch>::new();
            let message_pool = BufferPool::<MessageBatch>::new();
            let payload_pool = BufferPool::<PayloadBatch>::new();
            let stats = ais_pipeline::DecodeStats::new();
            let mut reassembler = Reassembler::new();
            let (frag_tx, frag_rx) = spsc::<Pooled<FragmentBatch>>(64).unwrap();
            let (msg_tx, msg_rx) = spsc::<Pooled<MessageBatch>>(64).unwrap();
            let payloads = BlockingQueue::<Pooled<PayloadBatch>>::with_capacity(64).unwrap();

            b.iter(|| {
                let mut consumed = 0;
                while consumed < input.len() {
                    consumed += ingest_bytes(
                        &input[consumed..],
                        &parser,
                        &fragment_pool,
                        &frag_tx,
                        &stats,
                    )
                    .unwrap();
                    reassemble_and_validate(
                        &frag_rx,
                        &msg_tx,
                        &mut reassembler,
                        &message_pool,
                        &stats,
                        usize::MAX,
                    )
                    .unwrap();
                    dearmour_batch(&msg_rx, &payloads, &payload_pool, &stats, usize::MAX).unwrap();
                    while let Ok(batch) = payloads.try_pop() {
                        black_box(batch.len());
                    }
                }
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_checksum, bench_dearmour, bench_stages);
criterion_main!(benches);
