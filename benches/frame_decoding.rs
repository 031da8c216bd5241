//! Benchmarks for the streaming hot path
//!
//! Covers what runs for every frame of a `sample` stream:
//! - multipart frame extraction from network-sized chunks
//! - JSON document decoding for both layouts
//! - cursor update and batch delivery through a session
//!
//! Platform: Cross-platform (fixture documents only, CI-safe)

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use mtconnect_stream::document::{self, DocumentAdapter, JsonV1, JsonV2};
use mtconnect_stream::framing::FrameDecoder;
use mtconnect_stream::test_utils::fixtures;
use mtconnect_stream::{Mode, ObservationBatch, Session, WatchList};
use std::hint::black_box;

const FRAMES: u64 = 64;

fn stream_bytes() -> Vec<u8> {
    (0..FRAMES)
        .flat_map(|i| fixtures::multipart_part("BOUND", &fixtures::streams_v1(5, 100 + i, i as f64)))
        .collect()
}

fn bench_frame_extraction(c: &mut Criterion) {
    let bytes = stream_bytes();

    let mut group = c.benchmark_group("frame_extraction");
    group.throughput(Throughput::Bytes(bytes.len() as u64));

    for chunk_size in [512usize, 4096, 65536] {
        group.bench_function(BenchmarkId::new("chunked", chunk_size), |b| {
            b.iter(|| {
                let mut decoder = FrameDecoder::new("BOUND");
                let mut frames = 0;
                for chunk in bytes.chunks(chunk_size) {
                    decoder.push(black_box(chunk));
                    while let Ok(Some(frame)) = decoder.next_frame() {
                        frames += black_box(frame).len();
                    }
                }
                frames
            })
        });
    }

    group.finish();
}

fn bench_document_decoding(c: &mut Criterion) {
    let v1 = fixtures::streams_v1(5, 100, 1.5).to_string().into_bytes();
    let v2 = fixtures::streams_v2(5, 100, 1.5).to_string().into_bytes();

    let mut group = c.benchmark_group("document_decoding");

    group.bench_function("json_v1", |b| {
        b.iter(|| {
            let doc = document::parse_json(black_box(&v1)).expect("fixture is valid JSON");
            JsonV1.parse_streams(&doc).expect("fixture decodes")
        })
    });

    group.bench_function("json_v2", |b| {
        b.iter(|| {
            let doc = document::parse_json(black_box(&v2)).expect("fixture is valid JSON");
            JsonV2.parse_streams(&doc).expect("fixture decodes")
        })
    });

    group.finish();
}

fn bench_session_delivery(c: &mut Criterion) {
    let doc = document::parse_json(fixtures::streams_v1(5, 100, 1.5).to_string().as_bytes())
        .and_then(|doc| JsonV1.parse_streams(&doc))
        .expect("fixture decodes");

    let mut watched = WatchList::new();
    watched.insert("Xact", 0u32);
    watched.insert("exec", 1u32);
    watched.insert("system", 2u32);

    c.bench_function("session_handle_document", |b| {
        let mut session = Session::new("http://agent", Mode::Streaming, watched.clone());
        let mut delivered = 0usize;
        let mut sink = |batch: ObservationBatch<u32>| delivered += batch.len();
        b.iter(|| session.handle_document(black_box(&doc), &mut sink).expect("same instance"))
    });
}

criterion_group!(benches, bench_frame_extraction, bench_document_decoding, bench_session_delivery);
criterion_main!(benches);
