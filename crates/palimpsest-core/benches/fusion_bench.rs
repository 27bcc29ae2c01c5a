//! Palimpsest Search Benchmarks
//!
//! Benchmarks for the hot search-path operations using Criterion.
//! Run with: cargo bench -p palimpsest-core

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use palimpsest_core::{
    classify_query, expand_query, fuse, normalize_scores, sanitize_query, RankedResult, ResultType,
};

fn ranked(embedding_id: String, score: f64, rank: usize) -> RankedResult {
    RankedResult {
        embedding_id,
        document_id: "doc-1".to_string(),
        chunk_id: None,
        image_id: None,
        text: "benchmark payload text".to_string(),
        score,
        rank,
        result_type: ResultType::Chunk,
        source_file_path: None,
        source_file_name: Some("bench.pdf".to_string()),
        page_number: Some(1),
        char_start: Some(0),
        char_end: Some(22),
        quality_score: Some(3.5),
        heading: None,
        section_path: None,
        content_type: None,
        provenance_id: None,
        content_hash: None,
    }
}

fn bench_fuse(c: &mut Criterion) {
    let bm25: Vec<RankedResult> = (0..50)
        .map(|i| ranked(format!("emb-{i}"), 10.0 - i as f64 / 5.0, i + 1))
        .collect();
    let semantic: Vec<RankedResult> = (0..50)
        .map(|i| ranked(format!("emb-{}", 25 + i), 1.0 - i as f64 / 50.0, i + 1))
        .collect();

    c.bench_function("fuse_50x50", |b| {
        b.iter(|| {
            black_box(fuse(&bm25, &semantic, 20));
        })
    });
}

fn bench_normalize_scores(c: &mut Criterion) {
    let scores: Vec<f64> = (0..200).map(|i| 100.0 - i as f64 / 2.0).collect();

    c.bench_function("normalize_200", |b| {
        b.iter(|| {
            black_box(normalize_scores(&scores));
        })
    });
}

fn bench_expand_query(c: &mut Criterion) {
    c.bench_function("expand_query", |b| {
        b.iter(|| {
            black_box(expand_query(
                "injury contract negligence treatment chronic pain",
            ));
        })
    });
}

fn bench_sanitize_query(c: &mut Criterion) {
    c.bench_function("sanitize_query", |b| {
        b.iter(|| {
            black_box(sanitize_query(
                "NOT \"exact phrase\" injury AND special-chars!@# OR fraud",
            ));
        })
    });
}

fn bench_classify_query(c: &mut Criterion) {
    let queries = [
        "what caused the spinal injury?",
        "settlement agreement",
        "exhibit claim_42 medical records",
        "chronic lower back pain following workplace accident",
    ];

    c.bench_function("classify_query", |b| {
        b.iter(|| {
            for q in &queries {
                black_box(classify_query(q));
            }
        })
    });
}

criterion_group!(
    benches,
    bench_fuse,
    bench_normalize_scores,
    bench_expand_query,
    bench_sanitize_query,
    bench_classify_query,
);
criterion_main!(benches);
