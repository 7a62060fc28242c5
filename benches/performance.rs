use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;

use assessment_api::idempotency::{
    digest, normalize_endpoint, IdempotencyHandler, IdempotencyHandlerConfig, IdempotencyScope,
    InMemoryIdempotencyStore,
};
use axum::http::{Method, StatusCode};
use serde_json::json;
use uuid::Uuid;

fn benchmark_digest(c: &mut Criterion) {
    let mut group = c.benchmark_group("digest");

    for answers in [1usize, 10, 100].iter() {
        let payload = json!({
            "stepId": "s1",
            "answers": (0..*answers)
                .map(|i| json!({ "questionId": format!("q{}", i), "answerValue": i }))
                .collect::<Vec<_>>(),
        });

        group.bench_with_input(BenchmarkId::new("payload", answers), &payload, |b, payload| {
            b.iter(|| black_box(digest(Some(black_box(payload)))))
        });
    }

    group.bench_function("absent_payload", |b| b.iter(|| black_box(digest(None))));

    group.finish();
}

fn benchmark_normalize_endpoint(c: &mut Criterion) {
    c.bench_function("normalize_endpoint", |b| {
        b.iter(|| {
            black_box(normalize_endpoint(black_box(
                "/assessments/7f1c0a52-4a3b-4f8e-9d0e-2b1b9b6f6c11/answers/save/?draft=1",
            )))
        })
    });
}

fn benchmark_in_memory_replay(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let handler = IdempotencyHandler::new(
        Arc::new(InMemoryIdempotencyStore::new()),
        IdempotencyHandlerConfig::default(),
    );
    let scope = IdempotencyScope::new(
        Some(Uuid::new_v4()),
        "/assessments/a1/answers/save",
        Method::POST,
        Some("bench-key".to_string()),
    );
    let payload = json!({ "stepId": "s1", "questionId": "q1", "answerValue": 2 });
    let body = json!({ "success": true, "data": { "answerValue": 2 } });

    runtime.block_on(handler.store(
        &scope,
        Some(&payload),
        StatusCode::CREATED,
        &body,
        handler.ttl(),
    ));

    c.bench_function("lookup_hit", |b| {
        b.to_async(&runtime)
            .iter(|| async { black_box(handler.lookup(&scope, Some(&payload)).await) })
    });
}

criterion_group!(
    benches,
    benchmark_digest,
    benchmark_normalize_endpoint,
    benchmark_in_memory_replay,
);
criterion_main!(benches);
