use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use authorization_engine::authorization::{decode_response, AuthorizationRequest};
use authorization_engine::clock::SystemClock;
use authorization_engine::idempotency::{
    IdempotencyStore, InMemoryIdempotencyStore, RequestFingerprinter,
};
use authorization_engine::resilience::{CircuitBreaker, CircuitBreakerConfig};

fn request_with_metadata(entries: usize) -> AuthorizationRequest {
    let mut request =
        AuthorizationRequest::new("merchant-1", Decimal::new(12_500, 2), "USD", "tok_4242");
    for i in 0..entries {
        request = request.with_metadata(format!("key_{}", i), format!("value_{}", i));
    }
    request
}

fn benchmark_fingerprint(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprint");
    let fingerprinter = RequestFingerprinter::new();

    for size in [0, 10, 100].iter() {
        let request = request_with_metadata(*size);
        group.bench_with_input(BenchmarkId::new("metadata_entries", size), &request, |b, request| {
            b.iter(|| black_box(fingerprinter.fingerprint(black_box(request))))
        });
    }

    group.finish();
}

fn benchmark_store(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("in_memory_store");
    group.measurement_time(Duration::from_secs(5));

    let store = Arc::new(InMemoryIdempotencyStore::new(Arc::new(SystemClock)));
    runtime.block_on(async {
        for i in 0..10_000 {
            store
                .put(&format!("key-{}", i), "fp", json!({"authorized": true}), None)
                .await
                .expect("put");
        }
    });

    group.bench_function("get_hit", |b| {
        b.to_async(&runtime)
            .iter(|| async { black_box(store.get("key-5000").await) })
    });

    group.bench_function("get_miss", |b| {
        b.to_async(&runtime)
            .iter(|| async { black_box(store.get("absent").await) })
    });

    group.bench_function("put", |b| {
        b.to_async(&runtime).iter(|| async {
            black_box(
                store
                    .put("bench-put", "fp", json!({"authorized": false}), Some(Duration::from_secs(60)))
                    .await,
            )
        })
    });

    group.finish();
}

fn benchmark_breaker(c: &mut Criterion) {
    let breaker = CircuitBreaker::new(
        "authorizer",
        CircuitBreakerConfig::default(),
        Arc::new(SystemClock),
    );

    c.bench_function("breaker_acquire_success", |b| {
        b.iter(|| {
            let permit = breaker.try_acquire().expect("closed");
            breaker.record_success(permit);
        })
    });
}

fn benchmark_decode(c: &mut Criterion) {
    let body = br#"{"approved":true,"authCode":"A1B2C3","transactionId":"txn-1"}"#;

    c.bench_function("decode_response", |b| {
        b.iter(|| black_box(decode_response(black_box(body))))
    });
}

criterion_group!(
    benches,
    benchmark_fingerprint,
    benchmark_store,
    benchmark_breaker,
    benchmark_decode
);
criterion_main!(benches);
