use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use http::{HeaderMap, HeaderValue};
use std::sync::Arc;
use tenant_gateway::cache::{CacheConfig, CacheGateway, CacheKey, MemoryCacheStore};
use tenant_gateway::config::GatewayConfig;
use tenant_gateway::error::GatewayError;
use tenant_gateway::rate_limit::{LimiterConfig, LocalTokenBucket};
use tenant_gateway::resource::ResourceKey;
use tenant_gateway::tenant::{AccessKind, TenantConfig, TenantContext, TenantResolver};

fn benchmark_token_bucket_hot_key(c: &mut Criterion) {
    let limiter = LocalTokenBucket::new(&LimiterConfig::new(1_000_000, 1));
    let mut now = 0u64;

    c.bench_function("token_bucket_hot_key", |b| {
        b.iter(|| {
            now += 1;
            black_box(limiter.allow_at("ratelimit:resource:acme:shop", 1, now))
        })
    });
}

fn benchmark_token_bucket_scale(c: &mut Criterion) {
    let mut group = c.benchmark_group("token_bucket_keys");

    for num_keys in [10usize, 1_000, 100_000].iter() {
        let limiter = LocalTokenBucket::new(&LimiterConfig::new(100, 60));
        let keys: Vec<String> = (0..*num_keys)
            .map(|i| format!("ratelimit:global:10.0.{}.{}", i / 256, i % 256))
            .collect();
        for key in &keys {
            limiter.allow_at(key, 1, 0);
        }

        let mut i = 0usize;
        group.bench_with_input(BenchmarkId::from_parameter(num_keys), num_keys, |b, &n| {
            b.iter(|| {
                i = (i + 1) % n;
                black_box(limiter.allow_at(&keys[i], 1, 0))
            })
        });
    }
    group.finish();
}

fn benchmark_tenant_resolution(c: &mut Criterion) {
    let resolver = TenantResolver::new(&TenantConfig::default()).expect("valid tenant config");
    let mut headers = HeaderMap::new();
    headers.insert("X-Tenant-Id", HeaderValue::from_static("Barber-Co"));

    c.bench_function("tenant_resolution", |b| {
        b.iter(|| black_box(resolver.resolve(&headers, AccessKind::Read)))
    });
}

fn benchmark_cache_hit(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("Failed to create runtime");
    let config = CacheConfig::default();
    let cache = Arc::new(CacheGateway::new(
        Arc::new(MemoryCacheStore::new(config.max_capacity)),
        &config,
    ));
    let key = CacheKey::new(
        &TenantContext::parse("barber-co").expect("valid tenant"),
        &ResourceKey::parse("cortes-premium").expect("valid key"),
    );
    rt.block_on(cache.set(&key, Bytes::from_static(br#"{"key":"cortes-premium"}"#)));

    c.bench_function("cache_hit", |b| {
        b.to_async(&rt).iter(|| {
            let cache = cache.clone();
            let key = key.clone();
            async move {
                black_box(
                    cache
                        .get(&key, || async {
                            Ok::<_, GatewayError>(Bytes::from_static(b"{}"))
                        })
                        .await,
                )
            }
        })
    });
}

fn benchmark_config_parsing(c: &mut Criterion) {
    let yaml = r#"
server:
  host: "0.0.0.0"
  port: 8080
  timeout_secs: 30

rate_limiting:
  global:
    requests: 100
    window_secs: 60
  resource:
    strategy: local_fixed_window
    requests: 20
    window_secs: 10
"#;

    c.bench_function("config_parsing", |b| {
        b.iter(|| black_box(GatewayConfig::from_yaml(yaml)))
    });
}

criterion_group!(
    benches,
    benchmark_token_bucket_hot_key,
    benchmark_token_bucket_scale,
    benchmark_tenant_resolution,
    benchmark_cache_hit,
    benchmark_config_parsing
);
criterion_main!(benches);
