//! Benchmarks for the batch engine
//!
//! Run with: cargo bench

use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio_util::sync::CancellationToken;

use sweeper_core::error::Result;
use sweeper_core::jobs::{
    BatchRunner, CursorFetcher, ItemContext, ItemOutcome, ItemProcessor, RetryClassifier,
    RunnerConfig, WorkItem,
};
use sweeper_core::services::ExternalCallError;

struct Row {
    id: String,
}

impl WorkItem for Row {
    fn id(&self) -> &str {
        &self.id
    }
}

struct Rows {
    ids: Vec<String>,
}

impl Rows {
    fn new(count: usize) -> Self {
        Self {
            ids: (0..count).map(|i| format!("row-{}", i)).collect(),
        }
    }
}

#[async_trait]
impl CursorFetcher for Rows {
    type Item = Row;

    async fn count(&self) -> Result<u64> {
        Ok(self.ids.len() as u64)
    }

    async fn fetch(&self, limit: u32, offset: u64) -> Result<Vec<Row>> {
        Ok(self
            .ids
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|id| Row { id: id.clone() })
            .collect())
    }
}

struct Echo;

#[async_trait]
impl ItemProcessor<Row> for Echo {
    async fn process(&self, item: &Row, ctx: &ItemContext<'_>) -> ItemOutcome {
        let attempted = ctx
            .call(|| async { Ok::<_, ExternalCallError>(item.id.len()) })
            .await;
        black_box(attempted);
        ItemOutcome::Succeeded
    }
}

/// Benchmark a full unpaced run over an in-memory set.
fn bench_runner(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_runner");
    let rt = tokio::runtime::Runtime::new().unwrap();

    for (items, batch_size) in [(100, 10), (1000, 100), (1000, 1000)] {
        let fetcher = Rows::new(items);
        let runner = BatchRunner::new("bench", RunnerConfig::default().with_batch_size(batch_size));
        let cancel = CancellationToken::new();

        group.throughput(Throughput::Elements(items as u64));
        group.bench_with_input(
            BenchmarkId::new(format!("batch_{}", batch_size), items),
            &items,
            |b, _| {
                b.to_async(&rt).iter(|| async {
                    let result = runner.run(&cancel, &fetcher, &Echo).await.unwrap();
                    black_box(result.succeeded)
                });
            },
        );
    }
    group.finish();
}

/// Benchmark error classification.
fn bench_classify(c: &mut Criterion) {
    let errors = [
        ExternalCallError::rate_limited("groq", None, "slow down"),
        ExternalCallError::transient("voyage", "connection reset"),
        ExternalCallError::permanent("ollama", "bad input"),
    ];

    c.bench_function("retry_classify", |b| {
        b.iter(|| {
            for error in &errors {
                black_box(RetryClassifier::classify(black_box(error)));
            }
        });
    });
}

criterion_group!(benches, bench_runner, bench_classify);
criterion_main!(benches);
