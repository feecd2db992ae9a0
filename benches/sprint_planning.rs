use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use uuid::Uuid;

use foreman::domain::models::cosine_similarity;
use foreman::services::{plan_sprint, PlanItem};

/// `count` items where each of the first half feeds two later items.
fn layered_backlog(count: usize) -> Vec<PlanItem> {
    let base = Utc::now();
    let ids: Vec<Uuid> = (0..count).map(|_| Uuid::new_v4()).collect();
    (0..count)
        .map(|i| {
            let depends_on = if i >= 2 { vec![ids[i / 2 - 1]] } else { Vec::new() };
            PlanItem {
                id: ids[i],
                priority: (i % 11) as u8,
                estimated_effort: 1 + (i % 5) as u32,
                created_at: base + Duration::seconds(i as i64),
                depends_on,
            }
        })
        .collect()
}

fn bench_plan_sprint(c: &mut Criterion) {
    let mut group = c.benchmark_group("foreman/plan_sprint");
    for count in [100usize, 1_000, 10_000] {
        let items = layered_backlog(count);
        let capacity = (count as u32) * 2;
        group.bench_with_input(BenchmarkId::from_parameter(count), &items, |b, items| {
            b.iter(|| {
                let plan = plan_sprint(black_box(items), capacity);
                black_box(plan.selected.len());
            })
        });
    }
    group.finish();
}

fn bench_cosine_similarity(c: &mut Criterion) {
    let a: Vec<f32> = (0..1536).map(|i| (i as f32).sin()).collect();
    let b: Vec<f32> = (0..1536).map(|i| (i as f32).cos()).collect();

    c.bench_function("foreman/cosine_similarity(dim=1536)", |bench| {
        bench.iter(|| black_box(cosine_similarity(black_box(&a), black_box(&b))))
    });
}

criterion_group!(benches, bench_plan_sprint, bench_cosine_similarity);
criterion_main!(benches);
