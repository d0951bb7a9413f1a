use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use cricket_insights::aggregate::{AggregationEngine, Scope};
use cricket_insights::ingest::MatchDocument;
use cricket_insights::model::PlayerId;
use cricket_insights::similarity::SimilarityIndex;
use cricket_insights::squad::{SquadConstraints, SquadOptimizer, score_pool};
use cricket_insights::store::DeliveryStore;
use cricket_insights::synthetic::{self, SyntheticConfig};
use cricket_insights::target::{ResourceTable, ResourceTableRegistry, TargetAdjuster, TargetRequest};

fn league() -> MatchDocument {
    synthetic::generate(&SyntheticConfig {
        teams: 8,
        matches: 400,
        ..SyntheticConfig::default()
    })
}

fn store() -> Arc<DeliveryStore> {
    Arc::new(league().into_store().expect("synthetic league is valid"))
}

fn bench_store_build(c: &mut Criterion) {
    let doc = league();
    c.bench_function("store_build", |b| {
        b.iter(|| {
            let store = black_box(doc.clone()).into_store().unwrap();
            black_box(store.delivery_count());
        })
    });
}

fn bench_aggregation_build(c: &mut Criterion) {
    let store = store();
    c.bench_function("aggregation_build", |b| {
        b.iter(|| {
            let engine = AggregationEngine::new(Arc::clone(&store));
            black_box(engine.version().as_str().len());
        })
    });
}

fn bench_team_aggregate_uncached(c: &mut Criterion) {
    let store = store();
    c.bench_function("team_aggregate_uncached", |b| {
        b.iter_batched(
            || AggregationEngine::new(Arc::clone(&store)),
            |engine| {
                let agg = engine
                    .team(black_box("Northern Hawks"), &Scope::Career)
                    .unwrap();
                black_box(agg.matches);
            },
            criterion::BatchSize::LargeInput,
        )
    });
}

fn bench_similarity(c: &mut Criterion) {
    let engine = AggregationEngine::new(store());
    let index = SimilarityIndex::build(&engine, 10);
    c.bench_function("similarity_top5", |b| {
        b.iter(|| {
            let out = index.similar(black_box(101), 5, None).unwrap();
            black_box(out.results.len());
        })
    });
}

fn bench_target(c: &mut Criterion) {
    let mut tables = ResourceTableRegistry::new();
    tables.insert(ResourceTable::from_exponential_model("bench", 50, 0.04));
    let adjuster = TargetAdjuster::new(Arc::new(tables), 20);
    let req = TargetRequest::before_start(287, 50, 38, "bench");
    c.bench_function("target_adjust", |b| {
        b.iter(|| {
            let adj = adjuster.adjust(black_box(&req)).unwrap();
            black_box(adj);
        })
    });
}

fn bench_squad(c: &mut Criterion) {
    let engine = AggregationEngine::new(store());
    let pool: Vec<(PlayerId, Vec<_>)> = (1..=8u32)
        .flat_map(|team| (1..=11u32).map(move |slot| team * 100 + slot))
        .map(|id| (id, Vec::new()))
        .collect();
    let candidates = score_pool(
        &engine,
        &pool,
        &Default::default(),
        5,
        cricket_insights::aggregate::FormWeighting::Exponential { decay: 0.8 },
    );
    let optimizer = SquadOptimizer::new(SquadConstraints::default());
    c.bench_function("squad_select_88", |b| {
        b.iter(|| {
            let squad = optimizer.select(black_box(&candidates)).unwrap();
            black_box(squad.total_score);
        })
    });
}

criterion_group!(
    perf,
    bench_store_build,
    bench_aggregation_build,
    bench_team_aggregate_uncached,
    bench_similarity,
    bench_target,
    bench_squad
);
criterion_main!(perf);
