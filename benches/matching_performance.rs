//! Performance benchmarks for scoring, enqueue and matching

use counsel_match::config::AppConfig;
use counsel_match::events::EventBus;
use counsel_match::matching::{ConsultationHistory, CounselorScorer, ScoreInputs, ScoringWeights};
use counsel_match::service::MatchingSystem;
use counsel_match::store::InMemoryStore;
use counsel_match::types::{CounselorId, QueueEvent};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;

fn create_bench_system() -> (MatchingSystem, mpsc::UnboundedReceiver<QueueEvent>) {
    let (events, receiver) = EventBus::channel();
    let system = MatchingSystem::build(
        &AppConfig::default(),
        Arc::new(InMemoryStore::new()),
        events,
        None,
    );
    (system, receiver)
}

fn bench_select_best(c: &mut Criterion) {
    let scorer = CounselorScorer::new(ScoringWeights::default());
    let eligible: BTreeSet<CounselorId> = (1..=50).collect();

    let mut histories = HashMap::new();
    let mut category_counts = HashMap::new();
    for counselor_id in (1..=50).step_by(3) {
        histories.insert(
            counselor_id,
            ConsultationHistory {
                count: counselor_id % 7 + 1,
                avg_rating: Some(1.0 + (counselor_id % 5) as f64),
            },
        );
        category_counts.insert(counselor_id, counselor_id % 11);
    }
    let inputs = ScoreInputs {
        category: Some("career".to_string()),
        histories,
        category_counts,
    };

    c.bench_function("select_best_50_counselors", |b| {
        b.iter(|| black_box(scorer.select_best("bench-customer", &eligible, &inputs)))
    });
}

fn bench_single_enqueue(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("single_enqueue", |b| {
        b.iter(|| {
            rt.block_on(async {
                let (system, _events) = create_bench_system();
                black_box(system.queue_service.enqueue("bench-customer").await)
            })
        })
    });
}

fn bench_pop_matchable_with_blocked_head(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let available: BTreeSet<CounselorId> = (1..=3).collect();

    // Ten customers at the head have blocked every counselor
    c.bench_function("pop_matchable_past_10_blocked", |b| {
        b.iter_batched(
            || {
                rt.block_on(async {
                    let (system, events) = create_bench_system();
                    for i in 0..20 {
                        let customer_id = format!("customer_{}", i);
                        let _ = system.queue_service.enqueue(&customer_id).await;
                        if i < 10 {
                            for counselor_id in &available {
                                let _ = system.blacklist.block(&customer_id, *counselor_id);
                            }
                        }
                    }
                    (system, events)
                })
            },
            |(system, _events)| {
                rt.block_on(async { black_box(system.maker.pop_matchable(&available).await) })
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_tick_with_load(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("tick_100_customers_10_counselors", |b| {
        b.iter_batched(
            || {
                rt.block_on(async {
                    let (system, events) = create_bench_system();
                    for i in 0..100 {
                        let _ = system
                            .queue_service
                            .enqueue(&format!("customer_{}", i))
                            .await;
                    }
                    for counselor_id in 1..=10 {
                        let _ = system.presence.heartbeat(counselor_id, true).await;
                    }
                    (system, events)
                })
            },
            |(system, _events)| rt.block_on(async { black_box(system.scheduler.run_tick().await) }),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(
    benches,
    bench_select_best,
    bench_single_enqueue,
    bench_pop_matchable_with_blocked_head,
    bench_tick_with_load
);
criterion_main!(benches);
