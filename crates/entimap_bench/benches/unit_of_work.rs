//! Dirty-checking and flush benchmarks.

use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};
use entimap_codec::Row;
use entimap_core::{Config, Entity, EntityManager};
use entimap_store::InMemoryStore;
use entimap_testkit::{blog_registry, TestSession};
use rand::seq::SliceRandom;
use rand::Rng;

/// Session with `count` stored users, all loaded and clean.
fn loaded_users(count: i64) -> (TestSession, Vec<Entity>) {
    let mut session = TestSession::blog();
    for id in 1..=count {
        session
            .create("user", Row::new().with("id", id).with("name", format!("user {id}")))
            .unwrap();
    }
    session.flush().unwrap();
    session.clear();
    let users = (1..=count)
        .map(|id| session.find_one_or_fail("user", id).unwrap())
        .collect();
    session.store().clear_statements();
    (session, users)
}

/// Dirty check over clean entities, the common case after a read.
fn bench_clean_check(c: &mut Criterion) {
    let mut group = c.benchmark_group("clean_check");

    for count in [10i64, 100, 1000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let (mut session, _users) = loaded_users(count);
            b.iter(|| {
                let change_sets = session.compute_change_sets().unwrap();
                black_box(change_sets);
            });
        });
    }
    group.finish();
}

/// Dirty check with a random tenth of the entities mutated.
fn bench_dirty_check(c: &mut Criterion) {
    let mut group = c.benchmark_group("dirty_check");

    for count in [100i64, 1000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let (mut session, users) = loaded_users(count);
            let mut rng = rand::thread_rng();
            let dirty = users.len() / 10;
            for user in users.choose_multiple(&mut rng, dirty) {
                user.set("balance", rng.gen_range(1..10_000i64)).unwrap();
            }
            b.iter(|| {
                let change_sets = session.compute_change_sets().unwrap();
                assert_eq!(change_sets.len(), dirty);
                black_box(change_sets);
            });
        });
    }
    group.finish();
}

/// Inserting a batch of new entities in one flush.
fn bench_flush_inserts(c: &mut Criterion) {
    let mut group = c.benchmark_group("flush_inserts");

    for count in [10i64, 100] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter_batched(
                || {
                    let registry = blog_registry();
                    let store = entimap_testkit::store_for(&registry);
                    let mut em = EntityManager::with_config(registry, store, Config::default())
                        .unwrap();
                    for id in 1..=count {
                        em.create("user", Row::new().with("id", id)).unwrap();
                    }
                    em
                },
                |mut em: EntityManager<InMemoryStore>| black_box(em.flush().unwrap()),
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_clean_check, bench_dirty_check, bench_flush_inserts);
criterion_main!(benches);
