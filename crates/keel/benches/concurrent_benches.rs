use std::{hint::black_box, time::Duration};

use criterion::{criterion_group, criterion_main, Criterion};
use keel_collections::{CollectionConfig, DocumentDeque, MemoryStore, RetryConfig};
use tokio::runtime::Runtime;

async fn open_handle(store: &MemoryStore) -> DocumentDeque<u64> {
    DocumentDeque::open(
        std::sync::Arc::new(store.clone()),
        "concurrent_test",
        CollectionConfig::default().with_offer_retry(RetryConfig {
            max_attempts: 20,
            min_delay_ms: 0,
            max_delay_ms: 2,
        }),
    )
    .await
    .unwrap()
}

fn bench_concurrent_offers(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    c.bench_function("concurrent_offers_4_handles", |b| {
        b.iter_batched(
            MemoryStore::new,
            |store| {
                rt.block_on(async move {
                    let mut handles = vec![];

                    for producer in 0 .. 4u64 {
                        let deque = open_handle(&store).await;
                        handles.push(tokio::spawn(async move {
                            for i in 0 .. 50u64 {
                                deque.offer_last(&(producer * 100 + i)).await.unwrap();
                            }
                        }));
                    }

                    for handle in handles {
                        handle.await.unwrap();
                    }
                })
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

fn bench_concurrent_polls(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    c.bench_function("concurrent_polls_4_handles", |b| {
        b.iter_batched(
            || {
                rt.block_on(async {
                    let store = MemoryStore::new();
                    open_handle(&store).await.add_all(0 .. 400).await.unwrap();
                    store
                })
            },
            |store| {
                rt.block_on(async move {
                    let mut handles = vec![];

                    for _ in 0 .. 4 {
                        let deque = open_handle(&store).await;
                        handles.push(tokio::spawn(async move {
                            while let Some(value) = deque.poll_first().await.unwrap() {
                                black_box(value);
                            }
                        }));
                    }

                    for handle in handles {
                        handle.await.unwrap();
                    }
                })
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

fn bench_blocking_handoff(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    c.bench_function("blocking_poll_handoff", |b| {
        b.iter_batched(
            MemoryStore::new,
            |store| {
                rt.block_on(async move {
                    let consumer = open_handle(&store).await;
                    let producer = open_handle(&store).await;
                    let waiter = tokio::spawn(async move {
                        consumer
                            .poll_first_timeout(Duration::from_secs(5))
                            .await
                            .unwrap()
                    });
                    producer.offer_last(&1).await.unwrap();
                    black_box(waiter.await.unwrap());
                })
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

criterion_group!(
    benches,
    bench_concurrent_offers,
    bench_concurrent_polls,
    bench_blocking_handoff
);
criterion_main!(benches);
