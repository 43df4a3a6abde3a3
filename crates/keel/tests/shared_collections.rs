//! Several handles, standing in for several processes, sharing one store.

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use keel_collections::{CollectionConfig, DocumentDeque, DocumentSortedMap, DocumentStore, MemoryStore, RetryConfig};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn contended_config() -> CollectionConfig {
    CollectionConfig::default().with_offer_retry(RetryConfig {
        max_attempts: 50,
        min_delay_ms: 0,
        max_delay_ms: 5,
    })
}

async fn deque(store: &MemoryStore, namespace: &str) -> DocumentDeque<u64> {
    let store: Arc<dyn DocumentStore> = Arc::new(store.clone());
    DocumentDeque::open(store, namespace, contended_config())
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_producers_lose_nothing() {
    init_tracing();
    let store = MemoryStore::new();
    let mut producers = Vec::new();
    for producer in 0 .. 4u64 {
        let handle = deque(&store, "jobs").await;
        producers.push(tokio::spawn(async move {
            for n in 0 .. 25u64 {
                let value = producer * 1000 + n;
                if n % 2 == 0 {
                    handle.offer_last(&value).await.unwrap();
                }
                else {
                    handle.offer_first(&value).await.unwrap();
                }
            }
        }));
    }
    for producer in producers {
        producer.await.unwrap();
    }

    let reader = deque(&store, "jobs").await;
    let values = reader.to_vec().await.unwrap();
    assert_eq!(values.len(), 100);
    let distinct: BTreeSet<u64> = values.iter().copied().collect();
    assert_eq!(distinct.len(), 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_consumers_never_share_an_element() {
    init_tracing();
    let store = MemoryStore::new();
    let producer = deque(&store, "work").await;
    producer.add_all(0 .. 200u64).await.unwrap();

    let mut consumers = Vec::new();
    for _ in 0 .. 4 {
        let handle = deque(&store, "work").await;
        consumers.push(tokio::spawn(async move {
            let mut taken = Vec::new();
            while let Some(value) = handle.poll_first().await.unwrap() {
                taken.push(value);
            }
            taken
        }));
    }
    let mut all = Vec::new();
    for consumer in consumers {
        let taken = consumer.await.unwrap();
        // Each consumer sees its share in queue order.
        assert!(taken.windows(2).all(|pair| pair[0] < pair[1]));
        all.extend(taken);
    }
    all.sort_unstable();
    assert_eq!(all, (0 .. 200u64).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn blocked_consumers_are_all_served() {
    init_tracing();
    let store = MemoryStore::new();
    let mut consumers = Vec::new();
    for _ in 0 .. 3 {
        let handle = deque(&store, "events").await;
        consumers.push(tokio::spawn(async move {
            handle
                .poll_first_timeout(Duration::from_secs(10))
                .await
                .unwrap()
        }));
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let producer = deque(&store, "events").await;
    for value in [10u64, 20, 30] {
        producer.offer_last(&value).await.unwrap();
    }

    let mut received = Vec::new();
    for consumer in consumers {
        let value = tokio::time::timeout(Duration::from_secs(5), consumer)
            .await
            .unwrap()
            .unwrap();
        received.push(value.unwrap());
    }
    received.sort_unstable();
    assert_eq!(received, vec![10, 20, 30]);
}

#[tokio::test]
async fn blocking_poll_wakes_before_timeout() {
    init_tracing();
    let store = MemoryStore::new();
    let consumer = deque(&store, "wake").await;
    let producer = deque(&store, "wake").await;
    let writer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        producer.offer_last(&7).await.unwrap();
    });

    let started = std::time::Instant::now();
    let value = consumer
        .poll_first_timeout(Duration::from_secs(5))
        .await
        .unwrap();
    let elapsed = started.elapsed();
    assert_eq!(value, Some(7));
    assert!(elapsed >= Duration::from_millis(400));
    assert!(elapsed < Duration::from_secs(4));
    writer.await.unwrap();
}

#[tokio::test]
async fn map_views_track_writes_from_other_handles() {
    init_tracing();
    let store = MemoryStore::new();
    let open = |store: &MemoryStore| {
        let store: Arc<dyn DocumentStore> = Arc::new(store.clone());
        DocumentSortedMap::<String>::open(store, "owners", CollectionConfig::default())
    };
    let writer = open(&store).await.unwrap();
    let reader = open(&store).await.unwrap();
    let keys = reader.key_set();

    writer.put("api", &"alice".to_owned()).await.unwrap();
    writer.put("web", &"bob".to_owned()).await.unwrap();
    assert_eq!(keys.to_vec().await.unwrap(), vec!["api", "web"]);
    assert!(reader.values().contains(&"bob".to_owned()).await.unwrap());

    keys.remove("api").await.unwrap();
    assert_eq!(writer.get("api").await.unwrap(), None);
    assert_eq!(writer.first_key().await.unwrap(), Some("web".to_owned()));
}
