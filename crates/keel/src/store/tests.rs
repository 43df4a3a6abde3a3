#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeDelta, Utc};
    use tokio_stream::StreamExt;

    use crate::{
        codec::Payload,
        filter::{Filter, FindOptions, SortOrder},
        record::{Record, RecordId},
        store::{finish, ChangeKind, DocumentOps, DocumentStore, IndexSpec, MemoryStore},
        KeelError,
    };

    fn record(id: impl Into<RecordId>, value: &str) -> Record {
        Record::new(
            id,
            Payload {
                json_value:      value.to_owned(),
                hash_json_value: format!("h-{value}"),
            },
        )
    }

    async fn ids(store: &MemoryStore, namespace: &str) -> Vec<RecordId> {
        store
            .find(namespace, &Filter::All, &FindOptions::default())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect()
    }

    #[tokio::test]
    async fn test_find_sorted_and_limited() {
        let store = MemoryStore::new();
        store
            .insert_many("q", vec![record(3, "c"), record(1, "a"), record(2, "b")])
            .await
            .unwrap();

        assert_eq!(
            ids(&store, "q").await,
            vec![RecordId::Int(1), RecordId::Int(2), RecordId::Int(3)]
        );
        let last = store
            .find_one("q", &Filter::All, SortOrder::Descending)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(last.id, RecordId::Int(3));
        let two = store
            .find("q", &Filter::All, &FindOptions::default().with_limit(2))
            .await
            .unwrap();
        assert_eq!(two.len(), 2);
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let store = MemoryStore::new();
        store.insert_many("a", vec![record(1, "x")]).await.unwrap();
        assert_eq!(store.count("a", &Filter::All).await.unwrap(), 1);
        assert_eq!(store.count("b", &Filter::All).await.unwrap(), 0);
        assert_eq!(store.estimated_count("b").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_insert_duplicate_keeps_earlier_records() {
        let store = MemoryStore::new();
        store.insert_many("m", vec![record("k2", "x")]).await.unwrap();
        let result = store
            .insert_many("m", vec![record("k1", "a"), record("k2", "b"), record("k3", "c")])
            .await;
        assert!(matches!(result, Err(KeelError::DuplicateKey { .. })));
        // Ordered insert: k1 landed before the duplicate, k3 never did.
        assert_eq!(
            ids(&store, "m").await,
            vec![RecordId::from("k1"), RecordId::from("k2")]
        );
    }

    #[tokio::test]
    async fn test_replace_one_upsert() {
        let store = MemoryStore::new();
        let previous = store.replace_one("m", record("k", "v1"), false).await.unwrap();
        assert!(previous.is_none());
        assert_eq!(store.count("m", &Filter::All).await.unwrap(), 0);

        assert!(store
            .replace_one("m", record("k", "v1"), true)
            .await
            .unwrap()
            .is_none());
        let previous = store
            .replace_one("m", record("k", "v2"), true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(previous.json_value, "v1");
        assert_eq!(store.count("m", &Filter::All).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_find_one_and_delete_respects_sort() {
        let store = MemoryStore::new();
        store
            .insert_many("q", vec![record(1, "a"), record(2, "a"), record(3, "b")])
            .await
            .unwrap();
        let removed = store
            .find_one_and_delete("q", &Filter::HashEquals("h-a".to_owned()), SortOrder::Descending)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(removed.id, RecordId::Int(2));
        assert!(store
            .find_one_and_delete("q", &Filter::HashEquals("h-z".to_owned()), SortOrder::Ascending)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_delete_many_counts() {
        let store = MemoryStore::new();
        store
            .insert_many("q", vec![record(1, "a"), record(2, "b"), record(3, "a")])
            .await
            .unwrap();
        let deleted = store
            .delete_many("q", &Filter::HashEquals("h-a".to_owned()))
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(ids(&store, "q").await, vec![RecordId::Int(2)]);
    }

    #[tokio::test]
    async fn test_transaction_commit_and_abort() {
        let store = MemoryStore::new();

        let txn = store.begin().await.unwrap();
        txn.insert_many("q", vec![record(1, "a")]).await.unwrap();
        txn.commit().await.unwrap();
        assert_eq!(store.count("q", &Filter::All).await.unwrap(), 1);

        let txn = store.begin().await.unwrap();
        txn.insert_many("q", vec![record(2, "b")]).await.unwrap();
        txn.delete_many("q", &Filter::IdEquals(RecordId::Int(1)))
            .await
            .unwrap();
        assert_eq!(txn.count("q", &Filter::All).await.unwrap(), 1);
        txn.abort().await.unwrap();
        assert_eq!(ids(&store, "q").await, vec![RecordId::Int(1)]);
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let store = MemoryStore::new();
        store.insert_many("m", vec![record("k", "v1")]).await.unwrap();
        {
            let txn = store.begin().await.unwrap();
            txn.replace_one("m", record("k", "v2"), true).await.unwrap();
            txn.insert_many("m", vec![record("j", "x")]).await.unwrap();
        }
        let all = store
            .find("m", &Filter::All, &FindOptions::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].json_value, "v1");
    }

    #[tokio::test]
    async fn test_finish_aborts_on_error() {
        let store = MemoryStore::new();
        let txn = store.begin().await.unwrap();
        let outcome = txn.insert_many("q", vec![record(1, "a"), record(1, "b")]).await;
        assert!(finish(txn, outcome).await.is_err());
        assert_eq!(store.count("q", &Filter::All).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_injected_conflict_rolls_back() {
        let store = MemoryStore::new();
        store.inject_conflicts(1);

        let txn = store.begin().await.unwrap();
        txn.insert_many("q", vec![record(1, "a")]).await.unwrap();
        let err = txn.commit().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(store.count("q", &Filter::All).await.unwrap(), 0);

        let txn = store.begin().await.unwrap();
        txn.insert_many("q", vec![record(1, "a")]).await.unwrap();
        txn.commit().await.unwrap();
        assert_eq!(store.count("q", &Filter::All).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_clones_share_data() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.insert_many("q", vec![record(1, "a")]).await.unwrap();
        assert_eq!(other.count("q", &Filter::All).await.unwrap(), 1);
        assert_eq!(store.store_id(), other.store_id());
        assert_ne!(store.store_id(), MemoryStore::new().store_id());
    }

    #[tokio::test]
    async fn test_watch_filters_namespace_and_kind() {
        let store = MemoryStore::new();
        let mut feed = store.watch("q", &[ChangeKind::Insert]).unwrap();

        store.insert_many("other", vec![record(1, "a")]).await.unwrap();
        store.insert_many("q", vec![record(1, "a")]).await.unwrap();
        store
            .delete_many("q", &Filter::All)
            .await
            .unwrap();
        store.insert_many("q", vec![record(2, "b")]).await.unwrap();

        let first = feed.next().await.unwrap().unwrap();
        assert_eq!(first.namespace, "q");
        assert_eq!(first.kind, ChangeKind::Insert);
        assert_eq!(first.id, Some(RecordId::Int(1)));
        let second = feed.next().await.unwrap().unwrap();
        assert_eq!(second.id, Some(RecordId::Int(2)));
    }

    #[tokio::test]
    async fn test_watch_sees_transaction_only_after_commit() {
        let store = MemoryStore::new();
        let mut feed = store.watch("q", &[ChangeKind::Insert]).unwrap();

        let txn = store.begin().await.unwrap();
        txn.insert_many("q", vec![record(1, "a")]).await.unwrap();
        let early = tokio::time::timeout(Duration::from_millis(50), feed.next()).await;
        assert!(early.is_err());
        txn.commit().await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), feed.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(event.id, Some(RecordId::Int(1)));
    }

    #[tokio::test]
    async fn test_create_index_is_idempotent() {
        let store = MemoryStore::new();
        store
            .create_index("m", IndexSpec::hash_and_id())
            .await
            .unwrap();
        store
            .create_index("m", IndexSpec::hash_and_id())
            .await
            .unwrap();
        assert_eq!(store.indexes("m").await, vec![IndexSpec::hash_and_id()]);
        assert_eq!(IndexSpec::hash_and_id().name(), "hash_json_value_1__id_1");
    }

    #[tokio::test]
    async fn test_sweep_expired_removes_old_records() {
        let store = MemoryStore::new();
        store
            .create_index("m", IndexSpec::created_at_ttl(Duration::from_secs(60)))
            .await
            .unwrap();
        let now = Utc::now();
        store
            .insert_many(
                "m",
                vec![
                    record("old", "a").with_created_at(now - TimeDelta::seconds(120)),
                    record("new", "b").with_created_at(now),
                    record("untimed", "c"),
                ],
            )
            .await
            .unwrap();

        assert_eq!(store.sweep_expired().await, 1);
        assert_eq!(
            ids(&store, "m").await,
            vec![RecordId::from("new"), RecordId::from("untimed")]
        );
    }

    #[tokio::test]
    async fn test_background_sweep() {
        let store = MemoryStore::with_ttl_sweep_interval(Duration::from_millis(20));
        store
            .create_index("m", IndexSpec::created_at_ttl(Duration::from_secs(1)))
            .await
            .unwrap();
        store
            .insert_many(
                "m",
                vec![record("old", "a").with_created_at(Utc::now() - TimeDelta::seconds(5))],
            )
            .await
            .unwrap();

        let mut remaining = 1;
        for _ in 0 .. 50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            remaining = store.count("m", &Filter::All).await.unwrap();
            if remaining == 0 {
                break;
            }
        }
        assert_eq!(remaining, 0);
    }
}
