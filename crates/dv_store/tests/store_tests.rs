use chrono::{Duration, Utc};
use dv_store::{Record, RecordFilter, Store, StoreError};
use serde_json::json;
use tempfile::{tempdir, TempDir};

async fn open_store() -> (TempDir, Store) {
    let dir = tempdir().unwrap();
    let store = Store::open(&dir.path().join("vault.db")).await.unwrap();
    (dir, store)
}

fn friend(id: &str, name: &str, mutual: u32) -> Record {
    Record::new(
        id,
        Some(name.to_string()),
        "Facebook",
        "friend",
        json!({ "id": id, "name": name, "mutualFriends": mutual }),
    )
}

async fn tamper(store: &Store, id: &str) {
    let (ct,): (String,) = sqlx::query_as("SELECT ciphertext FROM extracted_data WHERE id = ?")
        .bind(id)
        .fetch_one(&store.pool)
        .await
        .unwrap();
    // Swap the first base64 character for a different one so the tag no longer matches.
    let mut chars: Vec<char> = ct.chars().collect();
    chars[0] = if chars[0] == 'A' { 'B' } else { 'A' };
    let forged: String = chars.into_iter().collect();
    sqlx::query("UPDATE extracted_data SET ciphertext = ? WHERE id = ?")
        .bind(forged)
        .bind(id)
        .execute(&store.pool)
        .await
        .unwrap();
}

#[tokio::test]
async fn put_then_get_returns_equal_record() {
    let (_dir, store) = open_store().await;
    let record = Record::new(
        "post_12345",
        None,
        "Facebook",
        "post",
        json!({
            "author": "John Doe",
            "text": "Just had an amazing day at the beach!",
            "likes": 45,
            "tags": ["beach", "summer"],
            "nested": { "deep": [1, 2, { "x": null }] }
        }),
    );
    store.put(&record).await.unwrap();

    let back = store.get("post_12345").await.unwrap().unwrap();
    assert_eq!(back, record);
}

#[tokio::test]
async fn payload_is_not_stored_in_plaintext() {
    let (_dir, store) = open_store().await;
    store.put(&friend("1", "John Doe", 5)).await.unwrap();

    let (iv, ct): (String, String) =
        sqlx::query_as("SELECT iv, ciphertext FROM extracted_data WHERE id = '1'")
            .fetch_one(&store.pool)
            .await
            .unwrap();
    assert!(!iv.is_empty());
    assert!(!ct.contains("mutualFriends"));
}

#[tokio::test]
async fn get_missing_is_none() {
    let (_dir, store) = open_store().await;
    assert!(store.get("nope").await.unwrap().is_none());
}

#[tokio::test]
async fn put_overwrites_same_id() {
    let (_dir, store) = open_store().await;
    store.put(&friend("1", "John Doe", 5)).await.unwrap();
    store.put(&friend("1", "John Doe", 9)).await.unwrap();

    let all = store.get_all().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].payload["mutualFriends"], 9);
}

#[tokio::test]
async fn tampered_record_fails_single_read() {
    let (_dir, store) = open_store().await;
    store.put(&friend("1", "John Doe", 5)).await.unwrap();
    tamper(&store, "1").await;

    match store.get("1").await {
        Err(StoreError::Decryption { id }) => assert_eq!(id, "1"),
        other => panic!("expected decryption error, got {other:?}"),
    }
}

#[tokio::test]
async fn bulk_read_skips_tampered_record() {
    let (_dir, store) = open_store().await;
    store.put(&friend("1", "John Doe", 5)).await.unwrap();
    store.put(&friend("2", "Jane Smith", 12)).await.unwrap();
    store.put(&friend("3", "Alice Johnson", 3)).await.unwrap();
    tamper(&store, "2").await;

    let all = store.get_all().await.unwrap();
    let ids: Vec<&str> = all.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&"1") && ids.contains(&"3"));

    let report = store.get_all_with_report().await.unwrap();
    assert_eq!(report.records.len(), 2);
    assert_eq!(report.skipped, vec!["2".to_string()]);
}

#[tokio::test]
async fn ciphertext_moved_to_another_row_is_rejected() {
    let (_dir, store) = open_store().await;
    store.put(&friend("1", "John Doe", 5)).await.unwrap();
    store.put(&friend("2", "Jane Smith", 12)).await.unwrap();

    sqlx::query(
        "UPDATE extracted_data SET \
            iv = (SELECT iv FROM extracted_data WHERE id = '1'), \
            ciphertext = (SELECT ciphertext FROM extracted_data WHERE id = '1') \
         WHERE id = '2'",
    )
    .execute(&store.pool)
    .await
    .unwrap();

    assert!(matches!(store.get("2").await, Err(StoreError::Decryption { .. })));
    assert!(store.get("1").await.unwrap().is_some());
}

#[tokio::test]
async fn delete_and_clear() {
    let (_dir, store) = open_store().await;
    store.put(&friend("1", "John Doe", 5)).await.unwrap();
    store.put(&friend("2", "Jane Smith", 12)).await.unwrap();

    store.delete("1").await.unwrap();
    store.delete("1").await.unwrap();
    assert!(store.get("1").await.unwrap().is_none());

    assert_eq!(store.clear().await.unwrap(), 1);
    assert!(store.get_all().await.unwrap().is_empty());

    // Key survives a clear.
    store.put(&friend("3", "Alice Johnson", 3)).await.unwrap();
    assert!(store.get("3").await.unwrap().is_some());
}

#[tokio::test]
async fn repeated_opens_share_one_key() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("vault.db");

    let a = Store::open(&path).await.unwrap();
    let b = Store::open(&path).await.unwrap();

    a.put(&friend("1", "John Doe", 5)).await.unwrap();
    assert!(b.get("1").await.unwrap().is_some());

    let (slots,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM encryption_keys")
        .fetch_one(&a.pool)
        .await
        .unwrap();
    assert_eq!(slots, 1);
}

#[tokio::test]
async fn corrupted_key_slot_fails_open() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("vault.db");
    let store = Store::open(&path).await.unwrap();
    sqlx::query("UPDATE encryption_keys SET key = 'not-a-key'")
        .execute(&store.pool)
        .await
        .unwrap();
    store.close().await;

    assert!(matches!(Store::open(&path).await, Err(StoreError::KeyImport(_))));
}

#[tokio::test]
async fn unpersistable_key_fails_open() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("vault.db");
    let store = Store::open(&path).await.unwrap();
    sqlx::query("DELETE FROM encryption_keys")
        .execute(&store.pool)
        .await
        .unwrap();
    // Silently drop every write to the key slot.
    sqlx::query(
        "CREATE TRIGGER drop_key_writes BEFORE INSERT ON encryption_keys \
         BEGIN SELECT RAISE(IGNORE); END",
    )
    .execute(&store.pool)
    .await
    .unwrap();
    store.close().await;

    assert!(matches!(Store::open(&path).await, Err(StoreError::KeyExport(_))));
}

#[tokio::test]
async fn query_filters_by_metadata() {
    let (_dir, store) = open_store().await;
    store.put(&friend("1", "John Doe", 5)).await.unwrap();
    store
        .put(&Record::new("post_1", None, "Facebook", "post", json!({"likes": 1})))
        .await
        .unwrap();
    store
        .put(&Record::new("g1", Some("Tech".into()), "Other", "group", json!({})))
        .await
        .unwrap();

    let friends = store.query(&RecordFilter::by_type("friend")).await.unwrap();
    assert_eq!(friends.records.len(), 1);
    assert_eq!(friends.records[0].id, "1");

    let facebook = store.query(&RecordFilter::by_source("Facebook")).await.unwrap();
    assert_eq!(facebook.records.len(), 2);

    let future = RecordFilter {
        since: Some(Utc::now() + Duration::hours(1)),
        ..RecordFilter::default()
    };
    assert!(store.query(&future).await.unwrap().records.is_empty());

    let counts = store.count_by_type().await.unwrap();
    assert_eq!(counts.get("friend"), Some(&1));
    assert_eq!(counts.get("post"), Some(&1));
    assert_eq!(counts.get("group"), Some(&1));
}
