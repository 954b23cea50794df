//! Integration tests for the stream module.
//!
//! These tests verify consumer-group delivery against a real SQLite file.

use std::collections::BTreeSet;
use std::time::Duration;

use history_refresh::{
    ClaimOptions, Database, Fields, ReclaimOptions, StreamClient, StreamError,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const STREAM: &str = "backend.history.refresh";
const GROUP: &str = "backend.history.refresh.workers";

/// Helper to create a test database with migrations applied.
async fn setup_test_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.db");

    let db = Database::new(&db_path)
        .await
        .expect("Failed to create database");

    (db, temp_dir)
}

fn payload(id: &str) -> Fields {
    Fields::from([("id".to_string(), id.to_string())])
}

// ==================== Groups ====================

#[tokio::test]
async fn test_ensure_group_repeated_creates_exactly_one_group() {
    let (db, _temp_dir) = setup_test_db().await;
    let client = StreamClient::new(db);

    let mut created = 0;
    for _ in 0..5 {
        if client.ensure_group(STREAM, GROUP, true).await.unwrap() {
            created += 1;
        }
    }

    assert_eq!(created, 1);
    assert_eq!(client.groups(STREAM).await.unwrap(), vec![GROUP.to_string()]);
}

#[tokio::test]
async fn test_ensure_group_missing_stream_requires_opt_in() {
    let (db, _temp_dir) = setup_test_db().await;
    let client = StreamClient::new(db);

    let err = client.ensure_group(STREAM, GROUP, false).await.unwrap_err();
    assert!(matches!(err, StreamError::StreamMissing { .. }));
    assert!(client.groups(STREAM).await.unwrap().is_empty());
}

// ==================== Claim / Ack ====================

#[tokio::test]
async fn test_claim_delivers_in_append_order() {
    let (db, _temp_dir) = setup_test_db().await;
    let client = StreamClient::new(db);
    client.ensure_group(STREAM, GROUP, true).await.unwrap();
    for id in ["a", "b", "c"] {
        client.append(STREAM, &payload(id)).await.unwrap();
    }

    let entries = client
        .claim(
            STREAM,
            GROUP,
            "c1",
            ClaimOptions {
                count: 2,
                block: None,
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    let ids: Vec<_> = entries.iter().map(|e| e.field("id").unwrap()).collect();
    assert_eq!(ids, vec!["a", "b"]);

    let pending = client.pending(STREAM, GROUP).await.unwrap();
    assert_eq!(pending.len(), 2);
    assert!(pending.iter().all(|p| p.consumer == "c1" && p.delivery_count == 1));
}

#[tokio::test]
async fn test_ack_twice_second_returns_zero() {
    let (db, _temp_dir) = setup_test_db().await;
    let client = StreamClient::new(db);
    client.ensure_group(STREAM, GROUP, true).await.unwrap();
    client.append(STREAM, &payload("a")).await.unwrap();

    let entry = client
        .claim(STREAM, GROUP, "c1", ClaimOptions::default(), &CancellationToken::new())
        .await
        .unwrap()
        .remove(0);

    assert_eq!(client.ack(STREAM, GROUP, entry.id).await.unwrap(), 1);
    assert_eq!(client.ack(STREAM, GROUP, entry.id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_claimed_entry_not_delivered_to_other_consumer() {
    let (db, _temp_dir) = setup_test_db().await;
    let client = StreamClient::new(db).with_wake_interval(Duration::from_millis(10));
    client.ensure_group(STREAM, GROUP, true).await.unwrap();
    client.append(STREAM, &payload("a")).await.unwrap();

    let cancel = CancellationToken::new();
    let first = client
        .claim(STREAM, GROUP, "c1", ClaimOptions::default(), &cancel)
        .await
        .unwrap();
    assert_eq!(first.len(), 1);

    let second = client
        .claim(
            STREAM,
            GROUP,
            "c2",
            ClaimOptions::blocking_for(Duration::from_millis(50)),
            &cancel,
        )
        .await
        .unwrap();
    assert!(second.is_empty());
}

// ==================== Blocking / Cancellation ====================

#[tokio::test]
async fn test_blocking_claim_wakes_on_append() {
    let (db, _temp_dir) = setup_test_db().await;
    // Long wake interval: only the in-process signal can wake the claim in time.
    let client = StreamClient::new(db).with_wake_interval(Duration::from_secs(60));
    client.ensure_group(STREAM, GROUP, true).await.unwrap();

    let claimer = client.clone();
    let handle = tokio::spawn(async move {
        claimer
            .claim(STREAM, GROUP, "c1", ClaimOptions::default(), &CancellationToken::new())
            .await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    client.append(STREAM, &payload("late")).await.unwrap();

    let entries = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("claim should wake on append")
        .unwrap()
        .unwrap();
    assert_eq!(entries[0].field("id"), Some("late"));
}

#[tokio::test]
async fn test_cancelled_claim_returns_without_delivering() {
    let (db, _temp_dir) = setup_test_db().await;
    let client = StreamClient::new(db).with_wake_interval(Duration::from_secs(60));
    client.ensure_group(STREAM, GROUP, true).await.unwrap();

    let cancel = CancellationToken::new();
    let claimer = client.clone();
    let claim_cancel = cancel.clone();
    let handle = tokio::spawn(async move {
        claimer
            .claim(STREAM, GROUP, "c1", ClaimOptions::default(), &claim_cancel)
            .await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("cancelled claim should return promptly")
        .unwrap();
    assert!(matches!(result, Err(StreamError::Cancelled)));
    assert!(client.pending(STREAM, GROUP).await.unwrap().is_empty());

    // The cursor did not move: a later entry is still delivered.
    client.append(STREAM, &payload("after")).await.unwrap();
    let entries = client
        .claim(STREAM, GROUP, "c2", ClaimOptions::default(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(entries[0].field("id"), Some("after"));
}

// ==================== Reclaim ====================

#[tokio::test]
async fn test_reclaim_after_idle_reassigns_entry() {
    let (db, _temp_dir) = setup_test_db().await;
    let client = StreamClient::new(db);
    client.ensure_group(STREAM, GROUP, true).await.unwrap();
    client.append(STREAM, &payload("a")).await.unwrap();
    client
        .claim(STREAM, GROUP, "crashed", ClaimOptions::default(), &CancellationToken::new())
        .await
        .unwrap();

    let not_yet = client
        .reclaim_idle(
            STREAM,
            GROUP,
            "rescuer",
            ReclaimOptions {
                min_idle: Duration::from_secs(3600),
                max_deliveries: None,
                count: 10,
            },
        )
        .await
        .unwrap();
    assert!(not_yet.entries.is_empty());

    tokio::time::sleep(Duration::from_millis(30)).await;
    let reclaimed = client
        .reclaim_idle(
            STREAM,
            GROUP,
            "rescuer",
            ReclaimOptions {
                min_idle: Duration::from_millis(10),
                max_deliveries: None,
                count: 10,
            },
        )
        .await
        .unwrap();
    assert_eq!(reclaimed.entries.len(), 1);
    assert_eq!(reclaimed.entries[0].field("id"), Some("a"));

    let pending = client.pending(STREAM, GROUP).await.unwrap();
    assert_eq!(pending[0].consumer, "rescuer");
    assert_eq!(pending[0].delivery_count, 2);
}

#[tokio::test]
async fn test_reclaim_unknown_group_is_group_missing() {
    let (db, _temp_dir) = setup_test_db().await;
    let client = StreamClient::new(db);
    let err = client
        .reclaim_idle(
            STREAM,
            "nope",
            "c",
            ReclaimOptions {
                min_idle: Duration::ZERO,
                max_deliveries: None,
                count: 1,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StreamError::GroupMissing { .. }));
}

// ==================== Multiple processes ====================

#[tokio::test]
async fn test_two_pools_on_one_file_never_share_an_entry() {
    let (db, temp_dir) = setup_test_db().await;
    let producer = StreamClient::new(db);
    producer.ensure_group(STREAM, GROUP, true).await.unwrap();
    for i in 0..20 {
        producer.append(STREAM, &payload(&i.to_string())).await.unwrap();
    }

    let mut handles = Vec::new();
    for consumer in ["p1", "p2"] {
        let other = Database::new(&temp_dir.path().join("test.db")).await.unwrap();
        let client = StreamClient::new(other).with_wake_interval(Duration::from_millis(10));
        handles.push(tokio::spawn(async move {
            let mut seen = Vec::new();
            loop {
                let entries = client
                    .claim(
                        STREAM,
                        GROUP,
                        consumer,
                        ClaimOptions::blocking_for(Duration::from_millis(100)),
                        &CancellationToken::new(),
                    )
                    .await
                    .unwrap();
                if entries.is_empty() {
                    break;
                }
                seen.extend(entries.into_iter().map(|e| e.id));
            }
            seen
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }
    let unique: BTreeSet<_> = all.iter().copied().collect();
    assert_eq!(all.len(), 20, "every entry delivered exactly once");
    assert_eq!(unique.len(), 20);
}

// ==================== Malformed payloads ====================

#[tokio::test]
async fn test_undecodable_fields_delivered_empty() {
    let (db, _temp_dir) = setup_test_db().await;
    let client = StreamClient::new(db.clone());
    client.ensure_group(STREAM, GROUP, true).await.unwrap();

    sqlx::query("INSERT INTO stream_entries (stream, fields) VALUES (?, 'not json')")
        .bind(STREAM)
        .execute(db.pool())
        .await
        .unwrap();

    let entries = client
        .claim(STREAM, GROUP, "c1", ClaimOptions::default(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].fields.is_empty());
    assert_eq!(client.pending(STREAM, GROUP).await.unwrap().len(), 1);
}
