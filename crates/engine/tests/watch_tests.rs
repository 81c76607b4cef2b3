//! Change feed tests: history bounds, live watches, protocol traffic and
//! termination

mod common;

use std::time::Duration;

use bytes::Bytes;
use common::*;
use strata_kv_core::{Error, LogError, Operation};
use strata_kv_engine::{BucketOptions, FeedState, WatchOptions};
use strata_kv_storage::MemoryLogConfig;
use strata_kv_wire::PurgeOptions;

// ============================================================================
// History
// ============================================================================

#[tokio::test]
async fn history_delivers_exactly_the_pending_records() {
    let (log, bucket) = new_bucket("b", BucketOptions::default().with_history(10)).await;
    let mut seqs = Vec::new();
    for (k, v) in [("a", "1"), ("b", "2"), ("a", "3"), ("c", "4")] {
        seqs.push(bucket.put(k, v).await.unwrap());
    }

    let watch = bucket.history(WatchOptions::default()).await.unwrap();
    // writes after the feed starts are outside the replay
    bucket.put("a", "late").await.unwrap();
    bucket.put("d", "late").await.unwrap();

    let entries = drain(watch).await;
    let got: Vec<u64> = entries.iter().map(|e| e.seq).collect();
    assert_eq!(got, seqs);
    assert!(entries.iter().all(|e| e.delta.is_none()));
    assert_eq!(log.acks(), 4);
}

#[tokio::test]
async fn history_of_empty_bucket_is_closed() {
    let (_, bucket) = new_bucket("b", BucketOptions::default()).await;
    let mut watch = bucket.history(WatchOptions::default()).await.unwrap();
    assert_eq!(watch.state(), FeedState::Closed);
    assert!(watch.next().await.unwrap().is_none());
    assert_eq!(watch.received(), 0);
}

#[tokio::test]
async fn history_of_one_key_counts_down_delta() {
    let (_, bucket) = new_bucket("b", BucketOptions::default().with_history(10)).await;
    bucket.put("k", "1").await.unwrap();
    bucket.put("other", "x").await.unwrap();
    bucket.put("k", "2").await.unwrap();
    bucket.delete("k").await.unwrap();

    let entries = drain(bucket.history(WatchOptions::key("k")).await.unwrap()).await;
    let deltas: Vec<Option<u64>> = entries.iter().map(|e| e.delta).collect();
    assert_eq!(deltas, vec![Some(2), Some(1), Some(0)]);
    assert_eq!(entries[0].value, Bytes::from("1"));
    assert_eq!(entries[2].operation, Operation::Del);
    assert!(entries.iter().all(|e| e.key == "k"));
}

#[tokio::test]
async fn history_respects_retention() {
    let (_, bucket) = new_bucket("b", BucketOptions::default().with_history(2)).await;
    for v in ["1", "2", "3"] {
        bucket.put("k", v).await.unwrap();
    }
    let entries = drain(bucket.history(WatchOptions::key("k")).await.unwrap()).await;
    let values: Vec<Bytes> = entries.into_iter().map(|e| e.value).collect();
    assert_eq!(values, vec![Bytes::from("2"), Bytes::from("3")]);
}

#[tokio::test]
async fn history_ends_when_pending_records_are_purged() {
    let (log, bucket) = new_bucket("b", BucketOptions::default().with_history(5)).await;
    bucket.put("a", "1").await.unwrap();
    bucket.put("b", "2").await.unwrap();

    let watch = bucket.history(WatchOptions::default()).await.unwrap();
    let purged = bucket.purge(PurgeOptions::default()).await.unwrap().purged;
    assert_eq!(purged, 2);

    assert!(drain(watch).await.is_empty());
    assert_eq!(log.acks(), 0);
}

#[tokio::test]
async fn history_ends_when_one_key_is_purged_mid_replay() {
    let (_, bucket) = new_bucket("b", BucketOptions::default().with_history(5)).await;
    let a = bucket.put("a", "1").await.unwrap();
    bucket.put("b", "2").await.unwrap();
    let c = bucket.put("c", "3").await.unwrap();

    let watch = bucket.history(WatchOptions::default()).await.unwrap();
    bucket
        .purge(PurgeOptions {
            filter: Some("$KV.b.b".to_string()),
            ..PurgeOptions::default()
        })
        .await
        .unwrap();

    let seqs: Vec<u64> = drain(watch).await.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, vec![a, c]);
}

#[tokio::test]
async fn unclaimed_consumers_are_released() {
    let log = log_with(
        MemoryLogConfig::default().with_inactive_threshold(Duration::from_millis(50)),
    );
    let (log, bucket) = bucket_on(log, "b", BucketOptions::default()).await;
    for _ in 0..10 {
        let watch = bucket.history(WatchOptions::default()).await.unwrap();
        assert!(watch.is_terminated());
        assert!(bucket.keys().await.unwrap().is_empty());
    }
    assert_eq!(log.consumer_count("KV_b"), 20);

    tokio::time::timeout(WAIT, async {
        while log.consumer_count("KV_b") > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn history_rejects_misplaced_tail_wildcard() {
    let (_, bucket) = new_bucket("b", BucketOptions::default()).await;
    let err = bucket.history(WatchOptions::key("a.>.c")).await.unwrap_err();
    assert!(matches!(err, Error::InvalidKey(_)));
}

// ============================================================================
// Watch
// ============================================================================

#[tokio::test]
async fn watch_delivers_current_value_then_changes() {
    let (_, bucket) = new_bucket("b", BucketOptions::default()).await;
    let first = bucket.put("k", "v1").await.unwrap();

    let mut watch = bucket.watch(WatchOptions::key("k")).await.unwrap();
    let initial = next_entry(&mut watch).await;
    assert_eq!(initial.seq, first);
    assert_eq!(initial.delta, None);

    bucket.put("other", "x").await.unwrap();
    let second = bucket.put("k", "v2").await.unwrap();
    let third = bucket.delete("k").await.unwrap();

    let e = next_entry(&mut watch).await;
    assert_eq!((e.seq, e.value.clone()), (second, Bytes::from("v2")));
    let e = next_entry(&mut watch).await;
    assert_eq!((e.seq, e.operation), (third, Operation::Del));
    assert_quiet(&mut watch).await;
    assert_eq!(watch.state(), FeedState::Active);
}

#[tokio::test]
async fn watch_on_empty_key_waits_for_first_write() {
    let (_, bucket) = new_bucket("b", BucketOptions::default()).await;
    let mut watch = bucket.watch(WatchOptions::key("k")).await.unwrap();
    assert_quiet(&mut watch).await;

    bucket.put("k", "v").await.unwrap();
    assert_eq!(next_entry(&mut watch).await.value, Bytes::from("v"));
}

#[tokio::test]
async fn watch_all_keys_sees_latest_per_key() {
    let (_, bucket) = new_bucket("b", BucketOptions::default().with_history(5)).await;
    bucket.put("a", "1").await.unwrap();
    bucket.put("a", "2").await.unwrap();
    bucket.put("b", "3").await.unwrap();

    let mut watch = bucket.watch(WatchOptions::default()).await.unwrap();
    let a = next_entry(&mut watch).await;
    let b = next_entry(&mut watch).await;
    assert_eq!((a.key.as_str(), a.value.clone()), ("a", Bytes::from("2")));
    assert_eq!(b.key, "b");
    assert_quiet(&mut watch).await;
}

#[tokio::test]
async fn watch_with_single_token_wildcard() {
    let (_, bucket) = new_bucket("b", BucketOptions::default()).await;
    let mut watch = bucket.watch(WatchOptions::key("users.*")).await.unwrap();

    bucket.put("users.alice", "1").await.unwrap();
    bucket.put("users.alice.profile", "2").await.unwrap();
    bucket.put("groups.admin", "3").await.unwrap();
    bucket.put("users.bob", "4").await.unwrap();

    assert_eq!(next_entry(&mut watch).await.key, "users.alice");
    assert_eq!(next_entry(&mut watch).await.key, "users.bob");
    assert_quiet(&mut watch).await;
}

#[tokio::test]
async fn watch_decodes_encoded_keys() {
    let (_, bucket) = new_bucket("b", BucketOptions::default().with_key_codec("base64")).await;
    let mut watch = bucket.watch(WatchOptions::key("users.>")).await.unwrap();
    bucket.put("users.alice", "1").await.unwrap();
    assert_eq!(next_entry(&mut watch).await.key, "users.alice");
}

// ============================================================================
// Protocol traffic
// ============================================================================

#[tokio::test]
async fn flow_control_is_answered_and_not_surfaced() {
    let log = log_with(MemoryLogConfig::default().with_flow_control_every(2));
    let (log, bucket) = bucket_on(log, "b", BucketOptions::default().with_history(10)).await;
    for i in 0..5 {
        bucket.put(&format!("k{i}"), "v").await.unwrap();
    }

    let entries = drain(bucket.history(WatchOptions::default()).await.unwrap()).await;
    assert_eq!(entries.len(), 5);
    assert_eq!(log.flow_control_responses(), 2);
}

#[tokio::test]
async fn heartbeats_are_not_surfaced() {
    let log = log_with(MemoryLogConfig::default().with_idle_heartbeat(Duration::from_millis(10)));
    let (_, bucket) = bucket_on(log, "b", BucketOptions::default()).await;

    let mut watch = bucket.watch(WatchOptions::default()).await.unwrap();
    assert_quiet(&mut watch).await;
    assert_eq!(watch.received(), 0);

    bucket.put("k", "v").await.unwrap();
    assert_eq!(next_entry(&mut watch).await.key, "k");
}

// ============================================================================
// Termination
// ============================================================================

#[tokio::test]
async fn stop_drains_then_closes() {
    let (_, bucket) = new_bucket("b", BucketOptions::default()).await;
    bucket.put("k", "v").await.unwrap();

    let mut watch = bucket.watch(WatchOptions::default()).await.unwrap();
    next_entry(&mut watch).await;
    watch.stop();
    assert_eq!(watch.state(), FeedState::Draining);

    bucket.put("k", "after").await.unwrap();
    let rest = tokio::time::timeout(WAIT, watch.next()).await.unwrap().unwrap();
    assert!(rest.is_none());
    assert_eq!(watch.state(), FeedState::Closed);
}

#[tokio::test]
async fn abnormal_closure_fails_the_feed() {
    let (log, bucket) = new_bucket("b", BucketOptions::default()).await;
    let mut watch = bucket.watch(WatchOptions::default()).await.unwrap();

    log.fail_subscriptions("connection reset");
    let err = tokio::time::timeout(WAIT, watch.next())
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, Error::Log(LogError::Transport(ref m)) if m == "connection reset"));
    assert_eq!(watch.state(), FeedState::Failed);
    assert!(watch.next().await.unwrap().is_none());
}

#[tokio::test]
async fn deleted_consumer_fails_the_feed() {
    let (log, bucket) = new_bucket("b", BucketOptions::default()).await;
    bucket.put("k", "v").await.unwrap();
    let mut watch = bucket.watch(WatchOptions::default()).await.unwrap();
    next_entry(&mut watch).await;

    assert_eq!(log.delete_consumers("KV_b"), 1);
    let err = tokio::time::timeout(WAIT, watch.next())
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, Error::Log(LogError::Status { code: 409, .. })));
}

#[tokio::test]
async fn destroying_the_bucket_fails_live_watches() {
    let (_, bucket) = new_bucket("b", BucketOptions::default()).await;
    let mut watch = bucket.watch(WatchOptions::default()).await.unwrap();
    bucket.destroy().await.unwrap();

    let err = tokio::time::timeout(WAIT, watch.next())
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, Error::Log(LogError::Status { code: 409, .. })));
}

#[tokio::test]
async fn dropping_a_watch_releases_its_consumer() {
    let (log, bucket) = new_bucket("b", BucketOptions::default()).await;
    let watch = bucket.watch(WatchOptions::default()).await.unwrap();
    assert_eq!(log.consumer_count("KV_b"), 1);
    drop(watch);

    tokio::time::timeout(WAIT, async {
        while log.consumer_count("KV_b") > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}
