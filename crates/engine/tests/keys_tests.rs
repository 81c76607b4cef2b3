//! Key enumeration tests

mod common;

use std::collections::BTreeSet;

use common::*;
use strata_kv_engine::BucketOptions;
use strata_kv_storage::MemoryLogConfig;

async fn keys_of(bucket: &strata_kv_engine::Bucket) -> BTreeSet<String> {
    tokio::time::timeout(WAIT, bucket.keys())
        .await
        .unwrap()
        .unwrap()
        .into_iter()
        .collect()
}

fn set(keys: &[&str]) -> BTreeSet<String> {
    keys.iter().map(|k| k.to_string()).collect()
}

#[tokio::test]
async fn keys_lists_each_key_once() {
    let (_, bucket) = new_bucket("b", BucketOptions::default().with_history(5)).await;
    for (k, v) in [("a", "1"), ("b", "1"), ("a", "2"), ("c", "1"), ("a", "3")] {
        bucket.put(k, v).await.unwrap();
    }

    let keys = bucket.keys().await.unwrap();
    assert_eq!(keys.len(), 3);
    assert_eq!(keys_of(&bucket).await, set(&["a", "b", "c"]));
}

#[tokio::test]
async fn keys_of_empty_bucket() {
    let (_, bucket) = new_bucket("b", BucketOptions::default()).await;
    assert!(bucket.keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn keys_include_tombstoned_keys() {
    let (_, bucket) = new_bucket("b", BucketOptions::default()).await;
    bucket.put("a", "1").await.unwrap();
    bucket.put("b", "1").await.unwrap();
    bucket.delete("b").await.unwrap();
    assert_eq!(keys_of(&bucket).await, set(&["a", "b"]));
}

#[tokio::test]
async fn keys_are_decoded() {
    let (_, bucket) = new_bucket("b", BucketOptions::default().with_key_codec("base64")).await;
    bucket.put("users.alice", "1").await.unwrap();
    bucket.put("users.bob", "1").await.unwrap();
    assert_eq!(keys_of(&bucket).await, set(&["users.alice", "users.bob"]));
}

#[tokio::test]
async fn keys_survive_flow_control() {
    let log = log_with(MemoryLogConfig::default().with_flow_control_every(1));
    let (log, bucket) = bucket_on(log, "b", BucketOptions::default()).await;
    for i in 0..4 {
        bucket.put(&format!("k{i}"), "v").await.unwrap();
    }
    assert_eq!(keys_of(&bucket).await, set(&["k0", "k1", "k2", "k3"]));
    assert!(log.flow_control_responses() >= 3);
}

#[tokio::test]
async fn keys_release_their_consumer() {
    let (log, bucket) = new_bucket("b", BucketOptions::default()).await;
    bucket.put("a", "1").await.unwrap();
    keys_of(&bucket).await;

    tokio::time::timeout(WAIT, async {
        while log.consumer_count("KV_b") > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}
