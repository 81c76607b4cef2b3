//! Shared fixtures for engine integration tests

#![allow(dead_code)]

use std::time::Duration;

use strata_kv_engine::{Bucket, BucketOptions, Watch};
use strata_kv_core::Entry;
use strata_kv_storage::{MemoryLog, MemoryLogConfig};

/// Upper bound on any single wait in these tests
pub const WAIT: Duration = Duration::from_secs(2);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A fresh log and a bucket on it
pub async fn new_bucket(name: &str, options: BucketOptions) -> (MemoryLog, Bucket) {
    bucket_on(MemoryLog::default(), name, options).await
}

pub async fn bucket_on(log: MemoryLog, name: &str, options: BucketOptions) -> (MemoryLog, Bucket) {
    init_tracing();
    let bucket = Bucket::create(log.connection(), name, options).await.unwrap();
    (log, bucket)
}

pub fn log_with(config: MemoryLogConfig) -> MemoryLog {
    MemoryLog::new(config)
}

/// Next entry, failing the test if none arrives in time
pub async fn next_entry(watch: &mut Watch) -> Entry {
    tokio::time::timeout(WAIT, watch.next())
        .await
        .expect("timed out waiting for entry")
        .expect("feed failed")
        .expect("feed closed")
}

/// Assert nothing is delivered for a short while
pub async fn assert_quiet(watch: &mut Watch) {
    let res = tokio::time::timeout(Duration::from_millis(100), watch.next()).await;
    assert!(res.is_err(), "unexpected delivery: {:?}", res);
}

/// Collect a feed to completion
pub async fn drain(watch: Watch) -> Vec<Entry> {
    tokio::time::timeout(WAIT, watch.collect())
        .await
        .expect("timed out draining feed")
        .expect("feed failed")
}
