//! Shuffle writer: persists the reducer buckets of one map task.
//!
//! Shard layout, stable across releases since reducers derive it on their
//! own:
//!
//! ```text
//! {dest_container}/{output_prefix}/job_{job_id}/shuffle_{bucket}/map_{mapper_id}
//! ```
//!
//! Re-running a mapper overwrites its own shards, two mappers of a job never
//! share a key, and a reducer finds all shards for bucket `i` under
//! `{output_prefix}/job_{job_id}/shuffle_{i}/`.

use std::sync::Arc;

use itertools::Itertools;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, Instrument};

use crate::blobstore::{SharedBlobstore, StoreError};
use crate::codec::encode_bucket;
use crate::config::{Codec, EngineConfig};
use crate::error::{MapError, Result};
use crate::retry::RetryPolicy;
use crate::{Bucket, BucketIndex};

/// Prefix under which reducer `bucket` finds the shards of every mapper.
pub fn reducer_prefix(output_prefix: &str, job_id: &str, bucket: BucketIndex) -> String {
    let tail = format!("job_{job_id}/shuffle_{bucket}/");
    match output_prefix.trim_end_matches('/') {
        "" => tail,
        root => format!("{root}/{tail}"),
    }
}

/// Key of the shard mapper `mapper_id` writes for reducer `bucket`.
pub fn shard_key(output_prefix: &str, job_id: &str, bucket: BucketIndex, mapper_id: &str) -> String {
    format!("{}map_{mapper_id}", reducer_prefix(output_prefix, job_id, bucket))
}

pub struct ShuffleWriter {
    store: SharedBlobstore,
    output_prefix: String,
    max_writers: usize,
    retry: RetryPolicy,
    codec: Codec,
}

impl ShuffleWriter {
    pub fn new(store: SharedBlobstore, config: &EngineConfig) -> Self {
        Self {
            store,
            output_prefix: config.output_prefix.clone(),
            max_writers: config.max_writers,
            retry: config.retry,
            codec: config.codec,
        }
    }

    /// Writes every bucket and returns their handles in bucket order.
    ///
    /// Writes run in parallel on a pool of at most `max_writers` tasks.
    /// All writes are awaited; if any of them still fails after retrying,
    /// the call fails with [`MapError::PartialWriteFailure`] naming every
    /// failed bucket and no handle is returned.
    pub async fn write(
        &self,
        buckets: &[Bucket],
        dest_container: &str,
        job_id: &str,
        mapper_id: &str,
    ) -> Result<Vec<String>> {
        let n = buckets.len();
        let pool = self.max_writers.clamp(1, n.max(1));
        let permits = Arc::new(Semaphore::new(pool));
        let mut tasks = JoinSet::new();
        // Every bucket is encoded before the first put, so a bucket that
        // cannot be encoded leaves nothing behind.
        let encoded = buckets
            .iter()
            .map(|bucket| encode_bucket(self.codec, bucket))
            .collect::<Result<Vec<_>>>()?;
        debug!(buckets = n, pool, "starting shuffle writes");

        for (index, data) in encoded.into_iter().enumerate() {
            let key = shard_key(&self.output_prefix, job_id, index, mapper_id);
            let store = self.store.clone();
            let permits = permits.clone();
            let container = dest_container.to_string();
            let retry = self.retry;
            let span = info_span!("put", bucket = index, key = %key, len = data.len());
            tasks.spawn(
                async move {
                    let _permit = permits.acquire_owned().await;
                    let written = retry
                        .run(&key, || store.put(&container, &key, data.clone()))
                        .await;
                    (index, written)
                }
                .instrument(span),
            );
        }

        let mut handles: Vec<Option<String>> = vec![None; n];
        let mut failures: Vec<(BucketIndex, StoreError)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(handle))) => handles[index] = Some(handle),
                Ok((index, Err(err))) => {
                    error!(bucket = index, error = %err, "shuffle write failed");
                    failures.push((index, err));
                }
                Err(e) => error!("shuffle writer task failed: {e}"),
            }
        }
        // A writer that panicked left its slot empty without reporting.
        for (index, handle) in handles.iter().enumerate() {
            if handle.is_none() && !failures.iter().any(|(i, _)| *i == index) {
                failures.push((index, StoreError::Unavailable("writer task aborted".into())));
            }
        }

        if !failures.is_empty() {
            failures.sort_by_key(|(index, _)| *index);
            let detail = failures
                .iter()
                .map(|(index, err)| format!("bucket {index}: {err}"))
                .join("; ");
            return Err(MapError::PartialWriteFailure {
                buckets: failures.into_iter().map(|(index, _)| index).collect(),
                detail,
            });
        }

        info!(buckets = n, store = self.store.name(), "shuffle written");
        Ok(handles.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobstore::{Blobstore, MemoryBlobstore};
    use crate::codec::decode_bucket;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Fails every put whose key contains `needle`, counting attempts.
    struct FailingStore {
        inner: MemoryBlobstore,
        needle: String,
        attempts: AtomicUsize,
    }

    #[tonic::async_trait]
    impl Blobstore for FailingStore {
        async fn get(&self, container: &str, key: &str) -> std::result::Result<Bytes, StoreError> {
            self.inner.get(container, key).await
        }

        async fn put(&self, container: &str, key: &str, data: Bytes) -> std::result::Result<String, StoreError> {
            if key.contains(&self.needle) {
                self.attempts.fetch_add(1, Ordering::SeqCst);
                return Err(StoreError::Unavailable("connection reset".into()));
            }
            self.inner.put(container, key, data).await
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    /// Sleeps longer for lower bucket indices and tracks peak concurrency.
    #[derive(Default)]
    struct SlowStore {
        inner: MemoryBlobstore,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[tonic::async_trait]
    impl Blobstore for SlowStore {
        async fn get(&self, container: &str, key: &str) -> std::result::Result<Bytes, StoreError> {
            self.inner.get(container, key).await
        }

        async fn put(&self, container: &str, key: &str, data: Bytes) -> std::result::Result<String, StoreError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let bucket: u64 = key.split("shuffle_").nth(1).and_then(|s| s.split('/').next()).unwrap().parse().unwrap();
            tokio::time::sleep(Duration::from_millis(40 - bucket * 5)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(format!("handle-{bucket}-{}", self.inner.put(container, key, data).await?))
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    fn config(max_writers: usize) -> EngineConfig {
        EngineConfig {
            max_writers,
            retry: RetryPolicy {
                attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
            ..EngineConfig::default()
        }
    }

    fn buckets(n: usize) -> Vec<Bucket> {
        (0..n).map(|i| Bucket::from([(format!("key{i}"), i as f64)])).collect()
    }

    #[test]
    fn layout() {
        assert_eq!(
            shard_key("task/reducer-shard", "42", 3, "m7"),
            "task/reducer-shard/job_42/shuffle_3/map_m7"
        );
        assert_eq!(shard_key("", "42", 0, "m7"), "job_42/shuffle_0/map_m7");
        assert_eq!(reducer_prefix("out/", "42", 1), "out/job_42/shuffle_1/");
    }

    #[tokio::test]
    async fn writes_every_bucket_under_its_key() {
        let store = Arc::new(MemoryBlobstore::new());
        let writer = ShuffleWriter::new(store.clone(), &config(16));
        let mut input = buckets(3);
        input.push(Bucket::new());

        let handles = writer.write(&input, "dst", "job1", "m0").await.unwrap();
        assert_eq!(handles.len(), 4);
        for (i, handle) in handles.iter().enumerate() {
            assert_eq!(handle, &shard_key("task/reducer-shard", "job1", i, "m0"));
            let data = store.get("dst", handle).await.unwrap();
            assert_eq!(decode_bucket(Codec::Parquet, data).unwrap(), input[i]);
        }
    }

    #[tokio::test]
    async fn handles_follow_bucket_order_and_pool_is_bounded() {
        let store = Arc::new(SlowStore::default());
        let writer = ShuffleWriter::new(store.clone(), &config(3));

        let handles = writer.write(&buckets(6), "dst", "j", "m").await.unwrap();
        let expected: Vec<String> = (0..6)
            .map(|i| format!("handle-{i}-{}", shard_key("task/reducer-shard", "j", i, "m")))
            .collect();
        assert_eq!(handles, expected);
        assert!(store.peak.load(Ordering::SeqCst) <= 3);
        assert!(store.peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn failed_bucket_is_reported_after_retries() {
        let store = Arc::new(FailingStore {
            inner: MemoryBlobstore::new(),
            needle: "shuffle_2/".into(),
            attempts: AtomicUsize::new(0),
        });
        let writer = ShuffleWriter::new(store.clone(), &config(4));

        let err = writer.write(&buckets(4), "dst", "j", "m").await.unwrap_err();
        match err {
            MapError::PartialWriteFailure { buckets, detail } => {
                assert_eq!(buckets, vec![2]);
                assert!(detail.contains("bucket 2"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn rewrite_is_idempotent() {
        let store = Arc::new(MemoryBlobstore::new());
        let writer = ShuffleWriter::new(store.clone(), &config(2));
        let first = writer.write(&buckets(2), "dst", "j", "m").await.unwrap();
        let before = store.get("dst", &first[1]).await.unwrap();
        let second = writer.write(&buckets(2), "dst", "j", "m").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("dst", &second[1]).await.unwrap(), before);
    }
}
