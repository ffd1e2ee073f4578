use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use mrmap::blobstore::{Blobstore, MemoryBlobstore, SharedBlobstore, StoreError};
use mrmap::codec::decode_bucket;
use mrmap::config::{Codec, EngineConfig};
use mrmap::engine::MapEngine;
use mrmap::error::MapError;
use mrmap::partition::bucket_for;
use mrmap::retry::RetryPolicy;
use mrmap::shuffle::{reducer_prefix, shard_key};
use mrmap::{Bucket, MapRequest, MapStatus};
use tokio_test::{assert_err, assert_ok};

const SRC: &str = "input-bucket";
const DST: &str = "shuffle-bucket";

fn config() -> EngineConfig {
    EngineConfig {
        retry: RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
        ..EngineConfig::default()
    }
}

fn request(job: &str, mapper: &str, keys: &[&str], reducers: u32) -> MapRequest {
    MapRequest {
        source_container: SRC.into(),
        dest_container: DST.into(),
        source_keys: keys.iter().map(|k| k.to_string()).collect(),
        job_id: job.into(),
        mapper_id: mapper.into(),
        reducer_count: reducers,
    }
}

async fn read_buckets(store: &dyn Blobstore, handles: &[String]) -> Vec<Bucket> {
    let mut buckets = Vec::new();
    for handle in handles {
        let data = store.get(DST, handle).await.unwrap();
        buckets.push(decode_bucket(Codec::Parquet, data).unwrap());
    }
    buckets
}

/// Delegates to a memory store, failing puts for one bucket and delaying
/// gets and puts by `get_delay` and `put_delay`.
struct FaultyStore {
    inner: MemoryBlobstore,
    fail_bucket: Option<usize>,
    get_delay: Duration,
    put_delay: Duration,
    puts: AtomicUsize,
}

impl FaultyStore {
    fn new(inner: MemoryBlobstore) -> Self {
        Self {
            inner,
            fail_bucket: None,
            get_delay: Duration::ZERO,
            put_delay: Duration::ZERO,
            puts: AtomicUsize::new(0),
        }
    }
}

#[tonic::async_trait]
impl Blobstore for FaultyStore {
    async fn get(&self, container: &str, key: &str) -> Result<Bytes, StoreError> {
        tokio::time::sleep(self.get_delay).await;
        self.inner.get(container, key).await
    }

    async fn put(&self, container: &str, key: &str, data: Bytes) -> Result<String, StoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.put_delay).await;
        if let Some(bucket) = self.fail_bucket {
            if key.contains(&format!("/shuffle_{bucket}/")) {
                return Err(StoreError::Unavailable("503 Slow Down".into()));
            }
        }
        self.inner.put(container, key, data).await
    }

    fn name(&self) -> &'static str {
        "faulty"
    }
}

#[tokio::test]
async fn end_to_end_scenario() {
    let store = Arc::new(MemoryBlobstore::new());
    store.insert(SRC, "shard-0", "aaaaaaaa01,x,y,10\naaaaaaaa02,x,y,5\nbbbbbbbb01,x,y,3\n");
    let engine = MapEngine::new(store.clone(), store.clone(), config());

    let outcome = assert_ok!(engine.run_map(&request("1", "0", &["shard-0"], 2)).await);
    assert_eq!(outcome.records_processed, 3);
    assert_eq!(outcome.parse_errors, 0);
    assert_eq!(outcome.handles.len(), 2);
    assert_eq!(outcome.handles[0], "task/reducer-shard/job_1/shuffle_0/map_0");
    assert_eq!(outcome.handles[1], "task/reducer-shard/job_1/shuffle_1/map_0");

    let buckets = read_buckets(store.as_ref(), &outcome.handles).await;
    let mut merged = HashMap::new();
    for (index, bucket) in buckets.iter().enumerate() {
        for (key, sum) in bucket {
            assert_eq!(bucket_for(key, 2), index);
            merged.insert(key.clone(), *sum);
        }
    }
    assert_eq!(merged, HashMap::from([("aaaaaaaa".to_string(), 15.0), ("bbbbbbbb".to_string(), 3.0)]));
}

#[tokio::test]
async fn sums_span_shards_and_skip_malformed_lines() {
    let store = Arc::new(MemoryBlobstore::new());
    store.insert(SRC, "artemiy/a", "10.0.0.1:1,a,b,1.5\n10.0.0.2:1,a,b,2\nbroken line\n");
    store.insert(SRC, "artemiy/b", "10.0.0.1:2,a,b,2.5\n10.0.0.3:1,a,b,x\n10.0.0.3:2,a,b,4\n");
    let engine = MapEngine::new(
        store.clone(),
        store.clone(),
        EngineConfig {
            input_prefix: "artemiy/".into(),
            ..config()
        },
    );

    let outcome = assert_ok!(engine.run_map(&request("2", "m", &["a", "b"], 3)).await);
    assert_eq!(outcome.records_processed, 6);
    assert_eq!(outcome.parse_errors, 2);
    assert_eq!(outcome.sources_read, 2);

    let buckets = read_buckets(store.as_ref(), &outcome.handles).await;
    assert_eq!(
        buckets[0],
        Bucket::from([("10.0.0.1".to_string(), 4.0), ("10.0.0.2".to_string(), 2.0)])
    );
    assert_eq!(buckets[1], Bucket::from([("10.0.0.3".to_string(), 4.0)]));
    assert_eq!(buckets[2], Bucket::new());
}

#[tokio::test]
async fn rerun_overwrites_with_identical_content() {
    let store = Arc::new(MemoryBlobstore::new());
    store.insert(SRC, "s", "key-0001,a,b,1\nkey-0002,a,b,2\nkey-0003,a,b,3\nkey-0004,a,b,4\n");
    let engine = MapEngine::new(store.clone(), store.clone(), config());
    let req = request("3", "m0", &["s"], 5);

    let first = assert_ok!(engine.run_map(&req).await);
    let snapshot: Vec<Bytes> = {
        let mut out = Vec::new();
        for handle in &first.handles {
            out.push(store.get(DST, handle).await.unwrap());
        }
        out
    };
    let second = assert_ok!(engine.run_map(&req).await);
    assert_eq!(first.handles, second.handles);
    for (handle, before) in second.handles.iter().zip(snapshot) {
        assert_eq!(store.get(DST, handle).await.unwrap(), before);
    }
    // One input shard plus five buckets: nothing was duplicated.
    assert_eq!(store.len(), 6);
}

#[tokio::test]
async fn mappers_of_one_job_do_not_collide() {
    let store = Arc::new(MemoryBlobstore::new());
    store.insert(SRC, "p0", "aaaaaaaa,a,b,1\n");
    store.insert(SRC, "p1", "aaaaaaaa,a,b,2\n");
    let engine = Arc::new(MapEngine::new(store.clone(), store.clone(), config()));

    let (req_a, req_b) = (request("4", "0", &["p0"], 2), request("4", "1", &["p1"], 2));
    let (a, b) = tokio::join!(engine.run_map(&req_a), engine.run_map(&req_b));
    let (a, b) = (assert_ok!(a), assert_ok!(b));
    for i in 0..2 {
        assert_ne!(a.handles[i], b.handles[i]);
    }

    let bucket = bucket_for("aaaaaaaa", 2);
    let shards = store.keys_with_prefix(DST, &reducer_prefix("task/reducer-shard", "4", bucket));
    assert_eq!(
        shards,
        vec![
            shard_key("task/reducer-shard", "4", bucket, "0"),
            shard_key("task/reducer-shard", "4", bucket, "1"),
        ]
    );
}

#[tokio::test]
async fn unreadable_source_fails_without_output() {
    let store = Arc::new(MemoryBlobstore::new());
    store.insert(SRC, "present", "aaaaaaaa,a,b,1\n");
    let engine = MapEngine::new(store.clone(), store.clone(), config());

    let err = assert_err!(engine.run_map(&request("5", "0", &["present", "gone"], 2)).await);
    assert_eq!(err, MapError::NotFound { keys: vec!["gone".into()] });
    assert!(store.keys_with_prefix(DST, "").is_empty());

    let reply = engine.reply(&request("5", "0", &["present", "gone"], 2), None).await;
    assert_eq!(reply.status, MapStatus::Failure);
    assert!(reply.bucket_handles.is_empty());
}

#[tokio::test]
async fn one_failed_write_fails_the_task() {
    let source = MemoryBlobstore::new();
    source.insert(SRC, "s", "key-0001,a,b,1\nkey-0002,a,b,2\n");
    let store = Arc::new(FaultyStore {
        fail_bucket: Some(1),
        ..FaultyStore::new(source)
    });
    let shared: SharedBlobstore = store.clone();
    let engine = MapEngine::new(shared.clone(), shared, config());

    let reply = engine.reply(&request("6", "0", &["s"], 4), None).await;
    assert_eq!(reply.status, MapStatus::Failure);
    assert!(reply.bucket_handles.is_empty());
    assert_eq!(reply.failed_buckets, vec![1]);
    // Three buckets written once, bucket 1 tried three times.
    assert_eq!(store.puts.load(Ordering::SeqCst), 3 + 3);
}

#[tokio::test]
async fn deadline_cancels_outstanding_reads() {
    let source = MemoryBlobstore::new();
    source.insert(SRC, "s", "aaaaaaaa,a,b,1\n");
    let store = Arc::new(FaultyStore {
        get_delay: Duration::from_secs(5),
        ..FaultyStore::new(source)
    });
    let shared: SharedBlobstore = store.clone();
    let engine = MapEngine::new(shared.clone(), shared, config());

    let started = std::time::Instant::now();
    let err = assert_err!(
        engine
            .run_map_within(&request("7", "0", &["s"], 2), Duration::from_millis(50))
            .await
    );
    assert_eq!(err, MapError::DeadlineExceeded(Duration::from_millis(50)));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(store.puts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn deadline_cancels_outstanding_writes() {
    let source = MemoryBlobstore::new();
    source.insert(SRC, "s", "key-0001,a,b,1\nkey-0002,a,b,2\n");
    let store = Arc::new(FaultyStore {
        put_delay: Duration::from_secs(5),
        ..FaultyStore::new(source)
    });
    let shared: SharedBlobstore = store.clone();
    let engine = MapEngine::new(shared.clone(), shared, config());
    let req = request("7", "1", &["s"], 3);

    let started = std::time::Instant::now();
    let reply = engine.reply(&req, Some(Duration::from_millis(100))).await;
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(reply.status, MapStatus::Failure);
    assert!(reply.bucket_handles.is_empty());
    assert!(reply.error_detail.unwrap().contains("deadline"));
    // Every bucket reached the store before the deadline fired.
    assert_eq!(store.puts.load(Ordering::SeqCst), 3);

    let err = assert_err!(engine.run_map_within(&req, Duration::from_millis(100)).await);
    assert_eq!(err, MapError::DeadlineExceeded(Duration::from_millis(100)));

    // The aborted puts never completed, so no shard was stored.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(store.inner.keys_with_prefix(DST, "").is_empty());
}

#[tokio::test]
async fn json_codec_refuses_non_finite_sums() {
    let store = Arc::new(MemoryBlobstore::new());
    store.insert(SRC, "s", "aaaaaaaa,x,y,1e308\naaaaaaaa,x,y,1e308\nbbbbbbbb,x,y,nan\nbbbbbbbb,x,y,1\n");
    let json = MapEngine::new(
        store.clone(),
        store.clone(),
        EngineConfig {
            codec: Codec::Json,
            ..config()
        },
    );

    let reply = json.reply(&request("9", "0", &["s"], 2), None).await;
    assert_eq!(reply.status, MapStatus::Failure);
    assert!(reply.bucket_handles.is_empty());
    assert!(reply.error_detail.unwrap().contains("not finite"));
    assert!(store.keys_with_prefix(DST, "").is_empty());

    // Parquet stores the overflowed sum as-is; the NaN record was skipped.
    let parquet = MapEngine::new(store.clone(), store.clone(), config());
    let outcome = assert_ok!(parquet.run_map(&request("9", "0", &["s"], 2)).await);
    assert_eq!(outcome.parse_errors, 1);
    let merged: Bucket = read_buckets(store.as_ref(), &outcome.handles).await.into_iter().flatten().collect();
    assert_eq!(merged["aaaaaaaa"], f64::INFINITY);
    assert_eq!(merged["bbbbbbbb"], 1.0);
}

#[tokio::test]
async fn json_codec_round_trips_through_engine() {
    let store = Arc::new(MemoryBlobstore::new());
    store.insert(SRC, "s", "aaaaaaaa01,x,y,10\n");
    let engine = MapEngine::new(
        store.clone(),
        store.clone(),
        EngineConfig {
            codec: Codec::Json,
            ..config()
        },
    );
    let outcome = assert_ok!(engine.run_map(&request("8", "0", &["s"], 1)).await);
    let data = store.get(DST, &outcome.handles[0]).await.unwrap();
    assert_eq!(&data[..], br#"{"aaaaaaaa":10.0}"#);
}
