//! The map stage of a distributed MapReduce benchmark.
//!
//! A mapper receives a list of input shards, sums a numeric field per
//! partition key, splits the aggregate into one bucket per reducer and
//! writes each bucket to a shared blobstore, where reducers pick up their
//! designated shard. Storage is either an S3-compatible object store or a
//! point-to-point transfer service.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hasher;

pub mod aggregate;
pub mod blobstore;
pub mod cmd;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod partition;
pub mod reader;
pub mod retry;
pub mod service;
pub mod shuffle;
pub mod utils;

pub mod proto {
    tonic::include_proto!("mapreduce");
}

/////////////////////////////////////////////////////////////////////////////
// Map stage types
/////////////////////////////////////////////////////////////////////////////

/// Running sum of the measure field, keyed by partition key.
pub type Accumulator = HashMap<String, f64>;

/// The slice of the aggregate destined for a single reducer.
pub type Bucket = HashMap<String, f64>;

/// Index of a reducer bucket, `0..reducer_count`.
pub type BucketIndex = usize;

/// A single map task.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapRequest {
    /// Container (bucket) the input shards live in.
    pub source_container: String,
    /// Container the shuffle buckets are written to.
    pub dest_container: String,
    /// Input shards, read in this order.
    pub source_keys: Vec<String>,
    pub job_id: String,
    pub mapper_id: String,
    /// Number of reducers, and so the number of buckets produced.
    pub reducer_count: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MapStatus {
    Success,
    Failure,
}

/// Terminal outcome of one map task.
///
/// On success `bucket_handles[i]` is the location of reducer `i`'s shard.
/// On failure there are no handles at all.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapReply {
    pub status: MapStatus,
    pub bucket_handles: Vec<String>,
    pub records_processed: u64,
    pub parse_errors: u64,
    pub sources_read: u64,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub failed_buckets: Vec<BucketIndex>,
}

impl MapReply {
    /// A failed reply. Counters are kept for diagnostics, handles never are.
    pub fn failure(err: &error::MapError, elapsed_ms: u64) -> Self {
        Self {
            status: MapStatus::Failure,
            bucket_handles: Vec::new(),
            records_processed: 0,
            parse_errors: 0,
            sources_read: 0,
            elapsed_ms,
            error_detail: Some(err.to_string()),
            failed_buckets: err.failed_buckets().to_vec(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == MapStatus::Success
    }
}

impl From<proto::MapRequest> for MapRequest {
    fn from(req: proto::MapRequest) -> Self {
        Self {
            source_container: req.source_container,
            dest_container: req.dest_container,
            source_keys: req.source_keys,
            job_id: req.job_id,
            mapper_id: req.mapper_id,
            reducer_count: req.reducer_count,
        }
    }
}

impl From<MapReply> for proto::MapReply {
    fn from(reply: MapReply) -> Self {
        let status = match reply.status {
            MapStatus::Success => proto::MapStatus::Success,
            MapStatus::Failure => proto::MapStatus::Failure,
        };
        Self {
            status: status as i32,
            bucket_handles: reply.bucket_handles,
            records_processed: reply.records_processed,
            parse_errors: reply.parse_errors,
            error_detail: reply.error_detail.unwrap_or_default(),
            failed_buckets: reply.failed_buckets.into_iter().map(|i| i as u32).collect(),
            sources_read: reply.sources_read,
            elapsed_ms: reply.elapsed_ms,
        }
    }
}

/// Hashes a partition key with 64-bit FNV-1a over its UTF-8 bytes.
///
/// Reducers written in any language can recompute the bucket of a key as
/// `ihash(key) % reducer_count`. The standard FNV offset basis
/// (`0xcbf29ce484222325`) and prime (`0x100000001b3`) are used.
pub fn ihash(key: &[u8]) -> u64 {
    let mut hasher = fnv::FnvHasher::default();
    hasher.write(key);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ihash_matches_fnv1a_reference_vectors() {
        assert_eq!(ihash(b""), 0xcbf29ce484222325);
        assert_eq!(ihash(b"a"), 0xaf63dc4c8601ec8c);
        assert_eq!(ihash("aaaaaaaa".as_bytes()), 0x05f43545f9e846cd);
    }

    #[test]
    fn proto_reply_keeps_bucket_order() {
        let reply = MapReply {
            status: MapStatus::Success,
            bucket_handles: vec!["b0".into(), "b1".into(), "b2".into()],
            records_processed: 3,
            parse_errors: 1,
            sources_read: 1,
            elapsed_ms: 7,
            error_detail: None,
            failed_buckets: vec![],
        };
        let wire = proto::MapReply::from(reply);
        assert_eq!(wire.status, proto::MapStatus::Success as i32);
        assert_eq!(wire.bucket_handles, vec!["b0", "b1", "b2"]);
        assert!(wire.error_detail.is_empty());
    }
}
