//! Process-wide settings, fixed at start-up.

use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Where blobs are read from and written to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum Backend {
    /// S3-compatible object store: put now, get later.
    #[value(alias = "S3", alias = "s3")]
    ObjectStore,
    /// Push straight to a transfer sink that hands out tokens.
    #[value(alias = "XDT", alias = "xdt")]
    PointToPoint,
}

/// Serialization format of a shuffle bucket.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum Codec {
    #[default]
    Parquet,
    Json,
}

#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub backend: Backend,
    pub region: String,
    /// Custom S3 endpoint, e.g. a MinIO server.
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// Address of the transfer sink for [`Backend::PointToPoint`].
    pub transfer_addr: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: Backend::ObjectStore,
            region: "us-west-1".into(),
            endpoint: None,
            access_key: None,
            secret_key: None,
            transfer_addr: "127.0.0.1:50052".into(),
        }
    }
}

/// Knobs of the map engine.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Prepended to every source key before it is fetched.
    pub input_prefix: String,
    /// Root of the shuffle layout, without a trailing slash.
    pub output_prefix: String,
    /// Cap on concurrent source reads.
    pub max_readers: usize,
    /// Cap on concurrent shuffle writes. The pool never exceeds the bucket count.
    pub max_writers: usize,
    /// Overall time budget of one map task.
    pub deadline: Duration,
    pub retry: RetryPolicy,
    pub codec: Codec,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            input_prefix: String::new(),
            output_prefix: "task/reducer-shard".into(),
            max_readers: 8,
            max_writers: 16,
            deadline: Duration::from_secs(300),
            retry: RetryPolicy::default(),
            codec: Codec::Parquet,
        }
    }
}
