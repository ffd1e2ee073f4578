//! Command line arguments of the binaries.
//!
//! Every option can also be set through the environment variable named in
//! its help text.

use std::sync::Arc;
use std::time::Duration;

use clap::Args;

use crate::blobstore::{self, SharedBlobstore};
use crate::config::{Backend, Codec, EngineConfig, StoreConfig};
use crate::retry::RetryPolicy;

pub mod ctl;
pub mod mapper;
pub mod standalone;
pub mod transfer;

/// Storage backend selection and connection settings.
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Backend the shuffle buckets are written to
    #[arg(long, value_enum, env = "TRANSFER_TYPE", default_value = "object-store")]
    pub backend: Backend,
    /// Backend the source shards are read from
    #[arg(long, value_enum, env = "SOURCE_BACKEND", default_value = "object-store")]
    pub source_backend: Backend,
    /// Region of the object store
    #[arg(long, env = "AWS_REGION", default_value = "us-west-1")]
    pub region: String,
    /// Custom object store endpoint, e.g. http://127.0.0.1:9000 for MinIO
    #[arg(long, env = "S3_ENDPOINT")]
    pub endpoint: Option<String>,
    #[arg(long, env = "AWS_ACCESS_KEY", hide_env_values = true)]
    pub access_key: Option<String>,
    #[arg(long, env = "AWS_SECRET_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,
    /// Address of the transfer sink for the point-to-point backend
    #[arg(long, env = "TRANSFER_ADDR", default_value = "127.0.0.1:50052")]
    pub transfer_addr: String,
}

impl StoreArgs {
    pub fn store_config(&self, backend: Backend) -> StoreConfig {
        StoreConfig {
            backend,
            region: self.region.clone(),
            endpoint: self.endpoint.clone(),
            access_key: self.access_key.clone(),
            secret_key: self.secret_key.clone(),
            transfer_addr: self.transfer_addr.clone(),
        }
    }

    /// Connects the source and shuffle stores. One client is shared when
    /// both use the same backend.
    pub async fn connect(&self) -> anyhow::Result<(SharedBlobstore, SharedBlobstore)> {
        let shuffle = blobstore::connect(&self.store_config(self.backend)).await?;
        if self.source_backend == self.backend {
            return Ok((Arc::clone(&shuffle), shuffle));
        }
        let source = blobstore::connect(&self.store_config(self.source_backend)).await?;
        Ok((source, shuffle))
    }
}

/// Map engine tuning.
#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
    /// Prefix prepended to every source key
    #[arg(long, env = "INPUT_PREFIX", default_value = "")]
    pub input_prefix: String,
    /// Root of the shuffle layout
    #[arg(long, env = "OUTPUT_PREFIX", default_value = "task/reducer-shard")]
    pub output_prefix: String,
    /// Maximum number of concurrent source reads
    #[arg(long, env = "MAX_SOURCE_READERS", default_value_t = 8)]
    pub max_readers: usize,
    /// Maximum number of concurrent shuffle writes
    #[arg(long, env = "MAX_SHUFFLE_WRITERS", default_value_t = 16)]
    pub max_writers: usize,
    /// Time budget of one map task, in seconds
    #[arg(long, env = "MAP_DEADLINE_SECS", default_value_t = 300)]
    pub deadline_secs: u64,
    /// Attempts per blobstore call, the first one included
    #[arg(long, env = "STORE_RETRIES", default_value_t = 3)]
    pub retries: u32,
    /// Initial retry backoff in milliseconds, doubled on every retry
    #[arg(long, env = "STORE_RETRY_BACKOFF_MS", default_value_t = 100)]
    pub retry_backoff_ms: u64,
    /// Encoding of the shuffle buckets
    #[arg(long, value_enum, env = "SHUFFLE_CODEC", default_value = "parquet")]
    pub codec: Codec,
}

impl EngineArgs {
    pub fn engine_config(&self) -> EngineConfig {
        let defaults = EngineConfig::default();
        EngineConfig {
            input_prefix: self.input_prefix.clone(),
            output_prefix: self.output_prefix.clone(),
            max_readers: self.max_readers.max(1),
            max_writers: self.max_writers.max(1),
            deadline: Duration::from_secs(self.deadline_secs),
            retry: RetryPolicy {
                attempts: self.retries.max(1),
                base_delay: Duration::from_millis(self.retry_backoff_ms),
                ..defaults.retry
            },
            codec: self.codec,
        }
    }
}
