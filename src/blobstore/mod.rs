//! Storage capability used by the mapper for both input and shuffle output.
//!
//! The engine only ever sees [`Blobstore`]; which backend sits behind it is
//! decided once, when the process starts (see [`connect`]).

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tracing::info;

use crate::config::{Backend, StoreConfig};

pub mod memory;
pub mod s3;
pub mod transfer;

pub use memory::MemoryBlobstore;
pub use s3::S3Blobstore;
pub use transfer::TransferBlobstore;

/// Failures a backend can report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The requested key does not exist.
    NotFound(String),
    /// Transient backend or network failure.
    Unavailable(String),
    QuotaExceeded(String),
}

impl StoreError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound(key) => write!(f, "{key} not found"),
            StoreError::Unavailable(msg) => write!(f, "unavailable: {msg}"),
            StoreError::QuotaExceeded(msg) => write!(f, "quota exceeded: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Get/put access to blobs grouped in containers.
///
/// Implementations are shared by every concurrent map task, so they must be
/// safe to call from many tasks at once.
#[tonic::async_trait]
pub trait Blobstore: Send + Sync {
    /// Fetches the blob stored under `key`.
    async fn get(&self, container: &str, key: &str) -> Result<Bytes, StoreError>;

    /// Stores `data` under `key` and returns a handle a consumer can later
    /// pass to [`Blobstore::get`]. For key/value stores this is the key;
    /// a transfer backend may hand back a token of its own.
    async fn put(&self, container: &str, key: &str, data: Bytes) -> Result<String, StoreError>;

    fn name(&self) -> &'static str;
}

pub type SharedBlobstore = Arc<dyn Blobstore>;

/// Builds the backend selected by `config`.
pub async fn connect(config: &StoreConfig) -> anyhow::Result<SharedBlobstore> {
    let store: SharedBlobstore = match config.backend {
        Backend::ObjectStore => Arc::new(S3Blobstore::from_config(config).await),
        Backend::PointToPoint => Arc::new(TransferBlobstore::connect(&config.transfer_addr).await?),
    };
    info!(backend = store.name(), "blobstore ready");
    Ok(store)
}
