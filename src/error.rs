use std::fmt;
use std::time::Duration;

use tonic::Status;

use crate::blobstore::StoreError;
use crate::BucketIndex;

/// Batch-level failures of a map task. Malformed records never show up
/// here; they are only counted.
#[derive(Debug, Clone, PartialEq)]
pub enum MapError {
    InvalidRequest(String),
    /// One or more source shards do not exist.
    NotFound { keys: Vec<String> },
    StorageUnavailable(String),
    QuotaExceeded(String),
    /// A source shard is not valid UTF-8 text.
    Encoding { key: String },
    Codec(String),
    /// Some shuffle writes still failed after retrying.
    PartialWriteFailure {
        buckets: Vec<BucketIndex>,
        detail: String,
    },
    DeadlineExceeded(Duration),
}

impl MapError {
    /// Bucket indices that could not be written, if any.
    pub fn failed_buckets(&self) -> &[BucketIndex] {
        match self {
            MapError::PartialWriteFailure { buckets, .. } => buckets,
            _ => &[],
        }
    }
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            MapError::NotFound { keys } => write!(f, "source keys not found: {}", keys.join(", ")),
            MapError::StorageUnavailable(msg) => write!(f, "storage unavailable: {msg}"),
            MapError::QuotaExceeded(msg) => write!(f, "storage quota exceeded: {msg}"),
            MapError::Encoding { key } => write!(f, "source key {key} is not valid UTF-8"),
            MapError::Codec(msg) => write!(f, "bucket encoding failed: {msg}"),
            MapError::PartialWriteFailure { buckets, detail } => {
                write!(f, "shuffle write failed for buckets {buckets:?}: {detail}")
            }
            MapError::DeadlineExceeded(deadline) => {
                write!(f, "deadline of {}ms exceeded", deadline.as_millis())
            }
        }
    }
}

impl std::error::Error for MapError {}

impl From<StoreError> for MapError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(key) => MapError::NotFound { keys: vec![key] },
            StoreError::Unavailable(msg) => MapError::StorageUnavailable(msg),
            StoreError::QuotaExceeded(msg) => MapError::QuotaExceeded(msg),
        }
    }
}

impl From<parquet::errors::ParquetError> for MapError {
    fn from(value: parquet::errors::ParquetError) -> Self {
        MapError::Codec(value.to_string())
    }
}

impl From<arrow::error::ArrowError> for MapError {
    fn from(value: arrow::error::ArrowError) -> Self {
        MapError::Codec(value.to_string())
    }
}

impl From<serde_json::Error> for MapError {
    fn from(value: serde_json::Error) -> Self {
        MapError::Codec(value.to_string())
    }
}

impl From<MapError> for Status {
    fn from(error: MapError) -> Self {
        match error {
            MapError::InvalidRequest(msg) => Status::invalid_argument(msg),
            MapError::NotFound { .. } => Status::not_found(error.to_string()),
            MapError::StorageUnavailable(_) => Status::unavailable(error.to_string()),
            MapError::QuotaExceeded(_) => Status::resource_exhausted(error.to_string()),
            MapError::DeadlineExceeded(_) => Status::deadline_exceeded(error.to_string()),
            _ => Status::internal(error.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, MapError>;
