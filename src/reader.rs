//! Record reader: fetches the source shards of a map task.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info_span, Instrument};

use crate::blobstore::{SharedBlobstore, StoreError};
use crate::error::{MapError, Result};
use crate::retry::RetryPolicy;
use crate::utils::string_from_bytes;

/// Outcome of reading one source key.
pub type ReadResult = std::result::Result<String, ReadFailure>;

#[derive(Debug, Clone, PartialEq)]
pub enum ReadFailure {
    Store(StoreError),
    /// The blob was fetched but is not valid UTF-8.
    Encoding,
}

/// Fetches every key of `keys` from `container`, at most `max_readers` at
/// a time, and returns one result per key in input order.
///
/// Each key is looked up as `{prefix}{key}`. Transient failures are retried
/// according to `retry`. A failed key does not stop the others.
pub async fn fetch_all(
    store: &SharedBlobstore,
    container: &str,
    prefix: &str,
    keys: &[String],
    max_readers: usize,
    retry: RetryPolicy,
) -> Vec<(String, ReadResult)> {
    let permits = Arc::new(Semaphore::new(max_readers.max(1)));
    let mut tasks = JoinSet::new();

    for (index, key) in keys.iter().enumerate() {
        let store = store.clone();
        let permits = permits.clone();
        let container = container.to_string();
        let path = format!("{prefix}{key}");
        let span = info_span!("fetch", key = %path);
        tasks.spawn(
            async move {
                let _permit = permits.acquire_owned().await;
                let fetched = retry
                    .run(&path, || store.get(&container, &path))
                    .await
                    .map_err(ReadFailure::Store)
                    .and_then(|raw| string_from_bytes(&raw).ok_or(ReadFailure::Encoding));
                (index, fetched)
            }
            .instrument(span),
        );
    }

    let mut results: Vec<Option<ReadResult>> = vec![None; keys.len()];
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, fetched)) => results[index] = Some(fetched),
            Err(e) => error!("fetch task failed: {e}"),
        }
    }

    keys.iter()
        .cloned()
        .zip(results)
        .map(|(key, fetched)| {
            let fetched = fetched.unwrap_or_else(|| {
                Err(ReadFailure::Store(StoreError::Unavailable(format!("{key}: fetch task aborted"))))
            });
            (key, fetched)
        })
        .collect()
}

/// Applies the batch policy to per-key results: any unreadable shard fails
/// the whole map task, since a missing shard would silently produce an
/// incomplete aggregate.
///
/// Missing keys win over other causes so the caller learns about every
/// absent shard at once.
pub fn require_all(results: Vec<(String, ReadResult)>) -> Result<Vec<String>> {
    let mut missing = Vec::new();
    let mut first_other: Option<MapError> = None;
    let mut contents = Vec::with_capacity(results.len());

    for (key, fetched) in results {
        match fetched {
            Ok(text) => contents.push(text),
            Err(ReadFailure::Store(StoreError::NotFound(_))) => missing.push(key),
            Err(ReadFailure::Store(err)) => {
                debug!(%key, error = %err, "source read failed");
                first_other.get_or_insert(MapError::from(err));
            }
            Err(ReadFailure::Encoding) => {
                first_other.get_or_insert(MapError::Encoding { key });
            }
        }
    }

    if !missing.is_empty() {
        return Err(MapError::NotFound { keys: missing });
    }
    match first_other {
        Some(err) => Err(err),
        None => Ok(contents),
    }
}
