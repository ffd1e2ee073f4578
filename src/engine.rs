//! The map engine: fetch, aggregate, partition, shuffle.
//!
//! One [`MapEngine`] is built per process and shared by every concurrent
//! map task. Each call owns its own accumulator and buckets.

use std::time::{Duration, Instant};

use tokio::time::timeout;
use tracing::{info, info_span, warn, Instrument};

use crate::aggregate::Aggregator;
use crate::blobstore::SharedBlobstore;
use crate::config::EngineConfig;
use crate::error::{MapError, Result};
use crate::partition::partition;
use crate::reader::{fetch_all, require_all};
use crate::shuffle::ShuffleWriter;
use crate::{MapReply, MapRequest, MapStatus};

/// What a successful map task produced.
#[derive(Debug, Clone, PartialEq)]
pub struct MapOutcome {
    /// One handle per reducer, in bucket order.
    pub handles: Vec<String>,
    pub records_processed: u64,
    pub parse_errors: u64,
    pub sources_read: u64,
}

pub struct MapEngine {
    source: SharedBlobstore,
    writer: ShuffleWriter,
    config: EngineConfig,
}

impl MapEngine {
    /// `source` serves the input shards, `shuffle` receives the buckets.
    /// Both may be the same store.
    pub fn new(source: SharedBlobstore, shuffle: SharedBlobstore, config: EngineConfig) -> Self {
        let writer = ShuffleWriter::new(shuffle, &config);
        Self { source, writer, config }
    }

    /// Runs one map task under the configured deadline.
    pub async fn run_map(&self, request: &MapRequest) -> Result<MapOutcome> {
        self.run_map_within(request, self.config.deadline).await
    }

    /// Runs one map task, giving up after `deadline`. Outstanding reads and
    /// writes are cancelled when the deadline passes.
    pub async fn run_map_within(&self, request: &MapRequest, deadline: Duration) -> Result<MapOutcome> {
        validate(request)?;
        let span = info_span!("run_map", job = %request.job_id, mapper = %request.mapper_id);
        match timeout(deadline, self.execute(request).instrument(span)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(job = %request.job_id, mapper = %request.mapper_id, ?deadline, "map task timed out");
                Err(MapError::DeadlineExceeded(deadline))
            }
        }
    }

    /// Runs a map task and folds the result into a single terminal reply.
    pub async fn reply(&self, request: &MapRequest, deadline: Option<Duration>) -> MapReply {
        let started = Instant::now();
        let result = self
            .run_map_within(request, deadline.unwrap_or(self.config.deadline))
            .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(outcome) => MapReply {
                status: MapStatus::Success,
                bucket_handles: outcome.handles,
                records_processed: outcome.records_processed,
                parse_errors: outcome.parse_errors,
                sources_read: outcome.sources_read,
                elapsed_ms,
                error_detail: None,
                failed_buckets: Vec::new(),
            },
            Err(err) => MapReply::failure(&err, elapsed_ms),
        }
    }

    async fn execute(&self, request: &MapRequest) -> Result<MapOutcome> {
        info!(sources = request.source_keys.len(), reducers = request.reducer_count, "map task started");

        let fetched = fetch_all(
            &self.source,
            &request.source_container,
            &self.config.input_prefix,
            &request.source_keys,
            self.config.max_readers,
            self.config.retry,
        )
        .instrument(info_span!("fetch_keys"))
        .await;
        let contents = require_all(fetched)?;

        let (buckets, records, parse_errors) = info_span!("aggregate_and_partition").in_scope(|| {
            let mut aggregator = Aggregator::new();
            for blob in &contents {
                aggregator.add_blob(blob);
            }
            let records = aggregator.records();
            let parse_errors = aggregator.parse_errors();
            let buckets = partition(aggregator.finish(), request.reducer_count as usize);
            (buckets, records, parse_errors)
        });
        if parse_errors > 0 {
            warn!(parse_errors, records, "skipped malformed records");
        }

        let handles = self
            .writer
            .write(&buckets, &request.dest_container, &request.job_id, &request.mapper_id)
            .instrument(info_span!("save_result"))
            .await?;

        info!(records, parse_errors, "map task finished");
        Ok(MapOutcome {
            handles,
            records_processed: records,
            parse_errors,
            sources_read: request.source_keys.len() as u64,
        })
    }
}

/// Rejects requests no map task can run for.
pub fn validate(request: &MapRequest) -> Result<()> {
    if request.reducer_count == 0 {
        return Err(MapError::InvalidRequest("reducer count must be at least 1".into()));
    }
    if request.job_id.is_empty() || request.mapper_id.is_empty() {
        return Err(MapError::InvalidRequest("job id and mapper id are required".into()));
    }
    Ok(())
}
