//! Serialization of shuffle buckets.
//!
//! Buckets are written with keys in ascending order, so a re-run of the same
//! mapper produces byte-identical shards.

use std::collections::BTreeMap;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use itertools::Itertools;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use crate::config::Codec;
use crate::error::{MapError, Result};
use crate::Bucket;

fn bucket_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("key", DataType::Utf8, false),
        Field::new("value", DataType::Float64, false),
    ]))
}

/// Encodes a bucket in the given format.
pub fn encode_bucket(codec: Codec, bucket: &Bucket) -> Result<Bytes> {
    match codec {
        Codec::Parquet => write_parquet(bucket),
        Codec::Json => write_json(bucket),
    }
}

/// Decodes a shard written by [`encode_bucket`].
pub fn decode_bucket(codec: Codec, data: Bytes) -> Result<Bucket> {
    match codec {
        Codec::Parquet => read_parquet(data),
        Codec::Json => Ok(serde_json::from_slice(&data)?),
    }
}

/// JSON has no literal for NaN or infinity, so non-finite sums are refused
/// instead of being written as `null`.
fn write_json(bucket: &Bucket) -> Result<Bytes> {
    if let Some((key, sum)) = bucket.iter().find(|(_, sum)| !sum.is_finite()) {
        return Err(MapError::Codec(format!("sum of {key} is not finite: {sum}")));
    }
    let sorted: BTreeMap<&String, &f64> = bucket.iter().collect();
    Ok(Bytes::from(serde_json::to_vec(&sorted)?))
}

/// One row group with a `key` and a `value` column, SNAPPY compressed.
fn write_parquet(bucket: &Bucket) -> Result<Bytes> {
    let (keys, values): (Vec<&str>, Vec<f64>) = bucket
        .iter()
        .sorted_by(|a, b| a.0.cmp(b.0))
        .map(|(k, v)| (k.as_str(), *v))
        .unzip();

    let schema = bucket_schema();
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(StringArray::from(keys)) as ArrayRef,
            Arc::new(Float64Array::from(values)) as ArrayRef,
        ],
    )?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let mut buf: Vec<u8> = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, schema, Some(props))?;
    writer.write(&batch)?;
    // writer must be closed to write footer
    writer.close()?;
    Ok(Bytes::from(buf))
}

fn read_parquet(data: Bytes) -> Result<Bucket> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(data)?.build()?;
    let mut bucket = Bucket::new();
    for batch in reader {
        let batch = batch?;
        let keys = batch
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| MapError::Codec("key column is not utf8".into()))?;
        let values = batch
            .column(1)
            .as_any()
            .downcast_ref::<Float64Array>()
            .ok_or_else(|| MapError::Codec("value column is not float64".into()))?;
        for i in 0..keys.len() {
            bucket.insert(keys.value(i).to_string(), values.value(i));
        }
    }
    Ok(bucket)
}
