//! Partitioner: splits the aggregate into one bucket per reducer.

use crate::{ihash, Accumulator, Bucket, BucketIndex};

/// Bucket a key belongs to when there are `reducer_count` reducers:
/// `ihash(key) % reducer_count`.
///
/// This is a true modulo, so any reducer count works, not only powers of
/// two. Panics if `reducer_count` is zero.
pub fn bucket_for(key: &str, reducer_count: usize) -> BucketIndex {
    (ihash(key.as_bytes()) % reducer_count as u64) as BucketIndex
}

/// Moves every entry of `sums` into its bucket. Always returns exactly
/// `reducer_count` buckets, empty ones included.
pub fn partition(sums: Accumulator, reducer_count: usize) -> Vec<Bucket> {
    let mut buckets: Vec<Bucket> = (0..reducer_count).map(|_| Bucket::new()).collect();
    for (key, sum) in sums {
        let index = bucket_for(&key, reducer_count);
        buckets[index].insert(key, sum);
    }
    buckets
}
