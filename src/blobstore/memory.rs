use bytes::Bytes;
use dashmap::DashMap;

use super::{Blobstore, StoreError};

/// In-process key/value store. Used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryBlobstore {
    objects: DashMap<(String, String), Bytes>,
}

impl MemoryBlobstore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `data` without going through the async interface.
    pub fn insert(&self, container: &str, key: &str, data: impl Into<Bytes>) {
        self.objects.insert((container.to_string(), key.to_string()), data.into());
    }

    pub fn contains(&self, container: &str, key: &str) -> bool {
        self.objects.contains_key(&(container.to_string(), key.to_string()))
    }

    /// Keys in `container` starting with `prefix`, sorted.
    pub fn keys_with_prefix(&self, container: &str, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .iter()
            .filter(|entry| entry.key().0 == container && entry.key().1.starts_with(prefix))
            .map(|entry| entry.key().1.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[tonic::async_trait]
impl Blobstore for MemoryBlobstore {
    async fn get(&self, container: &str, key: &str) -> Result<Bytes, StoreError> {
        self.objects
            .get(&(container.to_string(), key.to_string()))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn put(&self, container: &str, key: &str, data: Bytes) -> Result<String, StoreError> {
        self.insert(container, key, data);
        Ok(key.to_string())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
