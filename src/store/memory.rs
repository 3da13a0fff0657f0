use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use bytes::Bytes;

use super::{ObjectStore, StoreError};

/// Buckets held in memory. Listing is in name order.
///
/// Individual objects or whole bucket listings can be marked as failing, and
/// every `get_object` call is recorded, which is what the loader tests lean on.
#[derive(Debug, Default)]
pub struct MemoryStore {
    buckets: BTreeMap<String, BTreeMap<String, Bytes>>,
    failing_objects: BTreeSet<(String, String)>,
    failing_listings: BTreeSet<String>,
    fetched: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `bucket` if needed, without adding objects.
    pub fn with_bucket(mut self, bucket: &str) -> Self {
        self.buckets.entry(bucket.to_string()).or_default();
        self
    }

    pub fn with_object(mut self, bucket: &str, name: &str, content: impl Into<Bytes>) -> Self {
        self.put(bucket, name, content);
        self
    }

    /// The object is listed but every fetch of it fails.
    pub fn with_failing_object(mut self, bucket: &str, name: &str) -> Self {
        self.put(bucket, name, Bytes::new());
        self.failing_objects
            .insert((bucket.to_string(), name.to_string()));
        self
    }

    pub fn with_failing_listing(mut self, bucket: &str) -> Self {
        self.buckets.entry(bucket.to_string()).or_default();
        self.failing_listings.insert(bucket.to_string());
        self
    }

    pub fn put(&mut self, bucket: &str, name: &str, content: impl Into<Bytes>) {
        self.buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(name.to_string(), content.into());
    }

    /// Names passed to `get_object`, in call order.
    pub fn fetched(&self) -> Vec<String> {
        self.fetched
            .lock()
            .map(|names| names.clone())
            .unwrap_or_default()
    }
}

impl ObjectStore for MemoryStore {
    fn list_objects(&self, bucket: &str) -> Result<Vec<String>, StoreError> {
        if self.failing_listings.contains(bucket) {
            return Err(StoreError::Unavailable(format!("listing of '{bucket}' refused")));
        }
        let objects = self
            .buckets
            .get(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
        Ok(objects.keys().cloned().collect())
    }

    fn get_object(&self, bucket: &str, name: &str) -> Result<Bytes, StoreError> {
        if let Ok(mut fetched) = self.fetched.lock() {
            fetched.push(name.to_string());
        }
        if self
            .failing_objects
            .contains(&(bucket.to_string(), name.to_string()))
        {
            return Err(StoreError::Unavailable(format!("connection reset reading '{name}'")));
        }
        self.buckets
            .get(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }
}
