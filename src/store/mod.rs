//! Object storage access: the two calls the batch loader needs.
//!
//! ```text
//!   list_objects(bucket)        ──▶ every object name, recursively
//!   get_object(bucket, name)    ──▶ raw bytes
//! ```
//!
//! Adapters:
//! * [`S3Store`]     – MinIO / S3-compatible endpoint over the network
//! * [`LocalStore`]  – a directory per bucket on the local filesystem
//! * [`MemoryStore`] – in-process buckets, with injectable failures
pub mod local;
pub mod memory;
pub mod s3;

use bytes::Bytes;
use thiserror::Error;

pub use local::LocalStore;
pub use memory::MemoryStore;
pub use s3::{S3Config, S3Store};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("bucket '{0}' does not exist")]
    BucketNotFound(String),
    #[error("object '{0}' not found")]
    NotFound(String),
    #[error("invalid object name '{0}'")]
    InvalidName(String),
    #[error("object store unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Remote(#[from] object_store::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Read-only bucket access. Implementations are shared across worker threads
/// without extra locking: each call is an independent request.
pub trait ObjectStore: Send + Sync {
    /// All object names in `bucket`, including those under nested prefixes.
    fn list_objects(&self, bucket: &str) -> Result<Vec<String>, StoreError>;

    fn get_object(&self, bucket: &str, name: &str) -> Result<Bytes, StoreError>;
}
