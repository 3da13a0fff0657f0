use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore as _;
use tokio::runtime::Runtime;

use super::{ObjectStore, StoreError};

/// Connection settings for a MinIO / S3-compatible endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Config {
    /// `host:port`, or a full URL including the scheme.
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    /// `https` when true, plain `http` otherwise.
    pub secure: bool,
    pub region: String,
}

impl S3Config {
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.contains("://") {
            self.endpoint.trim_end_matches('/').to_string()
        } else {
            let scheme = if self.secure { "https" } else { "http" };
            format!("{scheme}://{}", self.endpoint.trim_end_matches('/'))
        }
    }
}

/// Blocking facade over `object_store`'s async S3 client. Owns its runtime so
/// callers on plain worker threads can use it directly.
pub struct S3Store {
    config: S3Config,
    runtime: Runtime,
    clients: Mutex<HashMap<String, Arc<AmazonS3>>>,
}

impl S3Store {
    pub fn new(config: S3Config) -> Result<Self, StoreError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("s3-io")
            .enable_all()
            .build()?;
        Ok(S3Store {
            config,
            runtime,
            clients: Mutex::new(HashMap::new()),
        })
    }

    fn client(&self, bucket: &str) -> Result<Arc<AmazonS3>, StoreError> {
        let mut clients = self
            .clients
            .lock()
            .map_err(|_| StoreError::Unavailable("client cache poisoned".to_string()))?;
        if let Some(client) = clients.get(bucket) {
            return Ok(Arc::clone(client));
        }
        let client = Arc::new(
            AmazonS3Builder::new()
                .with_endpoint(self.config.endpoint_url())
                .with_region(&self.config.region)
                .with_bucket_name(bucket)
                .with_access_key_id(&self.config.access_key)
                .with_secret_access_key(&self.config.secret_key)
                .with_allow_http(!self.config.secure)
                .with_virtual_hosted_style_request(false)
                .build()?,
        );
        clients.insert(bucket.to_string(), Arc::clone(&client));
        Ok(client)
    }
}

impl ObjectStore for S3Store {
    fn list_objects(&self, bucket: &str) -> Result<Vec<String>, StoreError> {
        let client = self.client(bucket)?;
        let names = self.runtime.block_on(async {
            client
                .list(None)
                .map_ok(|meta| meta.location.to_string())
                .try_collect::<Vec<_>>()
                .await
        })?;
        log::debug!("listed {} objects in {bucket}", names.len());
        Ok(names)
    }

    fn get_object(&self, bucket: &str, name: &str) -> Result<Bytes, StoreError> {
        let client = self.client(bucket)?;
        // Listed keys are already in canonical form; only re-encode when they are not.
        let location = ObjectPath::parse(name).unwrap_or_else(|_| ObjectPath::from(name));
        let content = self.runtime.block_on(async {
            let result = client.get(&location).await?;
            result.bytes().await
        });
        match content {
            Ok(bytes) => Ok(bytes),
            Err(object_store::Error::NotFound { .. }) => Err(StoreError::NotFound(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}
