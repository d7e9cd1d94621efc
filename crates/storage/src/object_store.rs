//! Object storage source for sequence files (S3 compatible).
//!
//! The async `object_store` client is driven from blocking worker threads
//! through a runtime [`Handle`], so a single file can be streamed without
//! ever buffering more than one chunk.

use std::collections::HashMap;
use std::io::{self, Read};
use std::sync::{Arc, Mutex};

use bytes::{Buf, Bytes};
use futures::stream::BoxStream;
use futures::StreamExt;
use object_store::{aws::AmazonS3Builder, path::Path, ObjectStore};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::{debug, instrument};

use archive_common::{ArchiveError, ArchiveResult, SourceLocator};

use crate::source::SourceStore;

/// Configuration for object storage connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStorageConfig {
    /// Custom endpoint URL (MinIO, accelerated endpoints); AWS default when unset
    pub endpoint: Option<String>,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// AWS region
    pub region: String,
    /// Allow HTTP (for local MinIO)
    pub allow_http: bool,
}

impl Default for ObjectStorageConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            access_key_id: String::new(),
            secret_access_key: String::new(),
            region: "us-east-1".to_string(),
            allow_http: false,
        }
    }
}

/// Source store backed by one `object_store` client per bucket.
pub struct ObjectStoreSource {
    config: ObjectStorageConfig,
    stores: Mutex<HashMap<String, Arc<dyn ObjectStore>>>,
    runtime: Handle,
}

impl ObjectStoreSource {
    /// Create a source bound to the current tokio runtime.
    pub fn new(config: ObjectStorageConfig) -> ArchiveResult<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| ArchiveError::Internal(format!("No tokio runtime: {}", e)))?;
        Ok(Self::with_handle(config, runtime))
    }

    pub fn with_handle(config: ObjectStorageConfig, runtime: Handle) -> Self {
        Self {
            config,
            stores: Mutex::new(HashMap::new()),
            runtime,
        }
    }

    /// Use a pre-built store for `bucket` instead of an S3 client.
    pub fn register(&self, bucket: impl Into<String>, store: Arc<dyn ObjectStore>) {
        if let Ok(mut stores) = self.stores.lock() {
            stores.insert(bucket.into(), store);
        }
    }

    fn store_for(&self, bucket: &str) -> ArchiveResult<Arc<dyn ObjectStore>> {
        let mut stores = self
            .stores
            .lock()
            .map_err(|_| ArchiveError::Internal("object store cache poisoned".to_string()))?;

        if let Some(store) = stores.get(bucket) {
            return Ok(store.clone());
        }

        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(bucket)
            .with_access_key_id(&self.config.access_key_id)
            .with_secret_access_key(&self.config.secret_access_key)
            .with_region(&self.config.region);

        if let Some(endpoint) = &self.config.endpoint {
            builder = builder.with_endpoint(endpoint);
        }
        if self.config.allow_http {
            builder = builder.with_allow_http(true);
        }

        let store: Arc<dyn ObjectStore> = Arc::new(builder.build().map_err(|e| {
            ArchiveError::Source(format!("Failed to create S3 client for {}: {}", bucket, e))
        })?);

        debug!(bucket = %bucket, "Created S3 client");
        stores.insert(bucket.to_string(), store.clone());
        Ok(store)
    }
}

impl SourceStore for ObjectStoreSource {
    #[instrument(skip(self), fields(locator = %locator))]
    fn head(&self, locator: &SourceLocator) -> ArchiveResult<Option<u64>> {
        let store = self.store_for(&locator.bucket)?;
        let location = Path::from(locator.key.as_str());

        match self.runtime.block_on(store.head(&location)) {
            Ok(meta) => Ok(Some(meta.size as u64)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(ArchiveError::Source(format!(
                "Failed to check {}: {}",
                locator, e
            ))),
        }
    }

    #[instrument(skip(self), fields(locator = %locator))]
    fn open_read(&self, locator: &SourceLocator) -> ArchiveResult<Box<dyn Read + Send>> {
        let store = self.store_for(&locator.bucket)?;
        let location = Path::from(locator.key.as_str());

        let result = self
            .runtime
            .block_on(store.get(&location))
            .map_err(|e| match e {
                object_store::Error::NotFound { .. } => {
                    ArchiveError::SourceNotFound(locator.to_string())
                }
                e => ArchiveError::Source(format!("Failed to read {}: {}", locator, e)),
            })?;

        Ok(Box::new(ObjectReader {
            stream: result.into_stream(),
            chunk: Bytes::new(),
            runtime: self.runtime.clone(),
        }))
    }

    fn peek(&self, locator: &SourceLocator, offset: u64, len: usize) -> ArchiveResult<Vec<u8>> {
        let size = self.size(locator)?;
        let start = offset.min(size) as usize;
        let end = offset.saturating_add(len as u64).min(size) as usize;
        if start >= end {
            return Ok(Vec::new());
        }

        let store = self.store_for(&locator.bucket)?;
        let location = Path::from(locator.key.as_str());

        let bytes = self
            .runtime
            .block_on(store.get_range(&location, start..end))
            .map_err(|e| {
                ArchiveError::Source(format!("Failed to read range of {}: {}", locator, e))
            })?;

        Ok(bytes.to_vec())
    }
}

/// Blocking [`Read`] adapter over an object's byte stream.
struct ObjectReader {
    stream: BoxStream<'static, object_store::Result<Bytes>>,
    chunk: Bytes,
    runtime: Handle,
}

impl Read for ObjectReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.chunk.is_empty() {
            match self.runtime.block_on(self.stream.next()) {
                Some(Ok(bytes)) => self.chunk = bytes,
                Some(Err(e)) => return Err(io::Error::new(io::ErrorKind::Other, e)),
                None => return Ok(0),
            }
        }

        let n = buf.len().min(self.chunk.len());
        buf[..n].copy_from_slice(&self.chunk[..n]);
        self.chunk.advance(n);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    const BUCKET: &str = "org-hca-data-archive-upload-dev";

    async fn source_with(objects: &[(&str, &[u8])]) -> Arc<ObjectStoreSource> {
        let memory = InMemory::new();
        for (key, data) in objects {
            memory
                .put(&Path::from(*key), Bytes::copy_from_slice(data))
                .await
                .unwrap();
        }
        let source = ObjectStoreSource::new(ObjectStorageConfig::default()).unwrap();
        source.register(BUCKET, Arc::new(memory));
        Arc::new(source)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_head_reports_size_and_absence() {
        let source = source_with(&[("sub/reads.fastq", b"ACGTACGT")]).await;

        let (present, missing) = tokio::task::spawn_blocking(move || {
            (
                source.head(&SourceLocator::new(BUCKET, "sub/reads.fastq")).unwrap(),
                source.exists(&SourceLocator::new(BUCKET, "sub/nope")).unwrap(),
            )
        })
        .await
        .unwrap();

        assert_eq!(present, Some(8));
        assert!(!missing);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_read_streams_whole_object() {
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let source = source_with(&[("sub/big.bin", &data)]).await;

        let read = tokio::task::spawn_blocking(move || {
            let mut reader = source
                .open_read(&SourceLocator::new(BUCKET, "sub/big.bin"))
                .unwrap();
            let mut out = Vec::new();
            reader.read_to_end(&mut out).unwrap();
            out
        })
        .await
        .unwrap();

        assert_eq!(read, data);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_peek_clamps_to_object_size() {
        let source = source_with(&[("sub/one", b"\x1f"), ("sub/gz", b"\x1f\x8b\x08\x00")]).await;

        let (short, magic, past_end) = tokio::task::spawn_blocking(move || {
            (
                source.peek(&SourceLocator::new(BUCKET, "sub/one"), 0, 2).unwrap(),
                source.peek(&SourceLocator::new(BUCKET, "sub/gz"), 0, 2).unwrap(),
                source.peek(&SourceLocator::new(BUCKET, "sub/gz"), 10, 2).unwrap(),
            )
        })
        .await
        .unwrap();

        assert_eq!(short, vec![0x1f]);
        assert_eq!(magic, vec![0x1f, 0x8b]);
        assert!(past_end.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_missing_object_is_not_found() {
        let source = source_with(&[]).await;

        let err = tokio::task::spawn_blocking(move || {
            source
                .open_read(&SourceLocator::new(BUCKET, "sub/missing"))
                .err()
                .unwrap()
        })
        .await
        .unwrap();

        assert!(matches!(err, ArchiveError::SourceNotFound(_)));
    }
}
