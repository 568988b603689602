//! Object storage backend abstraction (S3/MinIO/local filesystem/memory).

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use common::descriptor::Digest;
use common::storage::ContentReader;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, WriteMultipart};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::StreamReader;

use crate::error::{ObjectStoreError, Result};

/// Prefix every blob object lives under
const BLOBS_PREFIX: &str = "blobs";
/// Prefix for uploads that have not been verified yet
const STAGING_PREFIX: &str = "staging";
/// Bytes pulled from the source per read while uploading
const UPLOAD_CHUNK: usize = 64 * 1024;
/// Multipart parts allowed in flight per upload
const MAX_PARTS_IN_FLIGHT: usize = 4;

static UPLOAD_SEQ: AtomicU64 = AtomicU64::new(0);

/// Configuration for the object storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObjectStoreConfig {
    /// In-memory storage (for testing)
    #[default]
    Memory,

    /// Local filesystem storage
    Local {
        /// Path to the storage directory
        path: PathBuf,
    },

    /// S3-compatible storage (AWS S3, MinIO, etc.)
    S3 {
        /// S3 endpoint URL (e.g., "http://localhost:9000" for MinIO)
        endpoint: String,
        /// Access key ID
        access_key: String,
        /// Secret access key
        secret_key: String,
        /// Bucket name
        bucket: String,
        /// Optional region (defaults to "us-east-1")
        region: Option<String>,
    },
}

/// Wrapper around different object storage backends.
#[derive(Debug, Clone)]
pub(crate) struct Storage {
    inner: Arc<dyn ObjectStore>,
}

impl Storage {
    /// Create a new storage backend from configuration.
    pub async fn new(config: ObjectStoreConfig) -> Result<Self> {
        let inner: Arc<dyn ObjectStore> = match &config {
            ObjectStoreConfig::Memory => Arc::new(InMemory::new()),

            ObjectStoreConfig::Local { path } => {
                // Ensure directory exists
                tokio::fs::create_dir_all(path).await?;
                Arc::new(
                    LocalFileSystem::new_with_prefix(path)
                        .map_err(|e| ObjectStoreError::InvalidConfig(e.to_string()))?,
                )
            }

            ObjectStoreConfig::S3 {
                endpoint,
                access_key,
                secret_key,
                bucket,
                region,
            } => {
                let builder = AmazonS3Builder::new()
                    .with_endpoint(endpoint)
                    .with_access_key_id(access_key)
                    .with_secret_access_key(secret_key)
                    .with_bucket_name(bucket)
                    .with_region(region.as_deref().unwrap_or("us-east-1"))
                    .with_allow_http(endpoint.starts_with("http://"));

                let store: Arc<dyn ObjectStore> = Arc::new(
                    builder
                        .build()
                        .map_err(|e| ObjectStoreError::InvalidConfig(e.to_string()))?,
                );

                // Fail fast if the bucket doesn't exist
                let prefix = ObjectPath::from(BLOBS_PREFIX);
                let mut stream = store.list(Some(&prefix));
                match stream.try_next().await {
                    Ok(_) => {}
                    Err(object_store::Error::NotFound { .. }) => {
                        return Err(ObjectStoreError::BucketNotFound(bucket.clone()));
                    }
                    Err(e) => {
                        let msg = e.to_string();
                        if msg.contains("NoSuchBucket") {
                            return Err(ObjectStoreError::BucketNotFound(bucket.clone()));
                        }
                        return Err(e.into());
                    }
                }
                drop(stream);

                store
            }
        };

        Ok(Self { inner })
    }

    /// Object path for a blob: `blobs/<algorithm>/<hex>`
    fn blob_path(digest: &Digest) -> ObjectPath {
        ObjectPath::from(format!(
            "{}/{}/{}",
            BLOBS_PREFIX,
            digest.algorithm(),
            digest.encoded()
        ))
    }

    /// Unique object path for one upload of `digest`
    fn staging_path(digest: &Digest) -> ObjectPath {
        let seq = UPLOAD_SEQ.fetch_add(1, Ordering::Relaxed);
        let stamp = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        ObjectPath::from(format!(
            "{}/{}-{}-{}-{}",
            STAGING_PREFIX,
            digest.algorithm(),
            digest.encoded(),
            stamp,
            seq
        ))
    }

    /// Stream a blob into storage.
    ///
    /// The bytes go to a staging object through a multipart upload and are
    ///  only moved to `blobs/<algorithm>/<hex>` once `reader` reports end of
    ///  stream. A [`common::content::VerifyReader`] only does that after the
    ///  content checked out, so nothing unverified ever lands at a blob path.
    ///  The staging object is removed on every failure.
    pub async fn put_blob_stream<R>(&self, digest: &Digest, reader: R) -> Result<u64>
    where
        R: AsyncRead + Unpin + Send,
    {
        let staging = Self::staging_path(digest);
        let upload = self.inner.put_multipart(&staging).await?;
        let mut writer = WriteMultipart::new(upload);

        let written = match Self::upload(reader, &mut writer).await {
            Ok(written) => written,
            Err(e) => {
                if let Err(abort) = writer.abort().await {
                    tracing::warn!(path = %staging, error = %abort, "failed to abort upload");
                }
                return Err(e);
            }
        };

        if let Err(e) = writer.finish().await {
            self.discard(&staging).await;
            return Err(e.into());
        }
        if let Err(e) = self.inner.rename(&staging, &Self::blob_path(digest)).await {
            self.discard(&staging).await;
            return Err(e.into());
        }
        Ok(written)
    }

    async fn upload<R>(mut reader: R, writer: &mut WriteMultipart) -> Result<u64>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut buf = vec![0u8; UPLOAD_CHUNK];
        let mut written = 0u64;
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Ok(written);
            }
            writer.wait_for_capacity(MAX_PARTS_IN_FLIGHT).await?;
            writer.write(&buf[..n]);
            written += n as u64;
        }
    }

    async fn discard(&self, path: &ObjectPath) {
        match self.inner.delete(path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
            Err(e) => tracing::warn!(%path, error = %e, "failed to remove staged upload"),
        }
    }

    /// Open a streaming reader over a blob, `None` if the object is missing.
    pub async fn open_blob(&self, digest: &Digest) -> Result<Option<ContentReader>> {
        let path = Self::blob_path(digest);
        match self.inner.get(&path).await {
            Ok(result) => {
                let stream = result.into_stream().map_err(io::Error::other);
                Ok(Some(Box::new(StreamReader::new(stream))))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Read a whole blob into memory.
    pub async fn get_blob(&self, digest: &Digest) -> Result<Option<Bytes>> {
        let path = Self::blob_path(digest);
        match self.inner.get(&path).await {
            Ok(result) => Ok(Some(result.bytes().await?)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// List every blob digest present in storage. Objects whose path
    ///  does not parse as a digest are skipped.
    pub async fn list_blob_digests(&self) -> Result<Vec<Digest>> {
        let prefix = ObjectPath::from(BLOBS_PREFIX);
        let items: Vec<_> = self.inner.list(Some(&prefix)).try_collect().await?;

        let digests = items
            .into_iter()
            .filter_map(|meta| {
                let mut parts = meta.location.parts();
                let _prefix = parts.next()?;
                let algorithm = parts.next()?;
                let encoded = parts.next()?;
                format!("{}:{}", algorithm.as_ref(), encoded.as_ref())
                    .parse::<Digest>()
                    .map_err(|_| {
                        tracing::warn!(path = %meta.location, "ignoring unrecognized object");
                    })
                    .ok()
            })
            .collect();

        Ok(digests)
    }
}

#[cfg(test)]
impl Storage {
    /// Create an in-memory storage backend (test-only).
    pub fn memory() -> Self {
        Self {
            inner: Arc::new(InMemory::new()),
        }
    }

    /// Put blob content straight at its final path.
    pub async fn put_blob(&self, digest: &Digest, data: Bytes) -> Result<()> {
        let path = Self::blob_path(digest);
        self.inner.put(&path, data.into()).await?;
        Ok(())
    }

    /// Number of uploads sitting in staging
    pub async fn staged_count(&self) -> Result<usize> {
        let prefix = ObjectPath::from(STAGING_PREFIX);
        let items: Vec<_> = self.inner.list(Some(&prefix)).try_collect().await?;
        Ok(items.len())
    }

    /// Check if blob data exists in storage.
    pub async fn has_blob(&self, digest: &Digest) -> Result<bool> {
        let path = Self::blob_path(digest);
        match self.inner.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
