//! ObjectStore - content-addressable target backed by SQLite + object storage.
//!
//! SQLite answers existence and tag lookups; blob bytes live in the
//! configured object storage. A blob is only recorded in SQLite after its
//! bytes were verified against the pushed descriptor and written, so the
//! metadata never points at content that is missing or wrong.

use std::path::Path;

use async_trait::async_trait;
use common::content::{ContentError, VerifyReader};
use common::descriptor::{Descriptor, Digest};
use common::storage::{
    ContentReader, Fetcher, Pusher, Resolver, Storage as ContentStorage, StorageError, TagPusher,
    TagResolver,
};
use tracing::{debug, info, warn};

use crate::database::Database;
use crate::error::Result;
use crate::storage::{ObjectStoreConfig, Storage};

/// Statistics from a metadata recovery run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Blobs present in object storage
    pub found: usize,
    /// Blobs whose metadata was rebuilt
    pub added: usize,
    /// Blobs that already had metadata
    pub existing: usize,
    /// Blobs that could not be read or no longer match their digest
    pub errors: usize,
}

/// Storage target backed by SQLite metadata and pluggable object storage
///  (S3/MinIO/local filesystem/memory).
///
/// # Example
///
/// ```rust,no_run
/// use conveyor_object_store::ObjectStore;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), conveyor_object_store::ObjectStoreError> {
/// let store = ObjectStore::new_local(Path::new("/tmp/conveyor")).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ObjectStore {
    db: Database,
    storage: Storage,
}

impl ObjectStore {
    /// Create a new ObjectStore with the given configuration.
    ///
    /// # Arguments
    /// * `db_path` - Path to the SQLite database file
    /// * `config` - Object storage configuration (S3, MinIO, local, or memory)
    pub async fn new(db_path: &Path, config: ObjectStoreConfig) -> Result<Self> {
        let db = Database::new(db_path).await?;
        let storage = Storage::new(config).await?;
        Ok(Self { db, storage })
    }

    /// Create a new ObjectStore with an in-memory SQLite database.
    pub async fn in_memory(config: ObjectStoreConfig) -> Result<Self> {
        let db = Database::in_memory().await?;
        let storage = Storage::new(config).await?;
        Ok(Self { db, storage })
    }

    /// Create a new ObjectStore backed by local filesystem.
    ///
    /// The database lives at `data_dir/meta.db`, objects under `data_dir/objects/`.
    pub async fn new_local(data_dir: &Path) -> Result<Self> {
        let db_path = data_dir.join("meta.db");
        let objects_path = data_dir.join("objects");
        let config = ObjectStoreConfig::Local { path: objects_path };
        Self::new(&db_path, config).await
    }

    /// Create a fully ephemeral ObjectStore (in-memory DB + in-memory object storage).
    ///
    /// Data will be lost when the ObjectStore is dropped. Useful for testing.
    pub async fn new_ephemeral() -> Result<Self> {
        Self::in_memory(ObjectStoreConfig::Memory).await
    }

    /// All tag references, sorted
    pub async fn tags(&self) -> Result<Vec<String>> {
        self.db.list_tags().await
    }

    /// Rebuild blob metadata from what is present in object storage.
    ///
    /// Every unrecorded object is read back and re-hashed before it is
    ///  recorded. Media types cannot be recovered and are left empty.
    pub async fn recover_from_storage(&self) -> Result<RecoveryStats> {
        let mut stats = RecoveryStats::default();
        let digests = self.storage.list_blob_digests().await?;
        stats.found = digests.len();

        for digest in digests {
            if self.db.has_blob(&digest).await? {
                stats.existing += 1;
                continue;
            }

            let data = match self.storage.get_blob(&digest).await {
                Ok(Some(data)) => data,
                Ok(None) => {
                    warn!(%digest, "blob listed but not found in storage");
                    stats.errors += 1;
                    continue;
                }
                Err(e) => {
                    warn!(%digest, error = %e, "failed to read blob during recovery");
                    stats.errors += 1;
                    continue;
                }
            };

            let actual = Digest::from_bytes(digest.algorithm(), &data);
            if actual != digest {
                warn!(expected = %digest, %actual, "stored blob does not match its digest");
                stats.errors += 1;
                continue;
            }

            match self.db.insert_blob(&digest, data.len() as i64, None).await {
                Ok(_) => {
                    debug!(%digest, size = data.len(), "recovered blob metadata");
                    stats.added += 1;
                }
                Err(e) => {
                    warn!(%digest, error = %e, "failed to insert recovered blob metadata");
                    stats.errors += 1;
                }
            }
        }

        info!(
            found = stats.found,
            added = stats.added,
            errors = stats.errors,
            "metadata recovery finished"
        );
        Ok(stats)
    }
}

#[async_trait]
impl Fetcher for ObjectStore {
    async fn fetch(&self, target: &Descriptor) -> std::result::Result<ContentReader, StorageError> {
        let digest = target.digest();
        let Some(meta) = self.db.get_blob(digest).await? else {
            return Err(StorageError::NotFound(digest.to_string()));
        };
        debug!(%digest, size = meta.size, "opening blob");
        self.storage
            .open_blob(digest)
            .await?
            .ok_or_else(|| StorageError::NotFound(digest.to_string()))
    }
}

#[async_trait]
impl Pusher for ObjectStore {
    async fn push(
        &self,
        expected: &Descriptor,
        content: ContentReader,
    ) -> std::result::Result<(), StorageError> {
        let digest = expected.digest();
        if self.db.has_blob(digest).await? {
            return Err(StorageError::AlreadyExists(digest.clone()));
        }

        if expected.size() < 0 {
            return Err(ContentError::InvalidDescriptorSize(expected.size()).into());
        }

        let verified = VerifyReader::new(content, expected);
        let size = self.storage.put_blob_stream(digest, verified).await?;

        let recorded = self
            .db
            .insert_blob(digest, expected.size(), Some(expected.media_type()))
            .await?;
        if !recorded {
            // a concurrent push of the same content won the race
            return Err(StorageError::AlreadyExists(digest.clone()));
        }

        debug!(%digest, size, "blob stored");
        Ok(())
    }
}

#[async_trait]
impl ContentStorage for ObjectStore {
    async fn exists(&self, target: &Descriptor) -> std::result::Result<bool, StorageError> {
        Ok(self.db.has_blob(target.digest()).await?)
    }
}

#[async_trait]
impl Resolver for ObjectStore {
    async fn resolve(&self, reference: &str) -> std::result::Result<Descriptor, StorageError> {
        self.db
            .get_tag(reference)
            .await?
            .ok_or_else(|| StorageError::NotFound(reference.to_string()))
    }
}

#[async_trait]
impl TagResolver for ObjectStore {
    async fn tag(&self, desc: &Descriptor, reference: &str) -> std::result::Result<(), StorageError> {
        if reference.is_empty() {
            return Err(StorageError::InvalidReference(reference.to_string()));
        }
        if !self.db.has_blob(desc.digest()).await? {
            return Err(StorageError::NotFound(desc.digest().to_string()));
        }
        self.db.upsert_tag(reference, desc).await?;
        info!(reference, digest = %desc.digest(), "tagged");
        Ok(())
    }
}

#[async_trait]
impl TagPusher for ObjectStore {
    async fn push_tagged(
        &self,
        expected: &Descriptor,
        content: ContentReader,
        reference: &str,
    ) -> std::result::Result<(), StorageError> {
        if reference.is_empty() {
            return Err(StorageError::InvalidReference(reference.to_string()));
        }
        if expected.size() < 0 {
            return Err(ContentError::InvalidDescriptorSize(expected.size()).into());
        }

        let digest = expected.digest();
        if !self.db.has_blob(digest).await? {
            let verified = VerifyReader::new(content, expected);
            self.storage.put_blob_stream(digest, verified).await?;
        }

        // the blob row and the tag commit together
        self.db.insert_blob_and_tag(expected, reference).await?;
        info!(reference, digest = %digest, "stored and tagged");
        Ok(())
    }
}
