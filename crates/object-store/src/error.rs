//! Error types for the object store backend.

use common::storage::StorageError;

/// Errors that can occur when working with the object store backend.
#[derive(Debug, thiserror::Error)]
pub enum ObjectStoreError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Object storage error
    #[error("object storage error: {0}")]
    ObjectStore(#[from] object_store::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Migration error
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored tag descriptor failed to decode
    #[error("corrupt tag {reference}: {source}")]
    CorruptTag {
        reference: String,
        #[source]
        source: serde_json::Error,
    },

    /// Descriptor could not be encoded for storage
    #[error("failed to encode descriptor: {0}")]
    Encode(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// S3 bucket not found - must be created before use
    #[error("S3 bucket '{0}' does not exist. Create it before using it as a store.")]
    BucketNotFound(String),
}

/// Result type alias for object store backend operations.
pub type Result<T> = std::result::Result<T, ObjectStoreError>;

impl From<ObjectStoreError> for StorageError {
    fn from(err: ObjectStoreError) -> Self {
        match err {
            ObjectStoreError::Io(err) => StorageError::from(err),
            other => StorageError::Backend(other.into()),
        }
    }
}
