//! Storage capabilities.
//!
//! The copy engine only ever talks to these traits. A backend is anything
//!  that can fetch, push and answer existence by descriptor; tagging and
//!  reference resolution are layered on top for the ends of a copy.
//!
//! Storage calls take no cancellation argument. Callers race them against
//!  their [`tokio_util::sync::CancellationToken`] and drop the losing
//!  future, which is how cancellation reaches a backend blocked on i/o.

mod memory;

use std::io;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::content::ContentError;
use crate::descriptor::{Descriptor, Digest};

pub use memory::MemoryStore;

/// A readable stream of content handed out by a [`Fetcher`].
///  Dropping it releases whatever the backend holds open.
pub type ContentReader = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Content or reference is not present at the backend
    #[error("not found: {0}")]
    NotFound(String),
    /// Content with this digest is already stored
    #[error("already exists: {0}")]
    AlreadyExists(Digest),
    #[error("invalid reference: {0:?}")]
    InvalidReference(String),
    #[error(transparent)]
    Content(#[from] ContentError),
    #[error("storage i/o error: {0}")]
    Io(io::Error),
    #[error("storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        match ContentError::from_io(err) {
            ContentError::Io(inner) => match std::sync::Arc::try_unwrap(inner) {
                Ok(err) => StorageError::Io(err),
                Err(shared) => StorageError::Content(ContentError::Io(shared)),
            },
            content => StorageError::Content(content),
        }
    }
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StorageError::AlreadyExists(_))
    }
}

/// Fetches content
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the content identified by the descriptor.
    ///
    /// Returns [`StorageError::NotFound`] if the content is absent.
    async fn fetch(&self, target: &Descriptor) -> Result<ContentReader, StorageError>;
}

/// Pushes content
#[async_trait]
pub trait Pusher: Send + Sync {
    /// Push content matching the expected descriptor.
    ///
    /// Implementations should read the content through a
    ///  [`crate::content::VerifyReader`] so that nothing is stored under
    ///  a digest it does not hash to. Returns
    ///  [`StorageError::AlreadyExists`] if the digest is already stored;
    ///  existing content is never overwritten.
    async fn push(&self, expected: &Descriptor, content: ContentReader)
        -> Result<(), StorageError>;
}

/// A content-addressable storage, accessed by descriptor
#[async_trait]
pub trait Storage: Fetcher + Pusher {
    /// Whether the described content is stored. Answered from an
    ///  index, never by downloading the content.
    async fn exists(&self, target: &Descriptor) -> Result<bool, StorageError>;
}

/// Resolves references (tags) to descriptors
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, reference: &str) -> Result<Descriptor, StorageError>;
}

/// Reference indexing on top of resolution
#[async_trait]
pub trait TagResolver: Resolver {
    /// Point `reference` at `desc`, replacing any previous target
    async fn tag(&self, desc: &Descriptor, reference: &str) -> Result<(), StorageError>;
}

/// Pushes content and tags it in a single call.
///
/// Content that is already stored is not an error here: the reference is
///  pointed at it all the same. The provided method pushes and then tags.
///  Backends that can record both together override it, so the reference
///  never exists without its content.
#[async_trait]
pub trait TagPusher: Pusher + TagResolver {
    async fn push_tagged(
        &self,
        expected: &Descriptor,
        content: ContentReader,
        reference: &str,
    ) -> Result<(), StorageError> {
        if reference.is_empty() {
            return Err(StorageError::InvalidReference(reference.to_string()));
        }
        match self.push(expected, content).await {
            Ok(()) | Err(StorageError::AlreadyExists(_)) => {}
            Err(err) => return Err(err),
        }
        self.tag(expected, reference).await
    }
}

/// A storage with tags, usable as either end of a copy
pub trait Target: Storage + TagResolver {}

impl<T> Target for T where T: Storage + TagResolver + ?Sized {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion_keeps_verification_errors() {
        let io_err: io::Error = ContentError::TrailingData { size: 1 }.into();
        assert!(matches!(
            StorageError::from(io_err),
            StorageError::Content(ContentError::TrailingData { size: 1 })
        ));

        let plain = io::Error::new(io::ErrorKind::BrokenPipe, "pipe");
        assert!(matches!(StorageError::from(plain), StorageError::Io(_)));
    }
}
