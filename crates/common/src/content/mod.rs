//! Integrity-checked access to content.
//!
//! Everything read out of a store passes through a [`VerifyReader`], which
//!  holds the stream to exactly the size and digest its descriptor claims.

mod reader;

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::descriptor::{Descriptor, Digest};
use crate::storage::{Fetcher, StorageError};

pub use reader::VerifyReader;

/// Upper bound on the buffer reserved up front by [`read_all`].
///  Larger content still reads fine, the buffer just grows as it goes.
const MAX_PREALLOCATION: usize = 4 * 1024 * 1024;

/// Verification failures, plus transport errors hit while verifying
#[derive(Debug, Clone, thiserror::Error)]
pub enum ContentError {
    #[error("invalid descriptor size: {0}")]
    InvalidDescriptorSize(i64),
    #[error("mismatched digest: expected {expected}, got {actual}")]
    MismatchedDigest { expected: Digest, actual: Digest },
    #[error("trailing data after {size} bytes of content")]
    TrailingData { size: i64 },
    #[error("unexpected end of content: read {read} of {size} bytes")]
    UnexpectedEof { read: i64, size: i64 },
    #[error("content read failed: {0}")]
    Io(#[source] Arc<io::Error>),
}

impl ContentError {
    /// Recover the typed error from an [`io::Error`] produced by
    ///  a [`VerifyReader`]. Other i/o errors are wrapped as-is.
    pub fn from_io(err: io::Error) -> Self {
        let typed = err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<ContentError>())
            .cloned();
        match typed {
            Some(content) => content,
            None => ContentError::Io(Arc::new(err)),
        }
    }

    /// Whether this error is a verdict on the content itself, as
    ///  opposed to a failure of the transport carrying it
    pub fn is_verification(&self) -> bool {
        !matches!(self, ContentError::Io(_))
    }
}

impl From<ContentError> for io::Error {
    fn from(err: ContentError) -> Self {
        let kind = match &err {
            ContentError::UnexpectedEof { .. } => io::ErrorKind::UnexpectedEof,
            ContentError::Io(inner) => inner.kind(),
            _ => io::ErrorKind::InvalidData,
        };
        io::Error::new(kind, err)
    }
}

/// Read the content described by `desc` to completion, verifying its
///  size and digest along the way.
pub async fn read_all<R>(reader: R, desc: &Descriptor) -> Result<Bytes, ContentError>
where
    R: AsyncRead + Unpin,
{
    let size = desc.size();
    if size < 0 {
        return Err(ContentError::InvalidDescriptorSize(size));
    }

    let capacity = usize::try_from(size)
        .unwrap_or(MAX_PREALLOCATION)
        .min(MAX_PREALLOCATION);
    let mut buf = Vec::with_capacity(capacity);
    VerifyReader::new(reader, desc)
        .read_to_end(&mut buf)
        .await
        .map_err(ContentError::from_io)?;
    Ok(Bytes::from(buf))
}

/// Fetch the content described by `desc` and read it with [`read_all`]
pub async fn fetch_all<F>(fetcher: &F, desc: &Descriptor) -> Result<Bytes, StorageError>
where
    F: Fetcher + ?Sized,
{
    let reader = fetcher.fetch(desc).await?;
    Ok(read_all(reader, desc).await?)
}
