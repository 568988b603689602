//! Traversal of content DAGs.
//!
//! Manifests and indices point at their children by descriptor. [`down_edges`]
//!  reads one node's children out of its content, and [`walk`] uses it to
//!  visit a whole rooted graph concurrently, children before parents.

mod edges;
mod walk;

use crate::descriptor::Digest;
use crate::manifest::ManifestError;
use crate::storage::StorageError;

pub use edges::{down_edges, NodeKind};
pub use walk::{walk, WalkOptions, DEFAULT_CONCURRENCY};

#[derive(Debug, thiserror::Error)]
pub enum DagError {
    /// Fetching or verifying a node's content failed
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// A manifest-like node did not parse against its media type's schema
    #[error("failed to parse {media_type} node {digest}: {source}")]
    EdgeParse {
        digest: Digest,
        media_type: String,
        #[source]
        source: ManifestError,
    },
    #[error("walk cancelled")]
    Cancelled,
    /// A node task panicked or was aborted outside the walk's control
    #[error("walk task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl DagError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DagError::Cancelled)
    }
}
