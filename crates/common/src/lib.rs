/**
 * Content descriptors, digests and the
 *  media types the engine knows how to traverse.
 */
pub mod descriptor;
/**
 * Streaming verification of content against
 *  its descriptor, plus bounded whole-content reads.
 */
pub mod content;
/**
 * Capability traits every storage backend implements,
 *  and an in-memory store.
 */
pub mod storage;
/**
 * Manifest, index and artifact schemas, parsed
 *  only as far as their child descriptors.
 */
pub mod manifest;
/**
 * Edge resolution and the bounded, cancellable
 *  post-order walk over a content DAG.
 */
pub mod dag;
/**
 * Copying a rooted DAG between two storages.
 */
pub mod copy;

pub mod prelude {
    pub use crate::content::{ContentError, VerifyReader};
    pub use crate::copy::{copy, copy_graph, CopyError, CopyOptions, CopyStats};
    pub use crate::dag::{down_edges, walk, DagError, WalkOptions};
    pub use crate::descriptor::{media_type, Descriptor, Digest, DigestAlgorithm};
    pub use crate::manifest::{get_manifest, ArtifactManifest, ImageIndex, ImageManifest};
    pub use crate::storage::{
        ContentReader, Fetcher, MemoryStore, Pusher, Resolver, Storage, StorageError,
        TagPusher, TagResolver, Target,
    };
    pub use tokio_util::sync::CancellationToken;
}
