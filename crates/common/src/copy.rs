//! # Copy
//!
//! Moves a rooted DAG from one storage to another.
//!
//! The graph is walked on the source, children first. Every node the
//! destination already holds is skipped; every other node is fetched from
//! the source, verified against its descriptor while it streams, and pushed
//! to the destination. Since parents only get visited after their children,
//! a manifest never lands at the destination before the blobs it references.
//!
//! Re-running an interrupted copy is always safe: content that made it
//! across the first time is simply skipped.

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::content::VerifyReader;
use crate::dag::{walk, DagError, WalkOptions, DEFAULT_CONCURRENCY};
use crate::descriptor::{Descriptor, Digest};
use crate::storage::{ContentReader, Resolver, Storage, StorageError, TagPusher};

#[derive(Debug, Clone)]
pub struct CopyOptions {
    /// Maximum number of nodes processed concurrently
    pub concurrency: usize,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// What a graph copy did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyStats {
    /// Nodes pushed to the destination
    pub copied: usize,
    /// Nodes the destination already had
    pub skipped: usize,
    /// Bytes pushed
    pub bytes: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum CopyError {
    #[error("invalid reference: {0:?}")]
    InvalidReference(String),
    #[error("failed to resolve {reference}: {source}")]
    Resolve {
        reference: String,
        #[source]
        source: StorageError,
    },
    #[error("failed to copy {digest}: {source}")]
    Node {
        digest: Digest,
        #[source]
        source: StorageError,
    },
    #[error("failed to tag {reference}: {source}")]
    Tag {
        reference: String,
        #[source]
        source: StorageError,
    },
    #[error(transparent)]
    Graph(DagError),
    #[error("copy cancelled")]
    Cancelled,
}

impl From<DagError> for CopyError {
    fn from(err: DagError) -> Self {
        match err {
            DagError::Cancelled => CopyError::Cancelled,
            other => CopyError::Graph(other),
        }
    }
}

impl CopyError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CopyError::Cancelled)
    }
}

#[derive(Debug, Default)]
struct Counters {
    copied: AtomicUsize,
    skipped: AtomicUsize,
    bytes: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> CopyStats {
        CopyStats {
            copied: self.copied.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }
}

/// Copy the DAG tagged `src_ref` in `src` to `dst`, and tag its root there
///  as `dst_ref`. A blank `dst_ref` reuses `src_ref`.
///
/// The root is pushed together with its tag through
///  [`TagPusher::push_tagged`]. A root the destination already holds is
///  tagged on its own.
///
/// Returns the root descriptor.
pub async fn copy<S, D>(
    src: Arc<S>,
    src_ref: &str,
    dst: Arc<D>,
    dst_ref: &str,
    opts: &CopyOptions,
    cancel: &CancellationToken,
) -> Result<Descriptor, CopyError>
where
    S: Storage + Resolver + ?Sized + 'static,
    D: Storage + TagPusher + ?Sized + 'static,
{
    if src_ref.is_empty() {
        return Err(CopyError::InvalidReference(src_ref.to_string()));
    }
    let dst_ref = if dst_ref.is_empty() { src_ref } else { dst_ref };

    let root = cancellable(cancel, src.resolve(src_ref))
        .await?
        .map_err(|source| CopyError::Resolve {
            reference: src_ref.to_string(),
            source,
        })?;
    tracing::info!(
        src_ref,
        dst_ref,
        root = %root.digest(),
        media_type = root.media_type(),
        "copying graph"
    );

    let counters = Arc::new(Counters::default());
    let visit = {
        let src = src.clone();
        let dst = dst.clone();
        let counters = counters.clone();
        let root_digest = root.digest().clone();
        let reference: Arc<str> = Arc::from(dst_ref);
        move |node: Descriptor| {
            let src = src.clone();
            let dst = dst.clone();
            let counters = counters.clone();
            let is_root = node.digest() == &root_digest;
            let reference = reference.clone();
            async move {
                if !is_root {
                    let push = |content| dst.push(&node, content);
                    return copy_node(src.as_ref(), dst.as_ref(), &node, &counters, push)
                        .await
                        .map(|_| ());
                }

                let push = |content| dst.push_tagged(&node, content, &reference);
                let outcome =
                    copy_node(src.as_ref(), dst.as_ref(), &node, &counters, push).await?;
                if outcome == NodeOutcome::Skipped {
                    dst.tag(&node, &reference)
                        .await
                        .map_err(|source| CopyError::Tag {
                            reference: reference.to_string(),
                            source,
                        })?;
                }
                Ok(())
            }
        }
    };

    let walk_opts = WalkOptions {
        concurrency: opts.concurrency,
    };
    walk(src, root.clone(), visit, &walk_opts, cancel).await?;

    let stats = counters.snapshot();
    tracing::info!(
        dst_ref,
        copied = stats.copied,
        skipped = stats.skipped,
        bytes = stats.bytes,
        "copy complete"
    );

    Ok(root)
}

/// Copy the DAG rooted at `root` from `src` to `dst` without touching tags
pub async fn copy_graph<S, D>(
    src: Arc<S>,
    dst: Arc<D>,
    root: &Descriptor,
    opts: &CopyOptions,
    cancel: &CancellationToken,
) -> Result<CopyStats, CopyError>
where
    S: Storage + ?Sized + 'static,
    D: Storage + ?Sized + 'static,
{
    let counters = Arc::new(Counters::default());

    let visit = {
        let src = src.clone();
        let dst = dst.clone();
        let counters = counters.clone();
        move |node: Descriptor| {
            let src = src.clone();
            let dst = dst.clone();
            let counters = counters.clone();
            async move {
                let push = |content| dst.push(&node, content);
                copy_node(src.as_ref(), dst.as_ref(), &node, &counters, push)
                    .await
                    .map(|_| ())
            }
        }
    };

    let walk_opts = WalkOptions {
        concurrency: opts.concurrency,
    };
    walk(src, root.clone(), visit, &walk_opts, cancel).await?;

    Ok(counters.snapshot())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeOutcome {
    Copied,
    Skipped,
}

/// Copy one node unless the destination has it, handing the verified
///  content to `push`
async fn copy_node<S, D, P, Fut>(
    src: &S,
    dst: &D,
    node: &Descriptor,
    counters: &Counters,
    push: P,
) -> Result<NodeOutcome, CopyError>
where
    S: Storage + ?Sized,
    D: Storage + ?Sized,
    P: FnOnce(ContentReader) -> Fut,
    Fut: Future<Output = Result<(), StorageError>>,
{
    let node_error = |source: StorageError| CopyError::Node {
        digest: node.digest().clone(),
        source,
    };

    if dst.exists(node).await.map_err(node_error)? {
        tracing::debug!(digest = %node.digest(), "destination has node, skipping");
        counters.skipped.fetch_add(1, Ordering::Relaxed);
        return Ok(NodeOutcome::Skipped);
    }

    let content = src.fetch(node).await.map_err(node_error)?;
    let verified: ContentReader = Box::new(VerifyReader::new(content, node));
    match push(verified).await {
        Ok(()) => {
            tracing::debug!(digest = %node.digest(), size = node.size(), "copied node");
            counters.copied.fetch_add(1, Ordering::Relaxed);
            counters
                .bytes
                .fetch_add(u64::try_from(node.size()).unwrap_or(0), Ordering::Relaxed);
            Ok(NodeOutcome::Copied)
        }
        // someone else pushed it between our existence check and now
        Err(StorageError::AlreadyExists(_)) => {
            counters.skipped.fetch_add(1, Ordering::Relaxed);
            Ok(NodeOutcome::Skipped)
        }
        Err(source) => Err(node_error(source)),
    }
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = T>,
) -> Result<T, CopyError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CopyError::Cancelled),
        output = fut => Ok(output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::media_type;
    use crate::manifest::ImageManifest;
    use crate::storage::{MemoryStore, TagResolver};

    async fn put(store: &MemoryStore, media_type: &str, content: &[u8]) -> Descriptor {
        let desc = Descriptor::from_content(media_type, content);
        store.push_bytes(&desc, content.to_vec()).await.unwrap();
        desc
    }

    #[tokio::test]
    async fn test_copy_image() {
        let src = Arc::new(MemoryStore::new());
        let dst = Arc::new(MemoryStore::new());
        let config = put(&src, media_type::OCI_CONFIG, b"{}").await;
        let layer = put(&src, media_type::OCI_LAYER, b"layer").await;
        let manifest = ImageManifest::new(config.clone(), vec![layer.clone()]);
        let root = put(
            &src,
            media_type::OCI_MANIFEST,
            &serde_json::to_vec(&manifest).unwrap(),
        )
        .await;
        src.tag(&root, "v1").await.unwrap();

        let copied = copy(
            src,
            "v1",
            dst.clone(),
            "",
            &CopyOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(copied, root);
        assert_eq!(dst.len(), 3);
        assert_eq!(dst.resolve("v1").await.unwrap(), root);
    }

    #[tokio::test]
    async fn test_copy_rejects_blank_source_reference() {
        let src = Arc::new(MemoryStore::new());
        let dst = Arc::new(MemoryStore::new());
        let err = copy(
            src,
            "",
            dst,
            "v1",
            &CopyOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CopyError::InvalidReference(_)));
    }

    #[tokio::test]
    async fn test_copy_graph_counts_skips() {
        let src = Arc::new(MemoryStore::new());
        let dst = Arc::new(MemoryStore::new());
        let config = put(&src, media_type::OCI_CONFIG, b"{}").await;
        put(&dst, media_type::OCI_CONFIG, b"{}").await;
        let manifest = ImageManifest::new(config, vec![]);
        let root = put(
            &src,
            media_type::OCI_MANIFEST,
            &serde_json::to_vec(&manifest).unwrap(),
        )
        .await;

        let stats = copy_graph(
            src,
            dst,
            &root,
            &CopyOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(stats.copied, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.bytes, root.size() as u64);
    }
}
