//! Bounded, cancellable post-order walk over a rooted DAG.
//!
//! Each node is processed by its own tokio task:
//!
//! 1. take a permit, resolve the node's children with [`down_edges`], drop the permit
//! 2. spawn a task for every child no other task has claimed yet, and wait
//!    for those plus any children claimed elsewhere to finish
//! 3. take a permit, call the visitor on the node, drop the permit
//!
//! Permits are never held across step 2, so a graph deeper than the limit
//!  cannot starve itself. The visited map hands every digest to exactly one
//!  owning task and lets every other parent wait on that owner's completion,
//!  which keeps the children-before-parent order for shared subgraphs too.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::descriptor::{Descriptor, Digest};
use crate::storage::Fetcher;

use super::{down_edges, DagError};

/// Default cap on concurrently processed nodes
pub const DEFAULT_CONCURRENCY: usize = 3;

#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Maximum number of nodes whose edges are being resolved or which
    ///  are being visited at any one time. Zero is treated as one.
    pub concurrency: usize,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// Marker for a node task that stopped because the walk is failing.
///  The reason lives in [`Walker::failure`].
#[derive(Debug)]
struct Aborted;

enum Claim {
    /// This task must process the node and signal completion
    Owned(watch::Sender<bool>),
    /// Another task owns the node, wait for it
    Claimed(watch::Receiver<bool>),
}

struct Walker<F: ?Sized, V, E> {
    fetcher: Arc<F>,
    visit: V,
    limiter: Arc<Semaphore>,
    /// digest -> completion signal of the owning task
    visited: Mutex<HashMap<Digest, watch::Receiver<bool>>>,
    cancel: CancellationToken,
    /// First failure seen by any task
    failure: Mutex<Option<E>>,
}

/// Walk the DAG rooted at `root`, calling `visit` once per distinct node.
///
/// Children are always visited before their parents; siblings have no
///  ordering between them. At most `opts.concurrency` nodes are being
///  resolved or visited at once.
///
/// The first failure, whether from edge resolution, from the visitor or
///  from `cancel` firing, aborts the walk. Outstanding tasks observe the
///  abort at their next suspension point and are joined before this
///  returns the failure. Caller cancellation surfaces as
///  [`DagError::Cancelled`].
pub async fn walk<F, V, Fut, E>(
    fetcher: Arc<F>,
    root: Descriptor,
    visit: V,
    opts: &WalkOptions,
    cancel: &CancellationToken,
) -> Result<(), E>
where
    F: Fetcher + ?Sized + 'static,
    V: Fn(Descriptor) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: From<DagError> + Display + Send + 'static,
{
    let walker = Arc::new(Walker {
        fetcher,
        visit,
        limiter: Arc::new(Semaphore::new(opts.concurrency.max(1))),
        visited: Mutex::new(HashMap::new()),
        cancel: cancel.child_token(),
        failure: Mutex::new(None),
    });

    tracing::debug!(root = %root.digest(), concurrency = opts.concurrency, "starting walk");

    let outcome = match walker.claim(&root) {
        Claim::Owned(done) => walker.clone().process(root, done).await,
        // the visited map starts empty
        Claim::Claimed(_) => Ok(()),
    };

    let failure = walker.failure.lock().take();
    match (outcome, failure) {
        (_, Some(err)) => Err(err),
        (Err(Aborted), None) => Err(DagError::Cancelled.into()),
        (Ok(()), None) => Ok(()),
    }
}

impl<F, V, Fut, E> Walker<F, V, E>
where
    F: Fetcher + ?Sized + 'static,
    V: Fn(Descriptor) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: From<DagError> + Display + Send + 'static,
{
    /// Atomically check and mark a node as visited
    fn claim(&self, node: &Descriptor) -> Claim {
        let mut visited = self.visited.lock();
        match visited.entry(node.digest().clone()) {
            Entry::Occupied(entry) => Claim::Claimed(entry.get().clone()),
            Entry::Vacant(entry) => {
                let (done, rx) = watch::channel(false);
                entry.insert(rx);
                Claim::Owned(done)
            }
        }
    }

    /// Record a failure and stop the walk. Only the first one is kept.
    fn fail(&self, err: E) -> Aborted {
        {
            let mut failure = self.failure.lock();
            if failure.is_none() {
                tracing::warn!(error = %err, "aborting walk");
                *failure = Some(err);
            }
        }
        self.cancel.cancel();
        Aborted
    }

    async fn acquire(&self) -> Result<OwnedSemaphorePermit, Aborted> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(self.fail(DagError::Cancelled.into())),
            permit = self.limiter.clone().acquire_owned() => {
                // the semaphore is never closed
                permit.map_err(|_| self.fail(DagError::Cancelled.into()))
            }
        }
    }

    /// Drive `fut` unless the walk is cancelled first
    async fn run<T, X>(&self, fut: impl Future<Output = Result<T, X>>) -> Result<T, Aborted>
    where
        X: Into<E>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(self.fail(DagError::Cancelled.into())),
            result = fut => result.map_err(|err| self.fail(err.into())),
        }
    }

    async fn wait_for(&self, mut done: watch::Receiver<bool>) -> Result<(), Aborted> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(self.fail(DagError::Cancelled.into())),
            finished = done.wait_for(|done| *done) => {
                // the owner went away without finishing, so the walk is already failing
                finished.map(|_| ()).map_err(|_| self.fail(DagError::Cancelled.into()))
            }
        }
    }

    fn process(
        self: Arc<Self>,
        node: Descriptor,
        done: watch::Sender<bool>,
    ) -> BoxFuture<'static, Result<(), Aborted>> {
        async move {
            let children = {
                let _permit = self.acquire().await?;
                self.run(down_edges(self.fetcher.as_ref(), &node)).await?
            };
            tracing::debug!(
                digest = %node.digest(),
                media_type = node.media_type(),
                children = children.len(),
                "resolved node edges"
            );

            let mut tasks = JoinSet::new();
            let mut claimed = Vec::new();
            for child in children {
                match self.claim(&child) {
                    Claim::Owned(child_done) => {
                        tasks.spawn(self.clone().process(child, child_done));
                    }
                    Claim::Claimed(rx) => claimed.push(rx),
                }
            }

            // dropping the set on an early return aborts the remaining children
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(Aborted)) => return Err(Aborted),
                    Err(err) => return Err(self.fail(DagError::Task(err).into())),
                }
            }
            for rx in claimed {
                self.wait_for(rx).await?;
            }

            {
                let _permit = self.acquire().await?;
                self.run((self.visit)(node.clone())).await?;
            }
            tracing::debug!(digest = %node.digest(), "visited node");

            done.send_replace(true);
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::media_type;
    use crate::manifest::{ImageIndex, ImageManifest};
    use crate::storage::MemoryStore;

    async fn put(store: &MemoryStore, media_type: &str, content: &[u8]) -> Descriptor {
        let desc = Descriptor::from_content(media_type, content);
        store.push_bytes(&desc, content.to_vec()).await.unwrap();
        desc
    }

    async fn put_manifest(
        store: &MemoryStore,
        config: &Descriptor,
        layers: &[Descriptor],
    ) -> Descriptor {
        let manifest = ImageManifest::new(config.clone(), layers.to_vec());
        put(
            store,
            media_type::OCI_MANIFEST,
            &serde_json::to_vec(&manifest).unwrap(),
        )
        .await
    }

    fn recorder() -> (
        Arc<Mutex<Vec<Digest>>>,
        impl Fn(Descriptor) -> BoxFuture<'static, Result<(), DagError>> + Send + Sync + 'static,
    ) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let visit = move |node: Descriptor| {
            let sink = sink.clone();
            async move {
                sink.lock().push(node.digest().clone());
                Ok(())
            }
            .boxed()
        };
        (seen, visit)
    }

    #[tokio::test]
    async fn test_single_leaf() {
        let store = Arc::new(MemoryStore::new());
        let leaf = put(&store, media_type::OCI_LAYER, b"just a blob").await;
        let (seen, visit) = recorder();

        walk(
            store,
            leaf.clone(),
            visit,
            &WalkOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(*seen.lock(), vec![leaf.digest().clone()]);
    }

    #[tokio::test]
    async fn test_post_order_and_dedup() {
        let store = Arc::new(MemoryStore::new());
        let config = put(&store, media_type::OCI_CONFIG, b"{}").await;
        let shared = put(&store, media_type::OCI_LAYER, b"base layer").await;
        let a = put(&store, media_type::OCI_LAYER, b"layer a").await;
        let b = put(&store, media_type::OCI_LAYER, b"layer b").await;
        let m1 = put_manifest(&store, &config, &[shared.clone(), a.clone()]).await;
        let m2 = put_manifest(&store, &config, &[shared.clone(), b.clone()]).await;
        let index = ImageIndex::new(vec![m1.clone(), m2.clone()]);
        let root = put(
            &store,
            media_type::OCI_INDEX,
            &serde_json::to_vec(&index).unwrap(),
        )
        .await;

        let (seen, visit) = recorder();
        walk(
            store,
            root.clone(),
            visit,
            &WalkOptions { concurrency: 2 },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let seen = seen.lock().clone();
        assert_eq!(seen.len(), 7, "every distinct node exactly once");
        let position = |d: &Descriptor| seen.iter().position(|s| s == d.digest()).unwrap();
        for (parent, children) in [
            (&m1, vec![&config, &shared, &a]),
            (&m2, vec![&config, &shared, &b]),
            (&root, vec![&m1, &m2]),
        ] {
            for child in children {
                assert!(position(child) < position(parent));
            }
        }
        assert_eq!(position(&root), 6);
    }

    #[tokio::test]
    async fn test_zero_concurrency_still_walks() {
        let store = Arc::new(MemoryStore::new());
        let config = put(&store, media_type::OCI_CONFIG, b"{}").await;
        let root = put_manifest(&store, &config, &[]).await;
        let (seen, visit) = recorder();

        walk(
            store,
            root,
            visit,
            &WalkOptions { concurrency: 0 },
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_visitor_error_aborts() {
        let store = Arc::new(MemoryStore::new());
        let config = put(&store, media_type::OCI_CONFIG, b"{}").await;
        let layer = put(&store, media_type::OCI_LAYER, b"bad layer").await;
        let root = put_manifest(&store, &config, &[layer.clone()]).await;

        let parent_visited = Arc::new(Mutex::new(false));
        let flag = parent_visited.clone();
        let root_digest = root.digest().clone();
        let bad = layer.digest().clone();
        let visit = move |node: Descriptor| {
            let flag = flag.clone();
            let bad = bad.clone();
            let root_digest = root_digest.clone();
            async move {
                if node.digest() == &bad {
                    return Err(DagError::Storage(crate::storage::StorageError::NotFound(
                        bad.to_string(),
                    )));
                }
                if node.digest() == &root_digest {
                    *flag.lock() = true;
                }
                Ok(())
            }
        };

        let err = walk(
            store,
            root,
            visit,
            &WalkOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DagError::Storage(_)));
        assert!(!*parent_visited.lock());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let store = Arc::new(MemoryStore::new());
        let leaf = put(&store, media_type::OCI_LAYER, b"blob").await;
        let (seen, visit) = recorder();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = walk(store, leaf, visit, &WalkOptions::default(), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(seen.lock().is_empty());
    }
}
