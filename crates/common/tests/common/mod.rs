//! Shared fixtures and instrumented stores for graph integration tests
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::prelude::*;
use parking_lot::Mutex;

/// Store `content` under a fresh descriptor
pub async fn put(store: &MemoryStore, media_type: &str, content: &[u8]) -> Descriptor {
    let desc = Descriptor::from_content(media_type, content);
    store.push_bytes(&desc, content.to_vec()).await.unwrap();
    desc
}

pub async fn put_manifest(
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

pub async fn put_index(store: &MemoryStore, manifests: &[Descriptor]) -> Descriptor {
    let index = ImageIndex::new(manifests.to_vec());
    put(
        store,
        media_type::OCI_INDEX,
        &serde_json::to_vec(&index).unwrap(),
    )
    .await
}

/// A single-platform image: config, `layers` layers and the manifest
pub struct Image {
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
    pub manifest: Descriptor,
}

pub async fn put_image(store: &MemoryStore, name: &str, layers: usize) -> Image {
    let config = put(
        store,
        media_type::OCI_CONFIG,
        format!("{{\"name\":\"{name}\"}}").as_bytes(),
    )
    .await;
    let mut blobs = Vec::with_capacity(layers);
    for i in 0..layers {
        blobs.push(put(store, media_type::OCI_LAYER, format!("{name} layer {i}").as_bytes()).await);
    }
    let manifest = put_manifest(store, &config, &blobs).await;
    Image {
        config,
        layers: blobs,
        manifest,
    }
}

/// Every distinct node reachable from the image
pub fn image_nodes(image: &Image) -> HashSet<Digest> {
    let mut nodes: HashSet<Digest> = image.layers.iter().map(|l| l.digest().clone()).collect();
    nodes.insert(image.config.digest().clone());
    nodes.insert(image.manifest.digest().clone());
    nodes
}

/// Counts operations in progress and remembers the peak.
///  Clones share the same counters.
#[derive(Clone, Default)]
pub struct Gauge {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Gauge {
    pub fn enter(&self) -> GaugeGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        GaugeGuard(self.current.clone())
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub struct GaugeGuard(Arc<AtomicUsize>);

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Wraps a [`MemoryStore`] and records how it is used
#[derive(Clone, Default)]
pub struct RecordingStore {
    pub inner: MemoryStore,
    /// Digests in push order
    pub pushes: Arc<Mutex<Vec<Digest>>>,
    pub fetches: Arc<Mutex<HashMap<Digest, usize>>>,
    /// Pushes that came with a reference, in order
    pub tagged_pushes: Arc<Mutex<Vec<(Digest, String)>>>,
    /// Pushes currently in progress, and the most ever seen at once
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    /// How long each push holds on before writing
    push_delay: Option<Duration>,
    /// Fetches are counted here and held for `fetch_delay`
    fetch_gauge: Option<Gauge>,
    fetch_delay: Option<Duration>,
}

impl RecordingStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            ..Default::default()
        }
    }

    pub fn with_push_delay(mut self, delay: Duration) -> Self {
        self.push_delay = Some(delay);
        self
    }

    pub fn with_fetch_gauge(mut self, gauge: Gauge, delay: Duration) -> Self {
        self.fetch_gauge = Some(gauge);
        self.fetch_delay = Some(delay);
        self
    }

    pub fn pushed(&self) -> Vec<Digest> {
        self.pushes.lock().clone()
    }

    pub fn fetch_count(&self, digest: &Digest) -> usize {
        self.fetches.lock().get(digest).copied().unwrap_or(0)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for RecordingStore {
    async fn fetch(&self, target: &Descriptor) -> Result<ContentReader, StorageError> {
        *self
            .fetches
            .lock()
            .entry(target.digest().clone())
            .or_default() += 1;
        let _guard = self.fetch_gauge.as_ref().map(Gauge::enter);
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.fetch(target).await
    }
}

#[async_trait]
impl Pusher for RecordingStore {
    async fn push(&self, expected: &Descriptor, content: ContentReader) -> Result<(), StorageError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.push_delay {
            tokio::time::sleep(delay).await;
        }
        let result = self.inner.push(expected, content).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if result.is_ok() {
            self.pushes.lock().push(expected.digest().clone());
        }
        result
    }
}

#[async_trait]
impl Storage for RecordingStore {
    async fn exists(&self, target: &Descriptor) -> Result<bool, StorageError> {
        self.inner.exists(target).await
    }
}

#[async_trait]
impl Resolver for RecordingStore {
    async fn resolve(&self, reference: &str) -> Result<Descriptor, StorageError> {
        self.inner.resolve(reference).await
    }
}

#[async_trait]
impl TagResolver for RecordingStore {
    async fn tag(&self, desc: &Descriptor, reference: &str) -> Result<(), StorageError> {
        self.inner.tag(desc, reference).await
    }
}

#[async_trait]
impl TagPusher for RecordingStore {
    async fn push_tagged(
        &self,
        expected: &Descriptor,
        content: ContentReader,
        reference: &str,
    ) -> Result<(), StorageError> {
        self.tagged_pushes
            .lock()
            .push((expected.digest().clone(), reference.to_string()));
        match self.push(expected, content).await {
            Ok(()) | Err(StorageError::AlreadyExists(_)) => {}
            Err(err) => return Err(err),
        }
        self.inner.tag(expected, reference).await
    }
}

/// Serves one blob with a flipped byte, everything else untouched
pub struct CorruptingStore {
    pub inner: MemoryStore,
    pub corrupt: Digest,
}

#[async_trait]
impl Fetcher for CorruptingStore {
    async fn fetch(&self, target: &Descriptor) -> Result<ContentReader, StorageError> {
        if target.digest() != &self.corrupt {
            return self.inner.fetch(target).await;
        }
        let mut content = self
            .inner
            .get(target.digest())
            .ok_or_else(|| StorageError::NotFound(target.digest().to_string()))?
            .to_vec();
        if let Some(first) = content.first_mut() {
            *first ^= 0x01;
        }
        Ok(Box::new(Cursor::new(content)))
    }
}

#[async_trait]
impl Pusher for CorruptingStore {
    async fn push(&self, expected: &Descriptor, content: ContentReader) -> Result<(), StorageError> {
        self.inner.push(expected, content).await
    }
}

#[async_trait]
impl Storage for CorruptingStore {
    async fn exists(&self, target: &Descriptor) -> Result<bool, StorageError> {
        self.inner.exists(target).await
    }
}

#[async_trait]
impl Resolver for CorruptingStore {
    async fn resolve(&self, reference: &str) -> Result<Descriptor, StorageError> {
        self.inner.resolve(reference).await
    }
}
