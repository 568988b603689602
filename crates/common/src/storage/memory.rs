use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use super::{
    ContentReader, Fetcher, Pusher, Resolver, Storage, StorageError, TagPusher, TagResolver,
};
use crate::content::read_all;
use crate::descriptor::{Descriptor, Digest};

/// In-memory content-addressable store with tags
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryStoreInner>>,
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    /// Verified content by digest
    content: HashMap<Digest, Bytes>,
    /// reference -> tagged descriptor
    tags: HashMap<String, Descriptor>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct blobs stored
    pub fn len(&self) -> usize {
        self.inner.read().content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().content.is_empty()
    }

    /// Stored bytes for a digest, if any
    pub fn get(&self, digest: &Digest) -> Option<Bytes> {
        self.inner.read().content.get(digest).cloned()
    }

    /// Push an in-memory buffer, verifying it against `expected`
    pub async fn push_bytes(
        &self,
        expected: &Descriptor,
        content: impl Into<Bytes>,
    ) -> Result<(), StorageError> {
        let content: Bytes = content.into();
        self.push(expected, Box::new(Cursor::new(content))).await
    }
}

#[async_trait]
impl Fetcher for MemoryStore {
    async fn fetch(&self, target: &Descriptor) -> Result<ContentReader, StorageError> {
        let content = self
            .get(target.digest())
            .ok_or_else(|| StorageError::NotFound(target.digest().to_string()))?;
        Ok(Box::new(Cursor::new(content)))
    }
}

#[async_trait]
impl Pusher for MemoryStore {
    async fn push(
        &self,
        expected: &Descriptor,
        content: ContentReader,
    ) -> Result<(), StorageError> {
        if self.inner.read().content.contains_key(expected.digest()) {
            return Err(StorageError::AlreadyExists(expected.digest().clone()));
        }

        let value = read_all(content, expected).await?;

        // a concurrent push may have landed while we were reading
        let mut inner = self.inner.write();
        if inner.content.contains_key(expected.digest()) {
            return Err(StorageError::AlreadyExists(expected.digest().clone()));
        }
        inner.content.insert(expected.digest().clone(), value);
        tracing::trace!(digest = %expected.digest(), size = expected.size(), "stored blob in memory");
        Ok(())
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn exists(&self, target: &Descriptor) -> Result<bool, StorageError> {
        Ok(self.inner.read().content.contains_key(target.digest()))
    }
}

#[async_trait]
impl Resolver for MemoryStore {
    async fn resolve(&self, reference: &str) -> Result<Descriptor, StorageError> {
        self.inner
            .read()
            .tags
            .get(reference)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(reference.to_string()))
    }
}

#[async_trait]
impl TagResolver for MemoryStore {
    async fn tag(&self, desc: &Descriptor, reference: &str) -> Result<(), StorageError> {
        if reference.is_empty() {
            return Err(StorageError::InvalidReference(reference.to_string()));
        }

        let mut inner = self.inner.write();
        if !inner.content.contains_key(desc.digest()) {
            return Err(StorageError::NotFound(desc.digest().to_string()));
        }
        inner.tags.insert(reference.to_string(), desc.clone());
        Ok(())
    }
}

#[async_trait]
impl TagPusher for MemoryStore {
    async fn push_tagged(
        &self,
        expected: &Descriptor,
        content: ContentReader,
        reference: &str,
    ) -> Result<(), StorageError> {
        if reference.is_empty() {
            return Err(StorageError::InvalidReference(reference.to_string()));
        }

        let value = if self.inner.read().content.contains_key(expected.digest()) {
            None
        } else {
            Some(read_all(content, expected).await?)
        };

        // blob and tag land under the same write lock
        let mut inner = self.inner.write();
        if let Some(value) = value {
            inner
                .content
                .entry(expected.digest().clone())
                .or_insert(value);
        }
        inner.tags.insert(reference.to_string(), expected.clone());
        tracing::trace!(digest = %expected.digest(), reference, "stored and tagged blob in memory");
        Ok(())
    }
}
