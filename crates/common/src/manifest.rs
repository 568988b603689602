//! # Manifests
//!
//! Schemas for the manifest-like documents whose content lists child
//! descriptors. Only the fields that matter for graph traversal are
//! modelled; anything else in the document is ignored on parse.
//!
//! - [`ImageManifest`]: Docker v2 and OCI image manifests (`config` + `layers`)
//! - [`ImageIndex`]: Docker manifest lists and OCI image indices (`manifests`)
//! - [`ArtifactManifest`]: ORAS artifact manifests (`subject` + `blobs`)

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::content::fetch_all;
use crate::descriptor::{media_type, Descriptor, Digest};
use crate::storage::{Fetcher, Resolver, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("malformed manifest: {0}")]
    Json(#[from] serde_json::Error),
    #[error("artifact subject has no digest")]
    SubjectWithoutDigest,
    #[error("artifact subject has invalid size {0}")]
    SubjectInvalidSize(i64),
}

/// Image manifest, shared by the Docker v2 and OCI variants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub config: Descriptor,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl ImageManifest {
    pub fn new(config: Descriptor, layers: Vec<Descriptor>) -> Self {
        Self {
            schema_version: 2,
            media_type: Some(media_type::OCI_MANIFEST.to_string()),
            config,
            layers,
            annotations: None,
        }
    }

    pub fn from_slice(data: &[u8]) -> Result<Self, ManifestError> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Config first, then layers in listed order
    pub fn children(&self) -> Vec<Descriptor> {
        let mut children = Vec::with_capacity(self.layers.len() + 1);
        children.push(self.config.clone());
        children.extend(self.layers.iter().cloned());
        children
    }
}

/// Image index, shared by Docker manifest lists and OCI indices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageIndex {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default)]
    pub manifests: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl ImageIndex {
    pub fn new(manifests: Vec<Descriptor>) -> Self {
        Self {
            schema_version: 2,
            media_type: Some(media_type::OCI_INDEX.to_string()),
            manifests,
            annotations: None,
        }
    }

    pub fn from_slice(data: &[u8]) -> Result<Self, ManifestError> {
        Ok(serde_json::from_slice(data)?)
    }

    pub fn children(&self) -> Vec<Descriptor> {
        self.manifests.clone()
    }
}

/// Descriptor as it appears in an artifact manifest's `subject`.
///
/// Every field is optional on the wire, and a subject whose fields are
///  all zero values is the same as no subject at all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactDescriptor {
    #[serde(default)]
    pub media_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<Digest>,
    #[serde(default)]
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urls: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl ArtifactDescriptor {
    pub fn is_empty(&self) -> bool {
        self.media_type.is_empty()
            && self.artifact_type.is_none()
            && self.digest.is_none()
            && self.size == 0
            && self.urls.is_none()
            && self.annotations.is_none()
    }

    /// Convert to a regular descriptor, keeping every field as written
    pub fn to_descriptor(&self) -> Result<Descriptor, ManifestError> {
        let digest = self
            .digest
            .clone()
            .ok_or(ManifestError::SubjectWithoutDigest)?;
        let mut desc = Descriptor::new(self.media_type.clone(), digest, self.size)
            .map_err(|_| ManifestError::SubjectInvalidSize(self.size))?;
        if let Some(urls) = &self.urls {
            desc = desc.with_urls(urls.clone());
        }
        if let Some(annotations) = &self.annotations {
            desc = desc.with_annotations(annotations.clone());
        }
        if let Some(artifact_type) = &self.artifact_type {
            desc = desc.with_artifact_type(artifact_type.clone());
        }
        Ok(desc)
    }
}

impl From<&Descriptor> for ArtifactDescriptor {
    fn from(desc: &Descriptor) -> Self {
        Self {
            media_type: desc.media_type().to_string(),
            artifact_type: desc.artifact_type().map(str::to_string),
            digest: Some(desc.digest().clone()),
            size: desc.size(),
            urls: desc.urls().map(<[String]>::to_vec),
            annotations: desc.annotations().cloned(),
        }
    }
}

/// ORAS artifact manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactManifest {
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub artifact_type: String,
    #[serde(default)]
    pub blobs: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<ArtifactDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl ArtifactManifest {
    pub fn new(artifact_type: impl Into<String>, blobs: Vec<Descriptor>) -> Self {
        Self {
            media_type: media_type::ARTIFACT_MANIFEST.to_string(),
            artifact_type: artifact_type.into(),
            blobs,
            subject: None,
            annotations: None,
        }
    }

    pub fn with_subject(mut self, subject: &Descriptor) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn from_slice(data: &[u8]) -> Result<Self, ManifestError> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Subject first when present and not empty, then blobs in listed order
    pub fn children(&self) -> Result<Vec<Descriptor>, ManifestError> {
        let mut children = Vec::with_capacity(self.blobs.len() + 1);
        if let Some(subject) = self.subject.as_ref().filter(|s| !s.is_empty()) {
            children.push(subject.to_descriptor()?);
        }
        children.extend(self.blobs.iter().cloned());
        Ok(children)
    }
}

/// Resolve `reference` and fetch the verified manifest bytes it points at
pub async fn get_manifest<T>(target: &T, reference: &str) -> Result<(Bytes, Descriptor), StorageError>
where
    T: Resolver + Fetcher + ?Sized,
{
    let desc = target.resolve(reference).await?;
    let content = fetch_all(target, &desc).await?;
    Ok((content, desc))
}
