//! # Descriptors
//!
//! A [`Descriptor`] names a piece of content by its [`Digest`] and declared
//! size, along with the media type that decides how the content is
//! interpreted. Descriptors are the unit of addressing for every other
//! module: stores key on them, the walker dedups on them and the verified
//! reader checks bytes against them.
//!
//! Identity is the digest alone. Two descriptors with equal digests denote
//! the same content, whatever their annotations or URLs say.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256, Sha384, Sha512};

/// Well known media types.
pub mod media_type {
    pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
    pub const DOCKER_MANIFEST_LIST: &str =
        "application/vnd.docker.distribution.manifest.list.v2+json";
    pub const DOCKER_CONFIG: &str = "application/vnd.docker.container.image.v1+json";
    pub const DOCKER_LAYER: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

    pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
    pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
    pub const OCI_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
    pub const OCI_LAYER: &str = "application/vnd.oci.image.layer.v1.tar";
    pub const OCI_LAYER_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

    pub const ARTIFACT_MANIFEST: &str = "application/vnd.cncf.oras.artifact.manifest.v1+json";

    pub const OCTET_STREAM: &str = "application/octet-stream";
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DigestError {
    #[error("digest {0:?} is missing the algorithm separator")]
    MissingSeparator(String),
    #[error("unsupported digest algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("invalid {algorithm} digest encoding: {encoded:?}")]
    InvalidEncoding {
        algorithm: DigestAlgorithm,
        encoded: String,
    },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("invalid descriptor size: {0}")]
    InvalidSize(i64),
}

/// Hash algorithms a digest may be tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DigestAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha384 => "sha384",
            DigestAlgorithm::Sha512 => "sha512",
        }
    }

    /// Length of the lowercase hex encoding of a digest
    ///  produced by this algorithm
    pub fn encoded_len(&self) -> usize {
        match self {
            DigestAlgorithm::Sha256 => 64,
            DigestAlgorithm::Sha384 => 96,
            DigestAlgorithm::Sha512 => 128,
        }
    }

    /// Start a streaming hash computation
    pub fn digester(&self) -> Digester {
        match self {
            DigestAlgorithm::Sha256 => Digester::Sha256(Sha256::new()),
            DigestAlgorithm::Sha384 => Digester::Sha384(Sha384::new()),
            DigestAlgorithm::Sha512 => Digester::Sha512(Sha512::new()),
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha256" => Ok(DigestAlgorithm::Sha256),
            "sha384" => Ok(DigestAlgorithm::Sha384),
            "sha512" => Ok(DigestAlgorithm::Sha512),
            other => Err(DigestError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// Running hash over a byte stream.
///
/// Fed incrementally with [`Digester::update`] and consumed by
///  [`Digester::finalize`], so content of any size can be hashed
///  without holding it in memory.
#[derive(Clone)]
pub enum Digester {
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl Digester {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Digester::Sha256(h) => h.update(data),
            Digester::Sha384(h) => h.update(data),
            Digester::Sha512(h) => h.update(data),
        }
    }

    pub fn finalize(self) -> Digest {
        let (algorithm, encoded) = match self {
            Digester::Sha256(h) => (DigestAlgorithm::Sha256, hex::encode(h.finalize())),
            Digester::Sha384(h) => (DigestAlgorithm::Sha384, hex::encode(h.finalize())),
            Digester::Sha512(h) => (DigestAlgorithm::Sha512, hex::encode(h.finalize())),
        };
        Digest { algorithm, encoded }
    }
}

impl fmt::Debug for Digester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let algorithm = match self {
            Digester::Sha256(_) => DigestAlgorithm::Sha256,
            Digester::Sha384(_) => DigestAlgorithm::Sha384,
            Digester::Sha512(_) => DigestAlgorithm::Sha512,
        };
        f.debug_tuple("Digester").field(&algorithm).finish()
    }
}

/// An algorithm-tagged content hash, written `<algorithm>:<hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    algorithm: DigestAlgorithm,
    encoded: String,
}

impl Digest {
    /// Hash `data` with the given algorithm
    pub fn from_bytes(algorithm: DigestAlgorithm, data: &[u8]) -> Self {
        let mut digester = algorithm.digester();
        digester.update(data);
        digester.finalize()
    }

    /// SHA-256 of `data`, the canonical algorithm for new content
    pub fn sha256(data: &[u8]) -> Self {
        Self::from_bytes(DigestAlgorithm::Sha256, data)
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// The hex portion of the digest
    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    /// A fresh digester for the same algorithm, used to verify
    ///  content claimed to match this digest
    pub fn digester(&self) -> Digester {
        self.algorithm.digester()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.encoded)
    }
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algorithm, encoded) = s
            .split_once(':')
            .ok_or_else(|| DigestError::MissingSeparator(s.to_string()))?;
        let algorithm: DigestAlgorithm = algorithm.parse()?;

        let well_formed = encoded.len() == algorithm.encoded_len()
            && encoded
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !well_formed {
            return Err(DigestError::InvalidEncoding {
                algorithm,
                encoded: encoded.to_string(),
            });
        }

        Ok(Self {
            algorithm,
            encoded: encoded.to_string(),
        })
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Describes a piece of targeted content.
///
/// Serialized in the standard OCI descriptor shape. Fields are private
///  so a descriptor handed to the library is never changed underneath
///  the caller; use the `with_*` builders to derive new values.
///
/// `==` is structural and compares every field, annotations and urls
///  included. Content identity is the digest alone: use
///  [`Descriptor::same_content`] to ask whether two descriptors address
///  the same bytes. The walker and copier only ever key nodes by digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    media_type: String,
    digest: Digest,
    size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    urls: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    annotations: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    artifact_type: Option<String>,
}

impl Descriptor {
    /// Create a descriptor, rejecting negative sizes
    pub fn new(
        media_type: impl Into<String>,
        digest: Digest,
        size: i64,
    ) -> Result<Self, DescriptorError> {
        if size < 0 {
            return Err(DescriptorError::InvalidSize(size));
        }
        Ok(Self {
            media_type: media_type.into(),
            digest,
            size,
            urls: None,
            annotations: None,
            artifact_type: None,
        })
    }

    /// Describe in-memory content, digesting it with SHA-256
    pub fn from_content(media_type: impl Into<String>, content: &[u8]) -> Self {
        Self {
            media_type: media_type.into(),
            digest: Digest::sha256(content),
            // slices never exceed isize::MAX bytes
            size: content.len() as i64,
            urls: None,
            annotations: None,
            artifact_type: None,
        }
    }

    pub fn with_urls(mut self, urls: Vec<String>) -> Self {
        self.urls = Some(urls);
        self
    }

    pub fn with_annotations(mut self, annotations: BTreeMap<String, String>) -> Self {
        self.annotations = Some(annotations);
        self
    }

    pub fn with_artifact_type(mut self, artifact_type: impl Into<String>) -> Self {
        self.artifact_type = Some(artifact_type.into());
        self
    }

    /// Check invariants that deserialization cannot enforce
    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.size < 0 {
            return Err(DescriptorError::InvalidSize(self.size));
        }
        Ok(())
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    pub fn size(&self) -> i64 {
        self.size
    }

    pub fn urls(&self) -> Option<&[String]> {
        self.urls.as_deref()
    }

    pub fn annotations(&self) -> Option<&BTreeMap<String, String>> {
        self.annotations.as_ref()
    }

    pub fn artifact_type(&self) -> Option<&str> {
        self.artifact_type.as_deref()
    }

    /// Whether both descriptors address the same content
    pub fn same_content(&self, other: &Descriptor) -> bool {
        self.digest == other.digest
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {} bytes)", self.digest, self.media_type, self.size)
    }
}
