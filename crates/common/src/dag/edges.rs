use crate::content::fetch_all;
use crate::descriptor::{media_type, Descriptor};
use crate::manifest::{ArtifactManifest, ImageIndex, ImageManifest, ManifestError};
use crate::storage::Fetcher;

use super::DagError;

/// How a node's content relates to the rest of the graph, decided
///  by media type alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Docker v2 or OCI image manifest
    ImageManifest,
    /// Docker manifest list or OCI image index
    ImageIndex,
    ArtifactManifest,
    /// Opaque content with no children. Unknown media types land here.
    Leaf,
}

impl NodeKind {
    pub fn of(media_type: &str) -> Self {
        match media_type {
            media_type::DOCKER_MANIFEST | media_type::OCI_MANIFEST => NodeKind::ImageManifest,
            media_type::DOCKER_MANIFEST_LIST | media_type::OCI_INDEX => NodeKind::ImageIndex,
            media_type::ARTIFACT_MANIFEST => NodeKind::ArtifactManifest,
            _ => NodeKind::Leaf,
        }
    }
}

/// Return the nodes directly referenced by `node`, its children.
///
/// Manifest-like content is fetched through `fetcher` and verified before
///  it is parsed. Child descriptors come back exactly as the document
///  lists them. Leaves return no children and cost no i/o.
pub async fn down_edges<F>(fetcher: &F, node: &Descriptor) -> Result<Vec<Descriptor>, DagError>
where
    F: Fetcher + ?Sized,
{
    let kind = NodeKind::of(node.media_type());
    if kind == NodeKind::Leaf {
        return Ok(Vec::new());
    }

    let content = fetch_all(fetcher, node).await?;
    let parse_error = |source: ManifestError| DagError::EdgeParse {
        digest: node.digest().clone(),
        media_type: node.media_type().to_string(),
        source,
    };

    match kind {
        // docker manifests and oci manifests share their edges
        NodeKind::ImageManifest => {
            let manifest = ImageManifest::from_slice(&content).map_err(parse_error)?;
            Ok(manifest.children())
        }
        NodeKind::ImageIndex => {
            let index = ImageIndex::from_slice(&content).map_err(parse_error)?;
            Ok(index.children())
        }
        NodeKind::ArtifactManifest => {
            let manifest = ArtifactManifest::from_slice(&content).map_err(parse_error)?;
            manifest.children().map_err(parse_error)
        }
        NodeKind::Leaf => Ok(Vec::new()),
    }
}
