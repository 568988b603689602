//! Copying graphs into and out of the SQLite + object storage backend

use std::sync::Arc;

use common::prelude::*;
use conveyor_object_store::{ObjectStore, ObjectStoreConfig};

async fn put(store: &MemoryStore, media_type: &str, content: &[u8]) -> Descriptor {
    let desc = Descriptor::from_content(media_type, content);
    store.push_bytes(&desc, content.to_vec()).await.unwrap();
    desc
}

/// Two-platform index with a layer shared between the platforms
async fn multi_platform(store: &MemoryStore) -> (Descriptor, Vec<Descriptor>) {
    let base = put(store, media_type::OCI_LAYER, b"base layer").await;
    let mut nodes = vec![base.clone()];
    let mut manifests = Vec::new();
    for platform in ["linux/amd64", "linux/arm64"] {
        let config = put(
            store,
            media_type::OCI_CONFIG,
            format!("{{\"platform\":\"{platform}\"}}").as_bytes(),
        )
        .await;
        let layer = put(store, media_type::OCI_LAYER, platform.as_bytes()).await;
        let manifest = ImageManifest::new(config.clone(), vec![base.clone(), layer.clone()]);
        let manifest = put(
            store,
            media_type::OCI_MANIFEST,
            &serde_json::to_vec(&manifest).unwrap(),
        )
        .await;
        nodes.extend([config, layer, manifest.clone()]);
        manifests.push(manifest);
    }
    let index = put(
        store,
        media_type::OCI_INDEX,
        &serde_json::to_vec(&ImageIndex::new(manifests)).unwrap(),
    )
    .await;
    nodes.push(index.clone());
    (index, nodes)
}

#[tokio::test]
async fn test_copy_memory_to_object_store() {
    let src = MemoryStore::new();
    let (index, nodes) = multi_platform(&src).await;
    src.tag(&index, "v1").await.unwrap();
    let dst = Arc::new(ObjectStore::new_ephemeral().await.unwrap());

    let root = copy(
        Arc::new(src),
        "v1",
        dst.clone(),
        "release",
        &CopyOptions::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(root, index);
    assert_eq!(dst.resolve("release").await.unwrap(), index);
    for node in &nodes {
        assert!(dst.exists(node).await.unwrap(), "{node} missing");
    }
    assert!(dst.resolve("v1").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_copy_between_local_object_stores() {
    let src_dir = tempfile::tempdir().unwrap();
    let dst_dir = tempfile::tempdir().unwrap();

    let seed = MemoryStore::new();
    let (index, nodes) = multi_platform(&seed).await;
    seed.tag(&index, "v1").await.unwrap();

    let src = Arc::new(ObjectStore::new_local(src_dir.path()).await.unwrap());
    copy(
        Arc::new(seed),
        "v1",
        src.clone(),
        "",
        &CopyOptions::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    let dst = Arc::new(
        ObjectStore::in_memory(ObjectStoreConfig::Local {
            path: dst_dir.path().join("objects"),
        })
        .await
        .unwrap(),
    );
    let stats = copy_graph(
        src.clone(),
        dst.clone(),
        &index,
        &CopyOptions { concurrency: 1 },
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(stats.copied, nodes.len());
    assert_eq!(stats.skipped, 0);

    // second run finds everything in place
    let stats = copy_graph(
        src,
        dst.clone(),
        &index,
        &CopyOptions::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(stats.copied, 0);
    assert_eq!(stats.skipped, nodes.len());

    for node in &nodes {
        let content = common::content::fetch_all(dst.as_ref(), node).await.unwrap();
        assert_eq!(content.len() as i64, node.size());
    }
}
