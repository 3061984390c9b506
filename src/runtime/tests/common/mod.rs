//! Shared fixtures for export integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use imgpack_core::error::Result;
use imgpack_runtime::oci::descriptor::{
    MEDIA_TYPE_OCI_CONFIG, MEDIA_TYPE_OCI_INDEX, MEDIA_TYPE_OCI_LAYER_GZIP,
    MEDIA_TYPE_OCI_MANIFEST,
};
use imgpack_runtime::oci::digest::Digest;
use imgpack_runtime::oci::store::BlobReader;
use imgpack_runtime::{ContentStore, Descriptor, ImageReference, LocalImageStore, Platform};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// A temporary on-disk store.
pub struct Fixture {
    _dir: TempDir,
    pub store: Arc<LocalImageStore>,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(LocalImageStore::new(dir.path()).unwrap());
        Self { _dir: dir, store }
    }

    /// Store a single-platform image manifest and return its descriptor.
    pub async fn manifest(&self, config: &[u8], layers: &[&[u8]]) -> Descriptor {
        let config = self
            .store
            .put_blob(MEDIA_TYPE_OCI_CONFIG, config)
            .await
            .unwrap();
        let mut layer_descs = Vec::with_capacity(layers.len());
        for layer in layers {
            layer_descs.push(
                self.store
                    .put_blob(MEDIA_TYPE_OCI_LAYER_GZIP, layer)
                    .await
                    .unwrap(),
            );
        }
        let manifest = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": MEDIA_TYPE_OCI_MANIFEST,
            "config": config,
            "layers": layer_descs,
        });
        self.store
            .put_blob(MEDIA_TYPE_OCI_MANIFEST, &serde_json::to_vec(&manifest).unwrap())
            .await
            .unwrap()
    }

    /// Store an index over platform-specific manifests.
    pub async fn index(&self, children: Vec<(Descriptor, Platform)>) -> Descriptor {
        let manifests: Vec<Descriptor> = children
            .into_iter()
            .map(|(mut desc, platform)| {
                desc.platform = Some(platform);
                desc
            })
            .collect();
        let index = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": MEDIA_TYPE_OCI_INDEX,
            "manifests": manifests,
        });
        self.store
            .put_blob(MEDIA_TYPE_OCI_INDEX, &serde_json::to_vec(&index).unwrap())
            .await
            .unwrap()
    }

    pub async fn tag(&self, reference: &str, descriptor: &Descriptor) {
        self.store
            .tag(&ImageReference::parse(reference).unwrap(), descriptor.clone())
            .await
            .unwrap();
    }

    /// Overwrite a stored blob in place, keeping its length.
    pub fn corrupt(&self, digest: &Digest) {
        let path = self.store.blob_path(digest);
        let mut data = std::fs::read(&path).unwrap();
        for byte in data.iter_mut() {
            *byte = byte.wrapping_add(1);
        }
        std::fs::write(&path, data).unwrap();
    }
}

/// Regular-file entries of a tar archive, in archive order.
pub fn read_archive(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut archive = tar::Archive::new(bytes);
    archive
        .entries()
        .unwrap()
        .filter_map(|entry| {
            let mut entry = entry.unwrap();
            if !entry.header().entry_type().is_file() {
                return None;
            }
            let path = entry.path().unwrap().to_string_lossy().into_owned();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            Some((path, data))
        })
        .collect()
}

pub fn archive_map(bytes: &[u8]) -> HashMap<String, Vec<u8>> {
    read_archive(bytes).into_iter().collect()
}

pub fn paths(entries: &[(String, Vec<u8>)]) -> Vec<&str> {
    entries.iter().map(|(p, _)| p.as_str()).collect()
}

/// Store wrapper that cancels a token when the Nth blob is opened.
pub struct CancellingStore<S> {
    inner: S,
    cancel: CancellationToken,
    trigger_at: usize,
    opened: AtomicUsize,
}

impl<S> CancellingStore<S> {
    pub fn new(inner: S, cancel: CancellationToken, trigger_at: usize) -> Self {
        Self {
            inner,
            cancel,
            trigger_at,
            opened: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl<S: ContentStore> ContentStore for CancellingStore<S> {
    async fn get_descriptor(&self, reference: &ImageReference) -> Result<Descriptor> {
        self.inner.get_descriptor(reference).await
    }

    async fn get_manifest_json(&self, descriptor: &Descriptor) -> Result<Vec<u8>> {
        self.inner.get_manifest_json(descriptor).await
    }

    async fn open_blob(&self, descriptor: &Descriptor) -> Result<BlobReader> {
        if self.opened.fetch_add(1, Ordering::SeqCst) + 1 == self.trigger_at {
            self.cancel.cancel();
        }
        self.inner.open_blob(descriptor).await
    }
}
