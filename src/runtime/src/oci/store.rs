//! Content store capability and a disk-backed implementation.
//!
//! The export pipeline only reads from a store through [`ContentStore`].
//! [`LocalImageStore`] keeps blobs content-addressed under
//! `blobs/<algorithm>/<hex>` with an in-memory reference index backed by
//! a persistent `index.json` file.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use imgpack_core::error::{ExportError, Result};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;
use tokio::sync::RwLock;

use super::descriptor::Descriptor;
use super::digest::Digest;
use super::reference::ImageReference;

/// Streaming reader over one blob's bytes.
pub type BlobReader = Box<dyn AsyncRead + Send + Unpin>;

/// Read-only access to a content-addressed image store.
///
/// Implementations must tolerate concurrent calls from several exports.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Root descriptor (index or manifest) the reference points at.
    async fn get_descriptor(&self, reference: &ImageReference) -> Result<Descriptor>;

    /// Raw JSON of an index or manifest document.
    async fn get_manifest_json(&self, descriptor: &Descriptor) -> Result<Vec<u8>>;

    /// Open a blob for streaming.
    async fn open_blob(&self, descriptor: &Descriptor) -> Result<BlobReader>;
}

#[async_trait]
impl<S: ContentStore + ?Sized> ContentStore for Arc<S> {
    async fn get_descriptor(&self, reference: &ImageReference) -> Result<Descriptor> {
        (**self).get_descriptor(reference).await
    }

    async fn get_manifest_json(&self, descriptor: &Descriptor) -> Result<Vec<u8>> {
        (**self).get_manifest_json(descriptor).await
    }

    async fn open_blob(&self, descriptor: &Descriptor) -> Result<BlobReader> {
        (**self).open_blob(descriptor).await
    }
}

/// A named image recorded in the local store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredImage {
    /// Canonical reference string (e.g., "docker.io/library/nginx:latest")
    pub reference: String,
    /// Root descriptor of the image
    pub descriptor: Descriptor,
    /// When the reference was recorded
    pub created_at: DateTime<Utc>,
}

/// Persistent index stored as JSON on disk.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreIndex {
    images: Vec<StoredImage>,
}

/// Disk-based content store with an in-memory reference index.
pub struct LocalImageStore {
    /// Root directory for image storage
    store_dir: PathBuf,
    /// In-memory index: reference → StoredImage
    index: Arc<RwLock<HashMap<String, StoredImage>>>,
}

impl LocalImageStore {
    /// Open a store rooted at `store_dir`.
    ///
    /// Creates the directory if it doesn't exist and loads any existing
    /// index from disk.
    pub fn new(store_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(store_dir.join("blobs")).map_err(|e| {
            ExportError::Store(format!(
                "Failed to create image store directory {}: {}",
                store_dir.display(),
                e
            ))
        })?;

        let images = Self::load_index(store_dir)?;
        Ok(Self {
            store_dir: store_dir.to_path_buf(),
            index: Arc::new(RwLock::new(images)),
        })
    }

    /// Get the store directory path.
    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    /// On-disk location of a blob.
    pub fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.store_dir.join(digest.blob_path())
    }

    /// Write a blob into the store, returning its descriptor.
    ///
    /// Writing content that is already present is a no-op.
    pub async fn put_blob(&self, media_type: &str, data: &[u8]) -> Result<Descriptor> {
        let digest = Digest::sha256(data);
        let path = self.blob_path(&digest);

        if !path.exists() {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    ExportError::Store(format!(
                        "Failed to create blob directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
            tokio::fs::write(&path, data).await.map_err(|e| {
                ExportError::Store(format!("Failed to write blob {}: {}", digest, e))
            })?;
        }

        Ok(Descriptor::new(media_type, digest, data.len() as i64))
    }

    /// Point a reference at a root descriptor already present in the store.
    pub async fn tag(
        &self,
        reference: &ImageReference,
        descriptor: Descriptor,
    ) -> Result<StoredImage> {
        if !self.blob_path(&descriptor.digest).exists() {
            return Err(ExportError::ReferenceNotFound(descriptor.digest.to_string()));
        }

        let stored = StoredImage {
            reference: reference.full_reference(),
            descriptor,
            created_at: Utc::now(),
        };

        // lock held through the save: index.json matches the map
        let mut index = self.index.write().await;
        index.insert(stored.reference.clone(), stored.clone());
        self.save_index_inner(&index).await?;
        drop(index);

        tracing::debug!(
            reference = %stored.reference,
            digest = %stored.descriptor.digest,
            "Tagged image"
        );
        Ok(stored)
    }

    /// Get a stored image by canonical reference string.
    pub async fn get(&self, reference: &str) -> Option<StoredImage> {
        let index = self.index.read().await;
        index.get(reference).cloned()
    }

    /// List all stored images, ordered by reference.
    pub async fn list(&self) -> Vec<StoredImage> {
        let index = self.index.read().await;
        let mut images: Vec<StoredImage> = index.values().cloned().collect();
        images.sort_by(|a, b| a.reference.cmp(&b.reference));
        images
    }

    /// Remove a reference. Blobs are left in place.
    pub async fn remove(&self, reference: &str) -> Result<()> {
        let mut index = self.index.write().await;
        if index.remove(reference).is_none() {
            return Err(ExportError::ReferenceNotFound(reference.to_string()));
        }
        self.save_index_inner(&index).await
    }

    /// Load index from disk.
    fn load_index(store_dir: &Path) -> Result<HashMap<String, StoredImage>> {
        let index_path = store_dir.join("index.json");
        if !index_path.exists() {
            return Ok(HashMap::new());
        }

        let data = std::fs::read_to_string(&index_path).map_err(|e| {
            ExportError::Store(format!(
                "Failed to read image store index {}: {}",
                index_path.display(),
                e
            ))
        })?;

        let store_index: StoreIndex = serde_json::from_str(&data).map_err(|e| {
            ExportError::Store(format!("Failed to parse image store index: {}", e))
        })?;

        Ok(store_index
            .images
            .into_iter()
            .map(|image| (image.reference.clone(), image))
            .collect())
    }

    /// Save index to disk.
    async fn save_index_inner(&self, index: &HashMap<String, StoredImage>) -> Result<()> {
        let mut images: Vec<StoredImage> = index.values().cloned().collect();
        images.sort_by(|a, b| a.reference.cmp(&b.reference));

        let data = serde_json::to_string_pretty(&StoreIndex { images })?;
        let index_path = self.store_dir.join("index.json");

        tokio::fs::write(&index_path, data).await.map_err(|e| {
            ExportError::Store(format!(
                "Failed to write image store index {}: {}",
                index_path.display(),
                e
            ))
        })
    }

    fn map_read_error(digest: &Digest, e: std::io::Error) -> ExportError {
        if e.kind() == ErrorKind::NotFound {
            ExportError::ReferenceNotFound(digest.to_string())
        } else {
            ExportError::Store(format!("Failed to read blob {}: {}", digest, e))
        }
    }
}

#[async_trait]
impl ContentStore for LocalImageStore {
    async fn get_descriptor(&self, reference: &ImageReference) -> Result<Descriptor> {
        let full_ref = reference.full_reference();
        let index = self.index.read().await;

        if let Some(stored) = index.get(&full_ref) {
            return Ok(stored.descriptor.clone());
        }

        // name@digest also resolves through any tag of the same repository
        if let Some(digest) = reference.digest() {
            let prefix = format!("{}:", reference.name());
            if let Some(stored) = index
                .values()
                .find(|img| img.reference.starts_with(&prefix) && &img.descriptor.digest == digest)
            {
                return Ok(stored.descriptor.clone());
            }
        }

        Err(ExportError::ReferenceNotFound(full_ref))
    }

    async fn get_manifest_json(&self, descriptor: &Descriptor) -> Result<Vec<u8>> {
        let path = self.blob_path(&descriptor.digest);
        tokio::fs::read(&path)
            .await
            .map_err(|e| Self::map_read_error(&descriptor.digest, e))
    }

    async fn open_blob(&self, descriptor: &Descriptor) -> Result<BlobReader> {
        let path = self.blob_path(&descriptor.digest);
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| Self::map_read_error(&descriptor.digest, e))?;
        Ok(Box::new(file))
    }
}
