//! Streaming writer for Docker/OCI image archives.
//!
//! The produced tar is both a Docker Image Spec v1.2 archive and an OCI
//! image layout:
//!
//! ```text
//! blobs/
//! blobs/sha256/
//! blobs/sha256/<layer>      layers, then configs, manifests, indexes
//! oci-layout                {"imageLayoutVersion":"1.0.0"}
//! manifest.json             Docker: Config / RepoTags / Layers per image
//! index.json                OCI: one root descriptor per reference (last)
//! ```
//!
//! Entries are appended in a single pass with no seeking. `index.json` is
//! written last, so an archive without it is known to be incomplete.

use std::collections::HashSet;

use imgpack_core::config::ExportConfig;
use imgpack_core::error::{ExportError, Result};
use serde::{Deserialize, Serialize};
use tar::{EntryType, Header};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use super::descriptor::{Descriptor, MEDIA_TYPE_OCI_INDEX};
use super::digest::{Digest, DigestAlgorithm};
use super::export_set::ExportSet;
use super::store::ContentStore;
use super::walker::{ManifestNode, WalkedImage};

/// Tar block size.
const BLOCK_SIZE: usize = 512;

/// Longest name a plain ustar header can carry without a prefix split.
const MAX_NAME_LEN: usize = 100;

/// OCI layout marker file content.
const OCI_LAYOUT: &str = r#"{"imageLayoutVersion":"1.0.0"}"#;

/// Annotation carrying the full image name.
pub const ANNOTATION_IMAGE_NAME: &str = "io.containerd.image.name";

/// Annotation carrying the tag.
pub const ANNOTATION_REF_NAME: &str = "org.opencontainers.image.ref.name";

/// One image record in the Docker `manifest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ArchiveManifestEntry {
    /// Archive path of the config blob
    pub config: String,
    /// Familiar `name:tag` strings for this image
    pub repo_tags: Vec<String>,
    /// Archive paths of the layer blobs, bottom to top
    pub layers: Vec<String>,
}

/// Counters reported after a successful write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveStats {
    /// Unique blobs written
    pub blobs: usize,
    /// Total bytes written to the sink
    pub bytes_written: u64,
}

/// Writes an image archive to an ordered byte sink.
pub struct ArchiveWriter<W> {
    sink: W,
    config: ExportConfig,
    bytes_written: u64,
    dirs_written: HashSet<DigestAlgorithm>,
}

impl<W: AsyncWrite + Unpin + Send> ArchiveWriter<W> {
    pub fn new(sink: W, config: ExportConfig) -> Self {
        Self {
            sink,
            config,
            bytes_written: 0,
            dirs_written: HashSet::new(),
        }
    }

    /// Give back the sink.
    pub fn into_inner(self) -> W {
        self.sink
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Write the whole archive: every blob in `set`, then the format
    /// documents derived from `images`, then the trailing `index.json`.
    pub async fn write_archive<S: ContentStore + ?Sized>(
        &mut self,
        store: &S,
        images: &[WalkedImage],
        set: &ExportSet,
        cancel: &CancellationToken,
    ) -> Result<ArchiveStats> {
        let docker_entries = docker_manifest(images, set)?;
        let oci_index = oci_index(images, set)?;

        let mut blobs = 0;
        for entry in set.ordered() {
            if cancel.is_cancelled() {
                return Err(ExportError::Cancelled);
            }
            self.write_blob(store, &entry.descriptor).await?;
            blobs += 1;
        }

        if cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }

        self.write_file("oci-layout", OCI_LAYOUT.as_bytes()).await?;
        self.write_file("manifest.json", &serde_json::to_vec(&docker_entries)?)
            .await?;
        self.write_file("index.json", &serde_json::to_vec(&oci_index)?)
            .await?;
        self.finish().await?;

        Ok(ArchiveStats {
            blobs,
            bytes_written: self.bytes_written,
        })
    }

    /// Stream one blob into the archive, verifying size and digest.
    pub async fn write_blob<S: ContentStore + ?Sized>(
        &mut self,
        store: &S,
        descriptor: &Descriptor,
    ) -> Result<()> {
        let digest = &descriptor.digest;
        let expected = u64::try_from(descriptor.size).map_err(|_| {
            ExportError::StoreInconsistency {
                digest: digest.to_string(),
                message: format!("negative size {}", descriptor.size),
            }
        })?;

        let mut reader = store.open_blob(descriptor).await?;

        self.ensure_blob_dirs(digest.algorithm()).await?;
        let mode = self.config.blob_mode;
        self.write_header(&digest.blob_path(), expected, mode, EntryType::Regular)
            .await?;

        let mut hasher = digest.algorithm().hasher();
        let mut buf = vec![0u8; self.config.copy_buffer_size];
        let mut copied: u64 = 0;
        loop {
            let n = reader.read(&mut buf).await.map_err(|e| {
                ExportError::Store(format!("Failed to read blob {}: {}", digest, e))
            })?;
            if n == 0 {
                break;
            }
            if copied + n as u64 > expected {
                return Err(ExportError::DigestMismatch {
                    expected: digest.to_string(),
                    actual: format!("blob longer than {} bytes", expected),
                });
            }
            hasher.update(&buf[..n]);
            self.write_raw(&buf[..n]).await?;
            copied += n as u64;
        }

        let actual = hasher.finish();
        if copied != expected {
            return Err(ExportError::DigestMismatch {
                expected: digest.to_string(),
                actual: format!("{} ({} of {} bytes)", actual, copied, expected),
            });
        }
        if &actual != digest {
            return Err(ExportError::DigestMismatch {
                expected: digest.to_string(),
                actual: actual.to_string(),
            });
        }

        self.pad(expected).await?;

        tracing::debug!(digest = %digest, size = expected, "Wrote blob");
        Ok(())
    }

    /// Write a small in-memory file entry.
    pub async fn write_file(&mut self, path: &str, data: &[u8]) -> Result<()> {
        self.write_header(path, data.len() as u64, 0o644, EntryType::Regular)
            .await?;
        self.write_raw(data).await?;
        self.pad(data.len() as u64).await
    }

    /// Write the end-of-archive marker and flush.
    async fn finish(&mut self) -> Result<()> {
        self.write_raw(&[0u8; BLOCK_SIZE * 2]).await?;
        self.sink.flush().await.map_err(ExportError::SinkError)
    }

    async fn ensure_blob_dirs(&mut self, algorithm: DigestAlgorithm) -> Result<()> {
        if self.dirs_written.is_empty() {
            self.write_header("blobs", 0, 0o755, EntryType::Directory)
                .await?;
        }
        if self.dirs_written.insert(algorithm) {
            let dir = format!("blobs/{}", algorithm.name());
            self.write_header(&dir, 0, 0o755, EntryType::Directory)
                .await?;
        }
        Ok(())
    }

    async fn write_header(
        &mut self,
        path: &str,
        size: u64,
        mode: u32,
        entry_type: EntryType,
    ) -> Result<()> {
        if path.len() > MAX_NAME_LEN {
            return self.write_long_header(path, size, mode, entry_type).await;
        }

        let mut header = Header::new_ustar();
        header.set_path(path).map_err(ExportError::SinkError)?;
        fill_header(&mut header, size, mode, entry_type);
        self.write_raw(header.as_bytes()).await
    }

    /// GNU long-name form: a `././@LongLink` entry holding the path,
    /// followed by a header with the truncated name.
    async fn write_long_header(
        &mut self,
        path: &str,
        size: u64,
        mode: u32,
        entry_type: EntryType,
    ) -> Result<()> {
        let name_len = path.len() as u64 + 1;
        let mut long = Header::new_gnu();
        long.set_path("././@LongLink")
            .map_err(ExportError::SinkError)?;
        fill_header(&mut long, name_len, 0o644, EntryType::GNULongName);
        self.write_raw(long.as_bytes()).await?;
        self.write_raw(path.as_bytes()).await?;
        self.write_raw(&[0u8]).await?;
        self.pad(name_len).await?;

        let mut header = Header::new_gnu();
        header.as_old_mut().name[..MAX_NAME_LEN]
            .copy_from_slice(&path.as_bytes()[..MAX_NAME_LEN]);
        fill_header(&mut header, size, mode, entry_type);
        self.write_raw(header.as_bytes()).await
    }

    async fn pad(&mut self, size: u64) -> Result<()> {
        let remainder = (size % BLOCK_SIZE as u64) as usize;
        if remainder != 0 {
            self.write_raw(&[0u8; BLOCK_SIZE][..BLOCK_SIZE - remainder])
                .await?;
        }
        Ok(())
    }

    async fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        self.sink
            .write_all(data)
            .await
            .map_err(ExportError::SinkError)?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }
}

/// Set everything but the name, then the checksum.
fn fill_header(header: &mut Header, size: u64, mode: u32, entry_type: EntryType) {
    header.set_entry_type(entry_type);
    header.set_size(size);
    header.set_mode(mode);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    header.set_cksum();
}

/// Build the Docker `manifest.json` entries.
///
/// Images resolving to the same manifest share one entry with merged
/// RepoTags. An index root selecting several manifests cannot be expressed
/// in this format and is left to `index.json` alone.
pub fn docker_manifest(images: &[WalkedImage], set: &ExportSet) -> Result<Vec<ArchiveManifestEntry>> {
    let mut entries: Vec<(Digest, ArchiveManifestEntry)> = Vec::new();

    for image in images {
        let manifests = image.root.manifests();
        let (digest, config, layers) = match manifests.as_slice() {
            [ManifestNode::Manifest {
                descriptor,
                config,
                layers,
            }] => (&descriptor.digest, config, layers),
            _ => {
                tracing::warn!(
                    reference = %image.reference,
                    manifests = manifests.len(),
                    "Image has no single-platform manifest; omitted from manifest.json"
                );
                continue;
            }
        };

        require_member(set, &config.digest)?;
        for layer in layers {
            require_member(set, &layer.digest)?;
        }

        let repo_tag = image
            .reference
            .tag()
            .map(|_| familiar_name(&image.reference.full_reference()));

        match entries.iter_mut().find(|(d, _)| d == digest) {
            Some((_, entry)) => {
                if let Some(tag) = repo_tag {
                    if !entry.repo_tags.contains(&tag) {
                        entry.repo_tags.push(tag);
                    }
                }
            }
            None => entries.push((
                digest.clone(),
                ArchiveManifestEntry {
                    config: config.digest.blob_path(),
                    repo_tags: repo_tag.into_iter().collect(),
                    layers: layers.iter().map(|l| l.digest.blob_path()).collect(),
                },
            )),
        }
    }

    Ok(entries.into_iter().map(|(_, entry)| entry).collect())
}

/// Build the OCI `index.json` document.
pub fn oci_index(images: &[WalkedImage], set: &ExportSet) -> Result<serde_json::Value> {
    let mut manifests = Vec::with_capacity(images.len());
    for image in images {
        let root = image.root.descriptor();
        require_member(set, &root.digest)?;

        let mut annotations = serde_json::Map::new();
        annotations.insert(
            ANNOTATION_IMAGE_NAME.to_string(),
            image.reference.full_reference().into(),
        );
        if let Some(tag) = image.reference.tag() {
            annotations.insert(ANNOTATION_REF_NAME.to_string(), tag.into());
        }

        let mut entry = serde_json::to_value(root)?;
        entry["annotations"] = serde_json::Value::Object(annotations);
        manifests.push(entry);
    }

    Ok(serde_json::json!({
        "schemaVersion": 2,
        "mediaType": MEDIA_TYPE_OCI_INDEX,
        "manifests": manifests,
    }))
}

fn require_member(set: &ExportSet, digest: &Digest) -> Result<()> {
    if set.contains(digest) {
        Ok(())
    } else {
        Err(ExportError::StoreInconsistency {
            digest: digest.to_string(),
            message: "referenced by an image but missing from the export set".to_string(),
        })
    }
}

/// Shorten a canonical name the way Docker displays it
/// (`docker.io/library/nginx:1` → `nginx:1`).
pub fn familiar_name(full: &str) -> String {
    match full.strip_prefix("docker.io/") {
        Some(rest) => rest.strip_prefix("library/").unwrap_or(rest).to_string(),
        None => full.to_string(),
    }
}
