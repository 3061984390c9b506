//! Manifest graph traversal.
//!
//! Follows a reference from its root descriptor down through indexes and
//! manifests to config and layer descriptors. Only index and manifest
//! documents are fetched; layer bytes are left to the archive writer.

use std::future::Future;
use std::pin::Pin;

use imgpack_core::error::{ExportError, Result};
use oci_spec::image::{ImageIndex, ImageManifest};

use super::descriptor::{BlobRole, Descriptor, Platform, RoledDescriptor};
use super::digest::Digest;
use super::reference::ImageReference;
use super::store::ContentStore;

/// A resolved node of the manifest graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestNode {
    /// Multi-platform index; children hold only the selected entries.
    Index {
        descriptor: Descriptor,
        children: Vec<ManifestNode>,
    },
    /// Single-platform image manifest.
    Manifest {
        descriptor: Descriptor,
        config: Descriptor,
        layers: Vec<Descriptor>,
    },
}

impl ManifestNode {
    pub fn descriptor(&self) -> &Descriptor {
        match self {
            Self::Index { descriptor, .. } | Self::Manifest { descriptor, .. } => descriptor,
        }
    }

    /// Leaf manifests under this node, in document order.
    pub fn manifests(&self) -> Vec<&ManifestNode> {
        let mut out = Vec::new();
        self.collect_manifests(&mut out);
        out
    }

    fn collect_manifests<'a>(&'a self, out: &mut Vec<&'a ManifestNode>) {
        match self {
            Self::Manifest { .. } => out.push(self),
            Self::Index { children, .. } => {
                for child in children {
                    child.collect_manifests(out);
                }
            }
        }
    }
}

/// Result of walking one image reference.
#[derive(Debug, Clone)]
pub struct WalkedImage {
    pub reference: ImageReference,
    pub root: ManifestNode,
    /// Every blob the image needs, in discovery order.
    pub descriptors: Vec<RoledDescriptor>,
}

type NodeFuture<'a> = Pin<Box<dyn Future<Output = Result<ManifestNode>> + Send + 'a>>;

/// Walks manifest graphs in a content store.
pub struct ManifestWalker<'a, S: ContentStore + ?Sized> {
    store: &'a S,
    platform: Option<&'a Platform>,
    max_depth: usize,
}

impl<'a, S: ContentStore + ?Sized> ManifestWalker<'a, S> {
    /// Create a walker. With `platform` set, each index contributes only
    /// its first manifest matching that platform.
    pub fn new(store: &'a S, platform: Option<&'a Platform>, max_depth: usize) -> Self {
        Self {
            store,
            platform,
            max_depth,
        }
    }

    /// Resolve `reference` and walk its manifest graph.
    pub async fn walk(&self, reference: &ImageReference) -> Result<WalkedImage> {
        let root_descriptor = self.store.get_descriptor(reference).await?;

        if let (Some(filter), Some(platform)) = (self.platform, &root_descriptor.platform) {
            if !filter.matches(platform) {
                return Err(self.platform_not_found(reference, filter));
            }
        }

        let root = self.walk_node(root_descriptor, 0).await?;

        if let Some(filter) = self.platform {
            if root.manifests().is_empty() {
                return Err(self.platform_not_found(reference, filter));
            }
        }

        let mut descriptors = Vec::new();
        flatten(&root, &mut descriptors);

        tracing::debug!(
            reference = %reference,
            digest = %root.descriptor().digest,
            manifests = root.manifests().len(),
            blobs = descriptors.len(),
            "Walked manifest graph"
        );

        Ok(WalkedImage {
            reference: reference.clone(),
            root,
            descriptors,
        })
    }

    fn platform_not_found(&self, reference: &ImageReference, filter: &Platform) -> ExportError {
        ExportError::PlatformNotFound {
            reference: reference.full_reference(),
            platform: filter.to_string(),
        }
    }

    fn walk_node(&self, descriptor: Descriptor, depth: usize) -> NodeFuture<'_> {
        Box::pin(async move {
            if depth >= self.max_depth {
                return Err(ExportError::MalformedManifest(format!(
                    "manifest nesting exceeds {} levels at {}",
                    self.max_depth, descriptor.digest
                )));
            }

            let json = self.store.get_manifest_json(&descriptor).await?;
            verify_document(&descriptor, &json)?;

            match classify(&descriptor, &json)? {
                NodeKind::Manifest => parse_manifest(descriptor, &json),
                NodeKind::Index => {
                    let index: ImageIndex = serde_json::from_slice(&json).map_err(|e| {
                        ExportError::MalformedManifest(format!(
                            "invalid index {}: {}",
                            descriptor.digest, e
                        ))
                    })?;
                    let entries = index
                        .manifests()
                        .iter()
                        .map(|d| Descriptor::from_oci(d).map_err(ExportError::MalformedManifest))
                        .collect::<Result<Vec<_>>>()?;

                    let children = self.walk_children(entries, depth).await?;
                    Ok(ManifestNode::Index {
                        descriptor,
                        children,
                    })
                }
            }
        })
    }

    async fn walk_children(
        &self,
        entries: Vec<Descriptor>,
        depth: usize,
    ) -> Result<Vec<ManifestNode>> {
        let filter = match self.platform {
            Some(filter) => filter,
            None => {
                let mut children = Vec::with_capacity(entries.len());
                for entry in entries {
                    children.push(self.walk_node(entry, depth + 1).await?);
                }
                return Ok(children);
            }
        };

        // manifests without a platform are taken only when nothing matches
        let mut unlabelled = None;
        for entry in entries {
            let nested_index =
                entry.is_index() || (!entry.is_manifest() && entry.platform.is_none());
            if nested_index {
                let child = self.walk_node(entry, depth + 1).await?;
                if !child.manifests().is_empty() {
                    return Ok(vec![child]);
                }
            } else {
                match entry.platform.as_ref().map(|p| filter.matches(p)) {
                    Some(true) => return Ok(vec![self.walk_node(entry, depth + 1).await?]),
                    Some(false) => {}
                    None => {
                        unlabelled.get_or_insert(entry);
                    }
                }
            }
        }

        match unlabelled {
            Some(entry) => Ok(vec![self.walk_node(entry, depth + 1).await?]),
            None => Ok(Vec::new()),
        }
    }
}

/// Reject a manifest or index whose bytes do not match its descriptor.
fn verify_document(descriptor: &Descriptor, json: &[u8]) -> Result<()> {
    let expected = &descriptor.digest;
    if i64::try_from(json.len()).ok() != Some(descriptor.size) {
        return Err(ExportError::DigestMismatch {
            expected: expected.to_string(),
            actual: format!("{} bytes, descriptor says {}", json.len(), descriptor.size),
        });
    }
    let actual = Digest::of_bytes(expected.algorithm(), json);
    if &actual != expected {
        return Err(ExportError::DigestMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

enum NodeKind {
    Index,
    Manifest,
}

/// Decide the node kind from the media type, sniffing the document when
/// the media type is not one we know.
fn classify(descriptor: &Descriptor, json: &[u8]) -> Result<NodeKind> {
    if descriptor.is_index() {
        return Ok(NodeKind::Index);
    }
    if descriptor.is_manifest() {
        return Ok(NodeKind::Manifest);
    }

    let value: serde_json::Value = serde_json::from_slice(json).map_err(|e| {
        ExportError::MalformedManifest(format!("{} is not JSON: {}", descriptor.digest, e))
    })?;
    if value.get("manifests").is_some() {
        Ok(NodeKind::Index)
    } else if value.get("config").is_some() && value.get("layers").is_some() {
        Ok(NodeKind::Manifest)
    } else {
        Err(ExportError::MalformedManifest(format!(
            "{} ({}) is neither an index nor a manifest",
            descriptor.digest, descriptor.media_type
        )))
    }
}

fn parse_manifest(descriptor: Descriptor, json: &[u8]) -> Result<ManifestNode> {
    let manifest: ImageManifest = serde_json::from_slice(json).map_err(|e| {
        ExportError::MalformedManifest(format!("invalid manifest {}: {}", descriptor.digest, e))
    })?;

    let config = Descriptor::from_oci(manifest.config()).map_err(ExportError::MalformedManifest)?;
    let layers = manifest
        .layers()
        .iter()
        .map(|layer| Descriptor::from_oci(layer).map_err(ExportError::MalformedManifest))
        .collect::<Result<Vec<_>>>()?;

    Ok(ManifestNode::Manifest {
        descriptor,
        config,
        layers,
    })
}

/// Flatten a node into role-tagged descriptors: the node itself, then
/// (for manifests) its config and layers in order.
fn flatten(node: &ManifestNode, out: &mut Vec<RoledDescriptor>) {
    match node {
        ManifestNode::Index {
            descriptor,
            children,
        } => {
            out.push(RoledDescriptor {
                role: BlobRole::Index,
                descriptor: descriptor.clone(),
            });
            for child in children {
                flatten(child, out);
            }
        }
        ManifestNode::Manifest {
            descriptor,
            config,
            layers,
        } => {
            out.push(RoledDescriptor {
                role: BlobRole::Manifest,
                descriptor: descriptor.clone(),
            });
            out.push(RoledDescriptor {
                role: BlobRole::Config,
                descriptor: config.clone(),
            });
            out.extend(layers.iter().map(|layer| RoledDescriptor {
                role: BlobRole::Layer,
                descriptor: layer.clone(),
            }));
        }
    }
}
