//! Call-scoped set of blobs to export, deduplicated by digest.

use std::collections::HashMap;

use imgpack_core::error::{ExportError, Result};

use super::descriptor::{BlobRole, Descriptor, RoledDescriptor};
use super::digest::Digest;

/// Union of all blobs needed by one export call.
///
/// Membership is keyed by digest. Iteration order is deterministic:
/// layers first, then configs, manifests and indexes, each group in the
/// order its blobs were first seen.
#[derive(Debug, Default)]
pub struct ExportSet {
    entries: Vec<RoledDescriptor>,
    by_digest: HashMap<Digest, usize>,
}

impl ExportSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge descriptors into the set, returning how many were new.
    ///
    /// A digest seen before with a different size or media type means the
    /// store is corrupt and fails with `StoreInconsistency`.
    pub fn accumulate(&mut self, descriptors: &[RoledDescriptor]) -> Result<usize> {
        let mut added = 0;
        for incoming in descriptors {
            let digest = &incoming.descriptor.digest;
            match self.by_digest.get(digest) {
                Some(&pos) => check_consistent(&self.entries[pos].descriptor, &incoming.descriptor)?,
                None => {
                    self.by_digest.insert(digest.clone(), self.entries.len());
                    self.entries.push(incoming.clone());
                    added += 1;
                }
            }
        }
        Ok(added)
    }

    pub fn contains(&self, digest: &Digest) -> bool {
        self.by_digest.contains_key(digest)
    }

    pub fn get(&self, digest: &Digest) -> Option<&Descriptor> {
        self.by_digest.get(digest).map(|&pos| &self.entries[pos].descriptor)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of blobs recorded under `role`.
    pub fn count(&self, role: BlobRole) -> usize {
        self.entries.iter().filter(|e| e.role == role).count()
    }

    /// Blobs in archive emission order.
    pub fn ordered(&self) -> Vec<&RoledDescriptor> {
        let mut ordered: Vec<&RoledDescriptor> = self.entries.iter().collect();
        // stable: keeps first-seen order within a role
        ordered.sort_by_key(|e| e.role);
        ordered
    }

    /// Total bytes of all blobs.
    pub fn total_size(&self) -> i64 {
        self.entries.iter().map(|e| e.descriptor.size).sum()
    }
}

fn check_consistent(existing: &Descriptor, incoming: &Descriptor) -> Result<()> {
    if existing.size != incoming.size {
        return Err(ExportError::StoreInconsistency {
            digest: existing.digest.to_string(),
            message: format!("size {} conflicts with {}", incoming.size, existing.size),
        });
    }
    if existing.media_type != incoming.media_type {
        return Err(ExportError::StoreInconsistency {
            digest: existing.digest.to_string(),
            message: format!(
                "media type {} conflicts with {}",
                incoming.media_type, existing.media_type
            ),
        });
    }
    Ok(())
}
