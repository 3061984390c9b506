//! OCI image export for imgpack.
//!
//! This module turns image references held in a local content store into a
//! single tar archive that both `docker load` and OCI-aware tools accept:
//!
//! - Reference parsing and normalization
//! - Manifest graph traversal with optional platform filtering
//! - Blob deduplication across images
//! - Streaming tar emission with digest verification
//!
//! # Archive Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Export Archive                           │
//! │                                                             │
//! │  blobs/                                                     │
//! │  └── sha256/                                                │
//! │      ├── <layers>      (emitted first)                      │
//! │      ├── <configs>                                          │
//! │      └── <manifests>   (and nested indexes)                 │
//! │  oci-layout            (OCI layout marker)                  │
//! │  manifest.json         (Docker load manifest)               │
//! │  index.json            (OCI image index, written last)      │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod archive;
pub mod descriptor;
pub mod digest;
pub mod export;
pub mod export_set;
pub mod reference;
pub mod store;
pub mod walker;

pub use archive::{ArchiveManifestEntry, ArchiveStats, ArchiveWriter};
pub use descriptor::{BlobRole, Descriptor, Platform, RoledDescriptor};
pub use digest::{Digest, DigestAlgorithm};
pub use export::{ExportPhase, ExportReport, ExportRequest, Exporter};
pub use export_set::ExportSet;
pub use reference::{ImageReference, Selector};
pub use store::{BlobReader, ContentStore, LocalImageStore, StoredImage};
pub use walker::{ManifestNode, ManifestWalker, WalkedImage};
