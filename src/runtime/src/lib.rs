//! imgpack runtime - image export pipeline.
//!
//! Resolves image references against a local content store, walks their
//! manifest graphs and streams a combined Docker/OCI archive.

#![allow(clippy::result_large_err)]

pub mod oci;

pub use oci::{
    ContentStore, Descriptor, Digest, ExportPhase, ExportReport, ExportRequest, Exporter,
    ImageReference, LocalImageStore, Platform, StoredImage,
};

/// imgpack runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
