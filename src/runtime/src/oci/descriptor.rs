//! Content descriptors and platform selectors.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::digest::Digest;

/// OCI image index media type.
pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
/// OCI image manifest media type.
pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
/// OCI image config media type.
pub const MEDIA_TYPE_OCI_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
/// OCI gzip layer media type.
pub const MEDIA_TYPE_OCI_LAYER_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
/// Docker manifest list media type.
pub const MEDIA_TYPE_DOCKER_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
/// Docker schema 2 manifest media type.
pub const MEDIA_TYPE_DOCKER_MANIFEST: &str =
    "application/vnd.docker.distribution.manifest.v2+json";

/// Operating system and CPU architecture an image was built for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    pub os: String,
    pub architecture: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    pub fn new(os: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            architecture: architecture.into(),
            variant: None,
        }
    }

    /// Platform of the running host, in OCI naming.
    pub fn host() -> Self {
        Self::new(
            oci_os(std::env::consts::OS),
            oci_architecture(std::env::consts::ARCH),
        )
    }

    /// Exact match on os and architecture; the variant is only compared
    /// when this filter names one.
    pub fn matches(&self, candidate: &Platform) -> bool {
        self.os == candidate.os
            && self.architecture == candidate.architecture
            && match &self.variant {
                Some(variant) => candidate.variant.as_deref() == Some(variant.as_str()),
                None => true,
            }
    }

    /// Convert from the oci-spec platform type.
    pub fn from_oci(platform: &oci_spec::image::Platform) -> Self {
        Self {
            os: platform.os().to_string(),
            architecture: platform.architecture().to_string(),
            variant: platform.variant().clone(),
        }
    }
}

/// Map a Rust target OS name to its OCI (GOOS) spelling.
fn oci_os(os: &str) -> &str {
    match os {
        "macos" => "darwin",
        other => other,
    }
}

/// Map a Rust target architecture name to its OCI (GOARCH) spelling.
fn oci_architecture(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "powerpc64" => "ppc64le",
        other => other,
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(format!("invalid platform '{}': empty component", s));
        }
        match parts.as_slice() {
            [os, arch] => Ok(Self::new(*os, *arch)),
            [os, arch, variant] => Ok(Self {
                os: os.to_string(),
                architecture: arch.to_string(),
                variant: Some(variant.to_string()),
            }),
            _ => Err(format!(
                "invalid platform '{}': expected os/arch[/variant]",
                s
            )),
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(ref variant) = self.variant {
            write!(f, "/{}", variant)?;
        }
        Ok(())
    }
}

/// Content-addressed pointer to a blob.
///
/// Two descriptors with the same digest refer to the same bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: Digest,
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

impl Descriptor {
    pub fn new(media_type: impl Into<String>, digest: Digest, size: i64) -> Self {
        Self {
            media_type: media_type.into(),
            digest,
            size,
            platform: None,
        }
    }

    /// Convert from the oci-spec descriptor type, validating the digest.
    pub fn from_oci(descriptor: &oci_spec::image::Descriptor) -> std::result::Result<Self, String> {
        let digest: Digest = descriptor.digest().parse()?;
        if descriptor.size() < 0 {
            return Err(format!("negative size for {}", digest));
        }
        Ok(Self {
            media_type: descriptor.media_type().to_string(),
            digest,
            size: descriptor.size(),
            platform: descriptor.platform().as_ref().map(Platform::from_oci),
        })
    }

    pub fn is_index(&self) -> bool {
        matches!(
            self.media_type.as_str(),
            MEDIA_TYPE_OCI_INDEX | MEDIA_TYPE_DOCKER_MANIFEST_LIST
        )
    }

    pub fn is_manifest(&self) -> bool {
        matches!(
            self.media_type.as_str(),
            MEDIA_TYPE_OCI_MANIFEST | MEDIA_TYPE_DOCKER_MANIFEST
        )
    }
}

/// Part a blob plays in an image; drives archive emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlobRole {
    Layer,
    Config,
    Manifest,
    Index,
}

/// A descriptor together with the role it was discovered in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoledDescriptor {
    pub role: BlobRole,
    pub descriptor: Descriptor,
}
