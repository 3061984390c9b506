//! OCI image reference parsing.
//!
//! Parses image references like `ghcr.io/org/app:v0.1.0` into a canonical
//! registry, repository and exactly one selector (tag or digest).

use imgpack_core::error::{ExportError, Result};

use super::digest::Digest;

/// Default registry when none is specified.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Docker Hub namespace for single-component names.
const OFFICIAL_NAMESPACE: &str = "library";

/// Alias of the default registry used by older clients.
const LEGACY_DEFAULT_REGISTRY: &str = "index.docker.io";

/// Maximum tag length accepted by registries.
const MAX_TAG_LEN: usize = 128;

/// What a reference points at inside its repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    Tag(String),
    Digest(Digest),
}

/// Parsed, canonical OCI image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    /// Registry hostname (e.g., "ghcr.io", "docker.io")
    pub registry: String,
    /// Repository path (e.g., "library/nginx", "org/app")
    pub repository: String,
    /// Tag or digest
    pub selector: Selector,
}

impl ImageReference {
    /// Tag assumed when a reference names neither a tag nor a digest.
    pub const DEFAULT_TAG: &'static str = "latest";

    /// Parse an image reference string.
    ///
    /// Supports formats:
    /// - `nginx` → docker.io/library/nginx:latest
    /// - `nginx:1.25` → docker.io/library/nginx:1.25
    /// - `myuser/myimage` → docker.io/myuser/myimage:latest
    /// - `ghcr.io/org/image:tag` → ghcr.io/org/image:tag
    /// - `ghcr.io/org/image@sha256:abc...` → ghcr.io/org/image@sha256:abc...
    ///
    /// The implicit `latest` tag is only applied when the input carries
    /// neither a tag nor a digest. When both are present the digest is kept
    /// and the tag dropped, since the digest alone identifies the content.
    pub fn parse(reference: &str) -> Result<Self> {
        let raw = reference;
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(ExportError::invalid_reference(raw, "empty image reference"));
        }

        // Split off digest first (@ separator)
        let (name_tag, digest) = match reference.split_once('@') {
            Some((name_tag, digest_part)) => {
                let digest: Digest = digest_part
                    .parse()
                    .map_err(|reason| ExportError::invalid_reference(digest_part, reason))?;
                (name_tag, Some(digest))
            }
            None => (reference, None),
        };

        // Tag is whatever follows the last colon after the last slash
        let last_slash = name_tag.rfind('/').map(|p| p + 1).unwrap_or(0);
        let (name, tag) = match name_tag[last_slash..].rfind(':') {
            Some(colon) => {
                let colon = last_slash + colon;
                (&name_tag[..colon], Some(&name_tag[colon + 1..]))
            }
            None => (name_tag, None),
        };

        if name.is_empty() {
            return Err(ExportError::invalid_reference(raw, "empty image name"));
        }
        if let Some(tag) = tag {
            validate_tag(tag)?;
        }

        let (registry, repository) = Self::split_registry_repository(name)?;

        let selector = match (digest, tag) {
            (Some(digest), _) => Selector::Digest(digest),
            (None, Some(tag)) => Selector::Tag(tag.to_string()),
            (None, None) => Selector::Tag(Self::DEFAULT_TAG.to_string()),
        };

        Ok(ImageReference {
            registry,
            repository,
            selector,
        })
    }

    /// Split a name into registry and repository components.
    fn split_registry_repository(name: &str) -> Result<(String, String)> {
        // First component is a registry if it looks like a hostname
        // (contains a dot or colon, or is "localhost")
        if let Some((first, rest)) = name.split_once('/') {
            if first.contains('.') || first.contains(':') || first == "localhost" {
                validate_registry(first)?;
                if rest.is_empty() {
                    return Err(ExportError::invalid_reference(
                        name,
                        "empty repository after registry",
                    ));
                }
                validate_repository(rest)?;
                let registry = if first == LEGACY_DEFAULT_REGISTRY {
                    DEFAULT_REGISTRY
                } else {
                    first
                };
                let repository = if registry == DEFAULT_REGISTRY && !rest.contains('/') {
                    format!("{}/{}", OFFICIAL_NAMESPACE, rest)
                } else {
                    rest.to_string()
                };
                return Ok((registry.to_string(), repository));
            }
        }

        validate_repository(name)?;
        let repository = if name.contains('/') {
            name.to_string()
        } else {
            format!("{}/{}", OFFICIAL_NAMESPACE, name)
        };

        Ok((DEFAULT_REGISTRY.to_string(), repository))
    }

    /// `registry/repository` without tag or digest.
    pub fn name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    pub fn tag(&self) -> Option<&str> {
        match &self.selector {
            Selector::Tag(tag) => Some(tag),
            Selector::Digest(_) => None,
        }
    }

    pub fn digest(&self) -> Option<&Digest> {
        match &self.selector {
            Selector::Tag(_) => None,
            Selector::Digest(digest) => Some(digest),
        }
    }

    /// Get the full canonical reference string.
    pub fn full_reference(&self) -> String {
        match &self.selector {
            Selector::Tag(tag) => format!("{}:{}", self.name(), tag),
            Selector::Digest(digest) => format!("{}@{}", self.name(), digest),
        }
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

impl std::str::FromStr for ImageReference {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn validate_tag(tag: &str) -> Result<()> {
    if tag.is_empty() {
        return Err(ExportError::invalid_reference(tag, "empty tag"));
    }
    if tag.len() > MAX_TAG_LEN {
        return Err(ExportError::invalid_reference(
            tag,
            format!("tag longer than {} characters", MAX_TAG_LEN),
        ));
    }
    if tag.contains('/') {
        return Err(ExportError::invalid_reference(
            tag,
            "tag must not contain path separators",
        ));
    }
    let first = tag.as_bytes()[0];
    if !(first.is_ascii_alphanumeric() || first == b'_') {
        return Err(ExportError::invalid_reference(
            tag,
            "tag must start with a letter, digit or underscore",
        ));
    }
    if let Some(bad) = tag
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')))
    {
        return Err(ExportError::invalid_reference(
            tag,
            format!("invalid character '{}' in tag", bad),
        ));
    }
    Ok(())
}

fn validate_registry(registry: &str) -> Result<()> {
    let (host, port) = match registry.split_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (registry, None),
    };
    if host.is_empty()
        || !host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ExportError::invalid_reference(
            registry,
            "invalid registry hostname",
        ));
    }
    if let Some(port) = port {
        if port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
            return Err(ExportError::invalid_reference(
                registry,
                format!("invalid registry port '{}'", port),
            ));
        }
    }
    Ok(())
}

fn validate_repository(repository: &str) -> Result<()> {
    for component in repository.split('/') {
        if component.is_empty() {
            return Err(ExportError::invalid_reference(
                repository,
                "empty path component in repository",
            ));
        }
        if component.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(ExportError::invalid_reference(
                repository,
                "repository name must be lowercase",
            ));
        }
        let valid_chars = component
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'));
        let bytes = component.as_bytes();
        let alnum_edges = bytes[0].is_ascii_alphanumeric()
            && bytes[bytes.len() - 1].is_ascii_alphanumeric();
        if !valid_chars || !alnum_edges {
            return Err(ExportError::invalid_reference(
                repository,
                format!("invalid path component '{}'", component),
            ));
        }
    }
    Ok(())
}
