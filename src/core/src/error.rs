use thiserror::Error;

/// imgpack error types
#[derive(Error, Debug)]
pub enum ExportError {
    /// Reference string could not be parsed
    #[error("Invalid reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    /// Store has no such tag or digest
    #[error("Reference not found: {0}")]
    ReferenceNotFound(String),

    /// Manifest or index document violates the expected schema
    #[error("Malformed manifest: {0}")]
    MalformedManifest(String),

    /// No manifest in the index matches the requested platform
    #[error("No manifest for platform {platform} in {reference}")]
    PlatformNotFound { reference: String, platform: String },

    /// Two descriptors share a digest but disagree on size or media type
    #[error("Store inconsistency for {digest}: {message}")]
    StoreInconsistency { digest: String, message: String },

    /// Blob content does not hash to its recorded digest
    #[error("Digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    /// Export was cancelled
    #[error("Export cancelled")]
    Cancelled,

    /// Writing to the output sink failed
    #[error("Failed to write archive: {0}")]
    SinkError(#[source] std::io::Error),

    /// Reading from the content store failed
    #[error("Store error: {0}")]
    Store(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Fieldless discriminant of [`ExportError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidReference,
    ReferenceNotFound,
    MalformedManifest,
    PlatformNotFound,
    StoreInconsistency,
    DigestMismatch,
    Cancelled,
    SinkError,
    Store,
    Serialization,
    Config,
}

impl ExportError {
    /// The kind of this error, without its payload.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidReference { .. } => ErrorKind::InvalidReference,
            Self::ReferenceNotFound(_) => ErrorKind::ReferenceNotFound,
            Self::MalformedManifest(_) => ErrorKind::MalformedManifest,
            Self::PlatformNotFound { .. } => ErrorKind::PlatformNotFound,
            Self::StoreInconsistency { .. } => ErrorKind::StoreInconsistency,
            Self::DigestMismatch { .. } => ErrorKind::DigestMismatch,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::SinkError(_) => ErrorKind::SinkError,
            Self::Store(_) => ErrorKind::Store,
            Self::SerializationError(_) => ErrorKind::Serialization,
            Self::ConfigError(_) => ErrorKind::Config,
        }
    }

    /// Shorthand for an [`ExportError::InvalidReference`].
    pub fn invalid_reference(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidReference {
            reference: reference.into(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InvalidReference => "invalid-reference",
            Self::ReferenceNotFound => "reference-not-found",
            Self::MalformedManifest => "malformed-manifest",
            Self::PlatformNotFound => "platform-not-found",
            Self::StoreInconsistency => "store-inconsistency",
            Self::DigestMismatch => "digest-mismatch",
            Self::Cancelled => "cancelled",
            Self::SinkError => "sink-error",
            Self::Store => "store",
            Self::Serialization => "serialization",
            Self::Config => "config",
        };
        write!(f, "{}", s)
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(err: serde_json::Error) -> Self {
        ExportError::SerializationError(err.to_string())
    }
}

/// Result type alias for imgpack operations
pub type Result<T> = std::result::Result<T, ExportError>;
