use serde::{Deserialize, Serialize};

use crate::error::{ExportError, Result};

/// Export pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Maximum nesting of index documents before the walk is rejected
    pub max_depth: usize,

    /// Size of the buffer used to stream each blob into the archive
    pub copy_buffer_size: usize,

    /// Permission bits recorded on blob entries
    pub blob_mode: u32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            max_depth: Self::DEFAULT_MAX_DEPTH,
            copy_buffer_size: Self::DEFAULT_COPY_BUFFER_SIZE,
            blob_mode: 0o444,
        }
    }
}

impl ExportConfig {
    /// Default manifest nesting limit.
    pub const DEFAULT_MAX_DEPTH: usize = 8;

    /// Default streaming buffer: 64 KiB.
    pub const DEFAULT_COPY_BUFFER_SIZE: usize = 64 * 1024;

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_depth == 0 {
            return Err(ExportError::ConfigError(
                "max_depth must be at least 1".to_string(),
            ));
        }
        if self.copy_buffer_size == 0 {
            return Err(ExportError::ConfigError(
                "copy_buffer_size must be non-zero".to_string(),
            ));
        }
        if self.blob_mode > 0o7777 {
            return Err(ExportError::ConfigError(format!(
                "blob_mode {:o} is not a valid permission mask",
                self.blob_mode
            )));
        }
        Ok(())
    }
}
