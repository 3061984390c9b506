//! imgpack Core - Foundational Types
//!
//! Error taxonomy and configuration shared by the export runtime and the CLI.

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::ExportConfig;
pub use error::{ErrorKind, ExportError, Result};

/// imgpack version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
