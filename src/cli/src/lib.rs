//! imgpack CLI - save locally stored images as Docker/OCI archives.

pub mod commands;
pub mod output;
