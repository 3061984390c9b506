//! CLI command definitions and dispatch.

mod images;
mod save;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use imgpack_runtime::LocalImageStore;

/// imgpack: export stored images as Docker/OCI archives.
#[derive(Parser)]
#[command(name = "imgpack", version, about)]
pub struct Cli {
    /// Image store directory [default: ~/.imgpack/images]
    #[arg(long, global = true, value_name = "DIR")]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Save one or more images to a tar archive
    Save(save::SaveArgs),
    /// List stored images
    Images(images::ImagesArgs),
}

/// Return the default image store directory (~/.imgpack/images).
pub(crate) fn images_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".imgpack"))
        .unwrap_or_else(|| PathBuf::from(".imgpack"))
        .join("images")
}

/// Open the image store at `dir`, or the default location.
pub(crate) fn open_image_store(
    dir: Option<PathBuf>,
) -> Result<LocalImageStore, Box<dyn std::error::Error>> {
    let dir = dir.unwrap_or_else(images_dir);
    let store = LocalImageStore::new(&dir)?;
    Ok(store)
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Save(args) => save::execute(args, cli.store).await,
        Command::Images(args) => images::execute(args, cli.store).await,
    }
}
