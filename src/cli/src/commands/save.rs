//! `imgpack save` command: save images to a tar archive.
//!
//! The archive carries both a Docker `manifest.json` and an OCI
//! `index.json`, so it loads with `docker load` and OCI tooling alike.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use clap::Args;
use imgpack_core::config::ExportConfig;
use imgpack_runtime::{ExportReport, ExportRequest, Exporter, LocalImageStore, Platform};
use tokio::io::{AsyncWrite, BufWriter};

use crate::output;

#[derive(Args)]
pub struct SaveArgs {
    /// Images to save (e.g., "nginx:1.25", "repo/app@sha256:...")
    #[arg(required = true)]
    pub images: Vec<String>,

    /// Write to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Only save this platform (os/arch[/variant]) [default: host]
    #[arg(long, conflicts_with = "all_platforms")]
    pub platform: Option<Platform>,

    /// Save every platform of multi-platform images
    #[arg(long)]
    pub all_platforms: bool,
}

impl SaveArgs {
    fn platform_filter(&self) -> Option<Platform> {
        if self.all_platforms {
            None
        } else {
            Some(self.platform.clone().unwrap_or_else(Platform::host))
        }
    }
}

pub async fn execute(
    args: SaveArgs,
    store_dir: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    if args.output.is_none() && std::io::stdout().is_terminal() {
        return Err(
            "refusing to write archive to a terminal; use -o or redirect stdout".into(),
        );
    }

    let store = super::open_image_store(store_dir)?;
    let mut request = ExportRequest::new(args.images.iter().cloned());
    request.platform = args.platform_filter();

    let report = match &args.output {
        Some(path) => save_to_file(store, &request, path).await?,
        None => {
            let mut stdout = BufWriter::new(tokio::io::stdout());
            export(store, &request, &mut stdout).await?
        }
    };

    let target = args
        .output
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "stdout".to_string());
    eprintln!(
        "Saved {} to {} ({} blobs, {})",
        report.images.join(", "),
        target,
        report.blobs,
        output::format_bytes(report.bytes_written)
    );
    Ok(())
}

/// Export into `path` through a temporary sibling file.
///
/// The target is replaced only after a successful export; on failure it is
/// left untouched and the temporary file is removed.
async fn save_to_file(
    store: LocalImageStore,
    request: &ExportRequest,
    path: &Path,
) -> Result<ExportReport, Box<dyn std::error::Error>> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let temp = tempfile::Builder::new()
        .prefix(".imgpack-")
        .suffix(".tar.tmp")
        .tempfile_in(dir)
        .map_err(|e| format!("Failed to create {}: {e}", path.display()))?;
    let file = temp
        .as_file()
        .try_clone()
        .map_err(|e| format!("Failed to open {}: {e}", temp.path().display()))?;
    let mut file = BufWriter::new(tokio::fs::File::from_std(file));

    let report = export(store, request, &mut file).await?;
    drop(file);

    temp.persist(path)
        .map_err(|e| format!("Failed to write {}: {}", path.display(), e.error))?;
    Ok(report)
}

/// Run one export, cancelling it on Ctrl-C.
async fn export<W>(
    store: LocalImageStore,
    request: &ExportRequest,
    sink: W,
) -> Result<ExportReport, Box<dyn std::error::Error>>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut exporter = Exporter::new(store, ExportConfig::default());
    let cancel = exporter.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; cancelling export");
            cancel.cancel();
        }
    });

    let result = exporter.export(request, sink).await;
    interrupt.abort();
    Ok(result?)
}
