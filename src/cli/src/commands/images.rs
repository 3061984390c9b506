//! `imgpack images` command.

use std::path::PathBuf;

use clap::Args;
use imgpack_runtime::{ImageReference, StoredImage};

use crate::output;

#[derive(Args)]
pub struct ImagesArgs {
    /// Only show image references (one per line)
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(
    args: ImagesArgs,
    store_dir: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_image_store(store_dir)?;
    let images = store.list().await;

    if args.quiet {
        for image in &images {
            println!("{}", image.reference);
        }
        return Ok(());
    }

    let mut table = output::new_table(&["REPOSITORY", "TAG", "DIGEST", "SIZE", "CREATED"]);
    for row in images.iter().map(ImageRow::from_stored) {
        table.add_row(vec![row.repository, row.tag, row.digest, row.size, row.created]);
    }

    println!("{table}");
    Ok(())
}

/// Display fields for a single image row.
struct ImageRow {
    repository: String,
    tag: String,
    digest: String,
    size: String,
    created: String,
}

impl ImageRow {
    fn from_stored(image: &StoredImage) -> Self {
        let (repository, tag) = match ImageReference::parse(&image.reference) {
            Ok(r) => (
                r.name(),
                r.tag().unwrap_or("<none>").to_string(),
            ),
            Err(_) => (image.reference.clone(), "<none>".to_string()),
        };

        Self {
            repository,
            tag,
            digest: output::short_digest(&image.descriptor.digest.to_string()),
            size: output::format_bytes(image.descriptor.size.max(0) as u64),
            created: output::format_ago(&image.created_at),
        }
    }
}
