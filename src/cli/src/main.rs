//! imgpack CLI entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use imgpack_cli::commands::{dispatch, Cli};

#[tokio::main]
async fn main() {
    // Logs go to stderr; stdout may carry the archive
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    if let Err(e) = dispatch(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
