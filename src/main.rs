//! Main entry point for the singlejar CLI application.
//!
//! The merge is written to a temporary file next to the output, which is
//! renamed into place only once the archive is complete.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use singlejar::{ArchiveWriter, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let output = cli.output.clone();
    let writer = ArchiveWriter::new(cli.into_config());

    let dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let staging = tempfile::Builder::new()
        .prefix(".singlejar")
        .suffix(".tmp")
        .tempfile_in(dir)
        .with_context(|| format!("cannot create temporary file in {}", dir.display()))?;

    let summary = writer
        .write_to_path(staging.path())
        .await
        .with_context(|| format!("cannot build {}", output.display()))?;

    staging
        .persist(&output)
        .with_context(|| format!("cannot move archive into place at {}", output.display()))?;

    tracing::info!(
        output = %output.display(),
        entries = summary.entries,
        bytes = summary.bytes,
        "wrote archive"
    );
    Ok(())
}

/// Log to stderr. `RUST_LOG` takes precedence over `--verbose`.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
