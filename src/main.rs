//! Docker Image Archiver binary

use anyhow::{Context, Result};
use docker_image_archiver::cli::{Args, Runner};
use docker_image_archiver::logging;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();
    logging::init(args.verbose, args.quiet);

    let runner = Runner::from_args(args).context("failed to initialise archiver")?;
    if let Err(e) = runner.run().await {
        tracing::error!(error = %e, "command failed");
        if matches!(e, docker_image_archiver::ArchiverError::Config(_)) {
            Args::print_examples();
        }
        std::process::exit(1);
    }
    Ok(())
}
