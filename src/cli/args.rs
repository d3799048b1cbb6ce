//! Command-line argument parsing

use crate::config::AppConfig;
use crate::error::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "docker-image-archiver")]
#[command(about = "Pull Docker images and package them into compressed tar.gz archives")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Archive storage root
    #[arg(long = "downloads-dir", global = true, help = "Directory holding finished archives")]
    pub downloads_dir: Option<PathBuf>,

    /// Parallel compressor program
    #[arg(long = "compressor", global = true, help = "Parallel compressor program (default: pigz)")]
    pub compressor: Option<String>,

    /// Compressor worker threads
    #[arg(long = "threads", short = 'j', global = true, help = "Worker threads for the parallel compressor")]
    pub threads: Option<usize>,

    #[arg(long = "save-timeout", global = true, help = "Save phase timeout in seconds")]
    pub save_timeout: Option<u64>,

    #[arg(long = "compress-timeout", global = true, help = "Compression phase timeout in seconds")]
    pub compress_timeout: Option<u64>,

    #[arg(long = "grace", global = true, help = "Seconds the compressor may take to exit after its input closed")]
    pub grace: Option<u64>,

    /// Verbose output
    #[arg(long = "verbose", short = 'v', global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long = "quiet", short = 'q', global = true, conflicts_with = "verbose", help = "Only print errors")]
    pub quiet: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Pull an image and write it to <downloads-dir>/<image>.tar.gz
    Pull {
        /// Image reference, e.g. alpine:latest
        image: String,
        /// Print progress records as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// List finished archives, newest first
    List {
        #[arg(long)]
        json: bool,
    },
    /// Delete every archive in the storage root
    Clear,
    /// Copy an archive out of the storage root
    Fetch {
        path: PathBuf,
        /// Destination file; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

impl Args {
    pub fn parse_args() -> Self {
        Args::parse()
    }

    /// Environment first, then flags on top
    pub fn to_config(&self) -> Result<AppConfig> {
        let mut config = AppConfig::from_env()?;

        if let Some(dir) = &self.downloads_dir {
            config.downloads_dir = dir.clone();
        }
        if let Some(program) = &self.compressor {
            config.compression.program = program.clone();
        }
        if let Some(threads) = self.threads {
            config.compression.threads = threads;
        }
        if let Some(secs) = self.save_timeout {
            config.save_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.compress_timeout {
            config.compression.timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.grace {
            config.compression.exit_grace = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Print usage examples
    pub fn print_examples() {
        println!("Examples:");
        println!("  # Archive an image into ./downloads");
        println!("  docker-image-archiver pull alpine:latest");
        println!();
        println!("  # Use 8 pigz threads and a custom storage root");
        println!("  docker-image-archiver --threads 8 --downloads-dir /srv/images pull nginx:1.27");
        println!();
        println!("  # Machine-readable progress");
        println!("  docker-image-archiver pull redis:7 --json");
        println!();
        println!("  # Inspect and clean up");
        println!("  docker-image-archiver list");
        println!("  docker-image-archiver fetch downloads/alpine_latest.tar.gz -o alpine.tar.gz");
        println!("  docker-image-archiver clear");
    }
}
