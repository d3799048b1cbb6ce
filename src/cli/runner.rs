//! Executes a parsed command against an [`ArchiveService`]

use crate::cli::args::{Args, Command};
use crate::error::{ArchiverError, Result};
use crate::output::{format_duration, format_size, OutputManager};
use crate::pipeline::ArchiveService;
use crate::progress::Status;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct Runner {
    command: Command,
    service: ArchiveService,
    output: OutputManager,
}

impl Runner {
    pub fn new(args: Args, service: ArchiveService) -> Self {
        let output = if args.quiet {
            OutputManager::new_quiet()
        } else {
            OutputManager::new(args.verbose)
        };

        Self {
            command: args.command,
            service,
            output,
        }
    }

    /// Service backed by the local Docker daemon, configured from env and flags
    pub fn from_args(args: Args) -> Result<Self> {
        let config = args.to_config()?;
        let service = ArchiveService::connect(config)?;
        Ok(Self::new(args, service))
    }

    pub async fn run(&self) -> Result<()> {
        match &self.command {
            Command::Pull { image, json } => self.pull(image, *json).await,
            Command::List { json } => self.list(*json).await,
            Command::Clear => self.clear().await,
            Command::Fetch { path, output } => self.fetch(path, output.as_deref()).await,
        }
    }

    async fn pull(&self, image: &str, json: bool) -> Result<()> {
        let start_time = Instant::now();
        if !json {
            self.output.section(&format!("Archiving {}", image));
            self.output.info(&format!(
                "Storage root: {}",
                self.service.config().downloads_dir.display()
            ));
        }

        let handle = self.service.start_acquisition(image)?;
        let mut last_seen = None;

        // poll the store the way a remote caller would
        let record = loop {
            let record = self.service.get_progress(&handle.image);
            if last_seen != Some(record.updated_at) {
                last_seen = Some(record.updated_at);
                if json {
                    println!("{}", serde_json::to_string(&record)?);
                } else {
                    self.output.progress_record(&record);
                }
            }
            if record.status.is_terminal() {
                break record;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        };
        if !json {
            self.output.progress_done();
            self.output.log_entries(&record);
        }

        let result = handle.wait().await;
        match (&result, record.status) {
            (Ok(path), Status::Complete) if !json => {
                let size = tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);
                self.output.success(&format!(
                    "{} ({}) written in {}",
                    path.display(),
                    format_size(size),
                    format_duration(start_time.elapsed())
                ));
            }
            (Err(e), _) if !json => self.output.error(&e.to_string()),
            _ => {}
        }
        result.map(|_| ())
    }

    async fn list(&self, json: bool) -> Result<()> {
        let entries = self.service.list_archives().await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        } else {
            self.output.section("Archives");
            self.output.archive_table(&entries);
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let removed = self.service.clear_archives().await?;
        self.output.success(&format!("Removed {} archive(s)", removed));
        Ok(())
    }

    async fn fetch(&self, path: &Path, destination: Option<&Path>) -> Result<()> {
        let (mut file, size) = self.service.fetch_archive(path).await?;
        match destination {
            Some(destination) => {
                if tokio::fs::canonicalize(destination).await.ok() == tokio::fs::canonicalize(path).await.ok() {
                    return Err(ArchiverError::Config(
                        "output must differ from the archive being fetched".into(),
                    ));
                }
                let mut out = tokio::fs::File::create(destination).await?;
                let copied = tokio::io::copy(&mut file, &mut out).await?;
                out.flush().await?;
                if copied != size {
                    self.output.warning(&format!("archive changed while copying: expected {} bytes, copied {}", size, copied));
                }
                self.output.success(&format!(
                    "Copied {} ({}) to {}",
                    path.display(),
                    format_size(copied),
                    destination.display()
                ));
            }
            None => {
                let mut stdout = tokio::io::stdout();
                tokio::io::copy(&mut file, &mut stdout).await?;
                stdout.flush().await?;
            }
        }
        Ok(())
    }
}
