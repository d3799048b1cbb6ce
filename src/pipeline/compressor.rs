//! Compression phase: external parallel compressor with a serial gzip fallback
//!
//! Output always goes to `<destination>.tmp` first and is renamed onto the
//! destination only after the compressor succeeded, so the final path never
//! holds a partial archive.

use crate::config::CompressionSettings;
use crate::error::{ArchiverError, Result, TimeoutPhase};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::ffi::OsString;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Receives 0..=100 readings of input consumed by the compressor
pub type ProgressSink = Arc<dyn Fn(u8) + Send + Sync>;

const DIAGNOSTICS_LIMIT: usize = 8 * 1024;
/// How long a failed compressor's stderr may take to reach EOF
const DIAGNOSTICS_DRAIN: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Parallel,
    Serial,
}

impl std::fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompressionMethod::Parallel => write!(f, "parallel"),
            CompressionMethod::Serial => write!(f, "serial gzip"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Compressed {
    pub path: PathBuf,
    pub size: u64,
    pub method: CompressionMethod,
}

pub struct Compressor {
    settings: CompressionSettings,
}

impl Compressor {
    pub fn new(settings: CompressionSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &CompressionSettings {
        &self.settings
    }

    pub async fn compress(&self, source: &Path, destination: &Path, sink: ProgressSink) -> Result<Compressed> {
        let total = tokio::fs::metadata(source).await?.len();

        if let Some(compressed) = self.compress_parallel(source, destination, total, sink.clone()).await? {
            return Ok(compressed);
        }

        warn!(
            program = %self.settings.program,
            "parallel compressor unavailable, falling back to serial gzip"
        );
        self.compress_serial(source, destination, sink).await
    }

    /// Returns `Ok(None)` when the compressor program cannot be found
    async fn compress_parallel(
        &self,
        source: &Path,
        destination: &Path,
        total: u64,
        sink: ProgressSink,
    ) -> Result<Option<Compressed>> {
        let partial = PartialOutput::new(temp_sibling(destination));
        let output = tokio::fs::File::create(partial.path()).await?.into_std().await;

        let mut command = Command::new(&self.settings.program);
        command
            .args(self.settings.command_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::from(output))
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        info!(
            program = %self.settings.program,
            threads = self.settings.threads,
            pid = child.id(),
            "spawned parallel compressor"
        );

        let mut diagnostics = Diagnostics::default();
        if let Some(stderr) = child.stderr.take() {
            diagnostics.capture(stderr);
        }
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ArchiverError::process_failure("compressor stdin is not available", ""))?;

        let consumed = Arc::new(AtomicU64::new(0));
        let monitor = spawn_monitor(consumed.clone(), total, self.settings.sample_interval, sink.clone());

        let outcome = self.feed(&mut child, stdin, source, &consumed).await;
        monitor.abort();

        if let Err(mut err) = outcome {
            // already-exited children make kill() fail, which is fine
            let _ = child.kill().await;
            // stderr is only complete once the reader has seen EOF
            diagnostics.drain(DIAGNOSTICS_DRAIN).await;
            if let ArchiverError::ProcessFailure { diagnostics: captured, .. } = &mut err {
                *captured = diagnostics.snapshot();
            }
            warn!(error = %err, "parallel compression failed");
            return Err(err);
        }

        sink(100);
        let size = tokio::fs::metadata(partial.path()).await?.len();
        partial.publish(destination).await?;
        debug!(destination = %destination.display(), size, "published archive");

        Ok(Some(Compressed {
            path: destination.to_path_buf(),
            size,
            method: CompressionMethod::Parallel,
        }))
    }

    async fn feed(
        &self,
        child: &mut Child,
        mut stdin: ChildStdin,
        source: &Path,
        consumed: &AtomicU64,
    ) -> Result<()> {
        let budget = self.settings.timeout;
        let started = Instant::now();
        let mut reader = tokio::fs::File::open(source).await?;
        let mut buf = vec![0u8; self.settings.chunk_size];

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }

            let remaining = budget
                .checked_sub(started.elapsed())
                .ok_or_else(|| ArchiverError::timeout(TimeoutPhase::Compression, budget))?;

            if let Some(status) = child.try_wait()? {
                return Err(ArchiverError::process_failure(
                    format!("compressor exited with {} before input was exhausted", status),
                    String::new(),
                ));
            }

            match tokio::time::timeout(remaining, stdin.write_all(&buf[..n])).await {
                Err(_) => return Err(ArchiverError::timeout(TimeoutPhase::Compression, budget)),
                Ok(Err(e)) if e.kind() == io::ErrorKind::BrokenPipe => {
                    return Err(ArchiverError::process_failure(
                        "compressor input pipe broke",
                        String::new(),
                    ));
                }
                Ok(Err(e)) => return Err(e.into()),
                Ok(Ok(())) => {}
            }
            consumed.fetch_add(n as u64, Ordering::Relaxed);
        }

        // closing stdin signals end of input
        drop(stdin);

        let grace = self.settings.exit_grace;
        let status = match tokio::time::timeout(grace, child.wait()).await {
            Err(_) => return Err(ArchiverError::timeout(TimeoutPhase::CompressorExit, grace)),
            Ok(status) => status?,
        };
        if !status.success() {
            return Err(ArchiverError::process_failure(
                format!("compressor exited with {}", status),
                String::new(),
            ));
        }
        Ok(())
    }

    async fn compress_serial(&self, source: &Path, destination: &Path, sink: ProgressSink) -> Result<Compressed> {
        let partial = PartialOutput::new(temp_sibling(destination));
        let src = source.to_path_buf();
        let tmp = partial.path().to_path_buf();
        let chunk_size = self.settings.chunk_size;
        let budget = self.settings.timeout;

        sink(0);
        let size = tokio::task::spawn_blocking(move || gzip_file(&src, &tmp, chunk_size, budget)).await??;
        sink(100);
        partial.publish(destination).await?;
        info!(destination = %destination.display(), size, "published archive with serial gzip");

        Ok(Compressed {
            path: destination.to_path_buf(),
            size,
            method: CompressionMethod::Serial,
        })
    }
}

fn gzip_file(source: &Path, target: &Path, chunk_size: usize, budget: Duration) -> Result<u64> {
    let started = Instant::now();
    let mut input = std::fs::File::open(source)?;
    let output = std::fs::File::create(target)?;
    let mut encoder = GzEncoder::new(BufWriter::new(output), Compression::default());
    let mut buf = vec![0u8; chunk_size];

    loop {
        let n = input.read(&mut buf)?;
        if n == 0 {
            break;
        }
        if started.elapsed() > budget {
            return Err(ArchiverError::timeout(TimeoutPhase::Compression, budget));
        }
        encoder.write_all(&buf[..n])?;
    }

    let file = encoder.finish()?.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(file.metadata()?.len())
}

fn spawn_monitor(consumed: Arc<AtomicU64>, total: u64, every: Duration, sink: ProgressSink) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            sink(sampled_percent(consumed.load(Ordering::Relaxed), total));
        }
    })
}

pub fn sampled_percent(consumed: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    (consumed.min(total) * 100 / total) as u8
}

/// `<destination>.tmp`
pub fn temp_sibling(destination: &Path) -> PathBuf {
    let mut name: OsString = destination.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Output file that is deleted on drop unless it was published
struct PartialOutput {
    path: PathBuf,
    published: bool,
}

impl PartialOutput {
    fn new(path: PathBuf) -> Self {
        Self { path, published: false }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    async fn publish(mut self, destination: &Path) -> io::Result<()> {
        tokio::fs::rename(&self.path, destination).await?;
        self.published = true;
        Ok(())
    }
}

impl Drop for PartialOutput {
    fn drop(&mut self) {
        if !self.published {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %e, "failed to remove partial archive");
                }
            }
        }
    }
}

/// Tail of the child's stderr, readable at any time without waiting for EOF
#[derive(Default)]
struct Diagnostics {
    buffer: Arc<Mutex<Vec<u8>>>,
    reader: Option<JoinHandle<()>>,
}

impl Diagnostics {
    fn capture<R>(&mut self, mut stream: R)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = self.buffer.clone();
        self.reader = Some(tokio::spawn(async move {
            let mut chunk = [0u8; 1024];
            loop {
                match stream.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let mut buffer = buffer.lock().unwrap_or_else(PoisonError::into_inner);
                        buffer.extend_from_slice(&chunk[..n]);
                        if buffer.len() > DIAGNOSTICS_LIMIT {
                            let excess = buffer.len() - DIAGNOSTICS_LIMIT;
                            buffer.drain(..excess);
                        }
                    }
                }
            }
        }));
    }

    /// Wait up to `limit` for the reader to hit EOF; a grandchild holding stderr open is left behind
    async fn drain(&mut self, limit: Duration) {
        if let Some(mut reader) = self.reader.take() {
            if tokio::time::timeout(limit, &mut reader).await.is_err() {
                debug!("compressor stderr still open, using partial diagnostics");
                reader.abort();
            }
        }
    }

    fn snapshot(&self) -> String {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buffer).into_owned()
    }
}
