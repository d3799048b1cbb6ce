//! Configuration for the archiver: storage root, phase budgets and compressor settings

use crate::error::{ArchiverError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_DOWNLOADS_DIR: &str = "downloads";
pub const DEFAULT_COMPRESSOR: &str = "pigz";
pub const DEFAULT_THREADS: usize = 4;
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;
pub const DEFAULT_SAVE_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_COMPRESS_TIMEOUT: Duration = Duration::from_secs(1800);
pub const DEFAULT_EXIT_GRACE: Duration = Duration::from_secs(30);
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_PHASE_INTERVAL: Duration = Duration::from_millis(500);

/// Settings for the compression phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionSettings {
    /// Parallel compressor executable, looked up on `PATH`
    pub program: String,
    /// Replaces the default `-p <threads> -c` arguments when set
    pub args: Option<Vec<String>>,
    pub threads: usize,
    pub chunk_size: usize,
    pub timeout: Duration,
    pub exit_grace: Duration,
    pub sample_interval: Duration,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            program: DEFAULT_COMPRESSOR.to_string(),
            args: None,
            threads: DEFAULT_THREADS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            timeout: DEFAULT_COMPRESS_TIMEOUT,
            exit_grace: DEFAULT_EXIT_GRACE,
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
        }
    }
}

impl CompressionSettings {
    pub fn command_args(&self) -> Vec<String> {
        match &self.args {
            Some(args) => args.clone(),
            None => vec!["-p".to_string(), self.threads.to_string(), "-c".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Archive storage root
    pub downloads_dir: PathBuf,
    /// Directory for the uncompressed intermediate file, system temp dir when unset
    pub scratch_dir: Option<PathBuf>,
    pub save_timeout: Duration,
    pub compression: CompressionSettings,
    /// Minimum pause between phase transitions so pollers can observe them
    pub phase_interval: Duration,
    /// Complete immediately when the archive already exists
    pub reuse_existing: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            downloads_dir: PathBuf::from(DEFAULT_DOWNLOADS_DIR),
            scratch_dir: None,
            save_timeout: DEFAULT_SAVE_TIMEOUT,
            compression: CompressionSettings::default(),
            phase_interval: DEFAULT_PHASE_INTERVAL,
            reuse_existing: true,
        }
    }
}

impl AppConfig {
    pub fn new(downloads_dir: impl Into<PathBuf>) -> Self {
        Self {
            downloads_dir: downloads_dir.into(),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(dir) = env_string("IMAGE_ARCHIVER_DOWNLOADS_DIR").or_else(|| env_string("DOWNLOADS_DIR")) {
            config.downloads_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_string("IMAGE_ARCHIVER_SCRATCH_DIR") {
            config.scratch_dir = Some(PathBuf::from(dir));
        }
        if let Some(secs) = env_parse::<u64>("IMAGE_ARCHIVER_SAVE_TIMEOUT")? {
            config.save_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("IMAGE_ARCHIVER_COMPRESS_TIMEOUT")? {
            config.compression.timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("IMAGE_ARCHIVER_COMPRESS_GRACE")? {
            config.compression.exit_grace = Duration::from_secs(secs);
        }
        if let Some(threads) = env_parse::<usize>("IMAGE_ARCHIVER_COMPRESS_THREADS")? {
            config.compression.threads = threads;
        }
        if let Some(chunk_size) = env_parse::<usize>("IMAGE_ARCHIVER_CHUNK_SIZE")? {
            config.compression.chunk_size = chunk_size;
        }
        if let Some(program) = env_string("IMAGE_ARCHIVER_COMPRESSOR") {
            config.compression.program = program;
        }
        if let Some(ms) = env_parse::<u64>("IMAGE_ARCHIVER_PHASE_INTERVAL_MS")? {
            config.phase_interval = Duration::from_millis(ms);
        }
        if let Some(reuse) = env_parse::<bool>("IMAGE_ARCHIVER_REUSE_EXISTING")? {
            config.reuse_existing = reuse;
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.save_timeout.is_zero() {
            return Err(ArchiverError::Config("save timeout must be greater than 0".into()));
        }
        if self.compression.timeout.is_zero() {
            return Err(ArchiverError::Config("compression timeout must be greater than 0".into()));
        }
        if self.compression.exit_grace.is_zero() {
            return Err(ArchiverError::Config("compressor exit grace must be greater than 0".into()));
        }
        if self.compression.threads == 0 {
            return Err(ArchiverError::Config("compressor threads must be greater than 0".into()));
        }
        if self.compression.chunk_size == 0 {
            return Err(ArchiverError::Config("chunk size must be greater than 0".into()));
        }
        if self.compression.program.trim().is_empty() {
            return Err(ArchiverError::Config("compressor program cannot be empty".into()));
        }
        Ok(())
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(env::temp_dir)
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env_string(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ArchiverError::Config(format!("invalid value for {}: {} ({})", key, raw, e))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_compressor_arguments() {
        let settings = CompressionSettings::default();
        assert_eq!(settings.command_args(), vec!["-p", "4", "-c"]);
        assert_eq!(settings.chunk_size, 1024 * 1024);
        assert_eq!(settings.exit_grace, Duration::from_secs(30));
    }

    #[test]
    fn explicit_arguments_replace_defaults() {
        let settings = CompressionSettings {
            args: Some(vec!["-c".to_string()]),
            ..CompressionSettings::default()
        };
        assert_eq!(settings.command_args(), vec!["-c"]);
    }

    #[test]
    fn validate_rejects_zero_budgets() {
        let mut config = AppConfig::new("/tmp/archives");
        assert!(config.validate().is_ok());

        config.compression.threads = 0;
        assert!(matches!(config.validate(), Err(ArchiverError::Config(_))));

        config.compression.threads = 2;
        config.save_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
