//! Console rendering for the command-line front end

use crate::archive::ArchiveEntry;
use crate::progress::{ProgressRecord, Status};
use std::io::{self, Write};
use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
pub struct OutputManager {
    pub verbose: bool,
    quiet: bool,
    start_time: Instant,
}

impl OutputManager {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            quiet: false,
            start_time: Instant::now(),
        }
    }

    pub fn new_quiet() -> Self {
        Self {
            verbose: false,
            quiet: true,
            start_time: Instant::now(),
        }
    }

    pub fn info(&self, message: &str) {
        if !self.quiet {
            self.print_with_timestamp("INFO", message, "ℹ️");
        }
    }

    pub fn success(&self, message: &str) {
        if !self.quiet {
            self.print_with_timestamp("SUCCESS", message, "✅");
        }
    }

    pub fn warning(&self, message: &str) {
        self.print_with_timestamp("WARN", message, "⚠️");
    }

    pub fn error(&self, message: &str) {
        self.print_with_timestamp("ERROR", message, "❌");
    }

    pub fn section(&self, title: &str) {
        if self.quiet {
            return;
        }

        if self.verbose {
            let separator = "━".repeat(60);
            println!("\n{}", separator);
            println!("📋 {}", title);
            println!("{}", separator);
        } else {
            println!("\n📋 {}", title);
        }
    }

    pub fn detail(&self, detail: &str) {
        if self.verbose {
            println!("      📝 {}", detail);
        }
    }

    /// One status line per poll; rewritten in place unless verbose
    pub fn progress_record(&self, record: &ProgressRecord) {
        if self.quiet {
            return;
        }

        let line = format!(
            "{} {:>3}% [{}] {}",
            status_emoji(record.status),
            record.progress,
            record.status,
            record.detail
        );
        if self.verbose {
            println!("{}", line);
        } else {
            print!("\r{:<100}", line);
            let _ = io::stdout().flush();
        }
    }

    /// Terminate the in-place progress line
    pub fn progress_done(&self) {
        if !self.quiet && !self.verbose {
            println!();
        }
    }

    pub fn log_entries(&self, record: &ProgressRecord) {
        if !self.verbose {
            return;
        }
        for entry in &record.log {
            println!("  {} {}", entry.timestamp.format("%H:%M:%S%.3f"), entry.message);
        }
    }

    pub fn archive_table(&self, entries: &[ArchiveEntry]) {
        if entries.is_empty() {
            self.info("No archives found");
            return;
        }

        println!("{:<50} {:>12}  {:<19}", "NAME", "SIZE", "CREATED");
        for entry in entries {
            println!(
                "{:<50} {:>12}  {:<19}",
                entry.name,
                format_size(entry.size),
                entry.created_at
            );
            self.detail(&entry.path.display().to_string());
        }
    }

    fn print_with_timestamp(&self, level: &str, message: &str, emoji: &str) {
        if self.verbose {
            let timestamp = format!("[{:8.3}s]", self.start_time.elapsed().as_secs_f64());
            println!("{} {} {} {}", timestamp, emoji, level, message);
        } else {
            println!("{} {}", emoji, message);
        }
    }
}

fn status_emoji(status: Status) -> &'static str {
    match status {
        Status::Starting => "🚀",
        Status::Downloading => "⬇️",
        Status::Saving => "💾",
        Status::Compressing => "🗜️",
        Status::Complete => "✅",
        Status::Error => "❌",
        Status::NotFound => "❔",
    }
}

pub fn format_size(size: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", size as u64, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{:.1}s", duration.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{}h{}m", secs / 3600, (secs % 3600) / 60)
    }
}
