//! Command line interface module
//!
//! Argument parsing plus the runner that drives an [`ArchiveService`](crate::pipeline::ArchiveService)
//! for the `pull`, `list`, `clear` and `fetch` commands.

pub mod args;
pub mod runner;

pub use args::{Args, Command};
pub use runner::Runner;
