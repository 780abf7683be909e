//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{HistoryCommand, RunCommand, ValidateCommand};
use std::ffi::OsString;

/// Fetch, transform and render step documents into videos
#[derive(Debug, Parser, Clone)]
#[command(name = "visuflow")]
#[command(version)]
#[command(about = "Runs step documents that fetch data, transform it and render videos", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a step document
    Run(RunCommand),

    /// Validate a step document without running it
    Validate(ValidateCommand),

    /// Show run history
    History(HistoryCommand),

    /// Check that ffmpeg and ffprobe can be started
    Check,
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
