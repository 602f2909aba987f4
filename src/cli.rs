//! Command-line interface for callscribe
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Call recording transcription and review pipeline
#[derive(Parser, Debug)]
#[command(
    name = "callscribe",
    version,
    about = "Call recording transcription and review pipeline"
)]
pub struct Cli {
    /// Subcommand to execute (default: run)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress console output (file logging still applies)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch the audio directories and process calls until interrupted
    Run {
        /// Exit once the startup backlog has drained instead of watching
        #[arg(long)]
        once: bool,
    },

    /// Validate the configuration and report every problem found
    Check,

    /// Parse a transcript file and print the segments as JSON
    Parse {
        /// Transcript file to parse
        file: PathBuf,

        /// Run the segment normalizer over the parsed output
        #[arg(long)]
        normalize: bool,
    },
}
