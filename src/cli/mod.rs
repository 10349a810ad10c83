//! CLI module for vcompress
//!
//! This module handles command-line argument parsing and command execution.

use clap::{Parser, Subcommand};

pub mod args;
pub mod commands;

pub use args::{CompressArgs, InspectArgs, ProfilesArgs};

/// vcompress - in-place video compressor
///
/// Re-encodes a video to H.264 + AAC at a fixed quality tier and replaces the
/// original file with the result.
#[derive(Parser)]
#[command(name = "vcompress")]
#[command(about = "Compress video files in place to a fixed quality tier")]
#[command(version)]
#[command(long_about = None)]
pub struct Cli {
    /// Logging level (overrides config and VCOMPRESS_LOG_LEVEL)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// The command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Compress a video file in place
    Compress(CompressArgs),
    /// List a file's tracks and the ones compression would use
    Inspect(InspectArgs),
    /// Print the quality tier table
    Profiles(ProfilesArgs),
}
