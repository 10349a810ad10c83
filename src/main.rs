//! vcompress - in-place video compressor
//!
//! # Usage
//!
//! ```bash
//! vcompress compress --input clip.mp4 --quality medium
//! vcompress inspect --input clip.mp4
//! vcompress profiles
//! ```

use anyhow::Result;
use clap::Parser;

use video_compressor::cli::{commands, Cli, Commands};

/// Main entry point for the vcompress CLI
fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = cli.log_level.as_deref();

    match cli.command {
        Commands::Compress(args) => commands::compress(args, log_level),
        Commands::Inspect(args) => commands::inspect(args, log_level),
        Commands::Profiles(args) => commands::profiles(args, log_level),
    }
}
