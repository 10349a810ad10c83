//! Command-line argument definitions

use clap::Args;
use std::path::PathBuf;

/// Arguments for the compress command
#[derive(Args, Debug)]
pub struct CompressArgs {
    /// Video file to compress in place
    #[arg(short, long)]
    pub input: Option<String>,

    /// Quality tier: low, medium or high (default from config, else high)
    #[arg(short, long)]
    pub quality: Option<String>,

    /// Configuration file
    #[arg(long, env = "VCOMPRESS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Print the final report as JSON
    #[arg(long)]
    pub json: bool,

    /// Do not print progress lines
    #[arg(long)]
    pub quiet: bool,
}

/// Arguments for the inspect command
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Video file to inspect
    #[arg(short, long)]
    pub input: String,

    /// Configuration file
    #[arg(long, env = "VCOMPRESS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the profiles command
#[derive(Args, Debug)]
pub struct ProfilesArgs {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}
