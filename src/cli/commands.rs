//! Command implementations

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info};

use crate::adapters::{init_logging, AppConfig};
use crate::app::{AppContainer, ChannelObserver, JobEvent};
use crate::cli::args::{CompressArgs, InspectArgs, ProfilesArgs};
use crate::domain::model::{JobReport, QualityProfile, QualityTier};
use crate::error::CompressError;

/// Load configuration, apply the CLI log level and start logging
pub fn prepare(config_path: Option<&Path>, log_level: Option<&str>) -> Result<AppConfig> {
    let mut config = AppConfig::load(config_path)?;
    if let Some(level) = log_level {
        config.logging.level = level.to_string();
        config.validate()?;
    }
    init_logging(&config.logging);
    Ok(config)
}

/// Execute the compress command
pub fn compress(args: CompressArgs, log_level: Option<&str>) -> Result<()> {
    let config = prepare(args.config.as_deref(), log_level)?;

    let input = args
        .input
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or(CompressError::MissingPath)?;
    if !Path::new(input).exists() {
        return Err(CompressError::SourceNotFound {
            path: input.to_string(),
        }
        .into());
    }
    let quality = args
        .quality
        .clone()
        .unwrap_or_else(|| config.compressor.default_quality.to_string());
    info!(input, quality = %QualityTier::parse(&quality), "starting compression");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let report = runtime.block_on(async {
        let container = AppContainer::with_libav(config)?;
        let interactor = container.compress_interactor();
        let (observer, mut events) = ChannelObserver::new();
        let handle = interactor.compress_video(Some(input), Some(&quality), Box::new(observer))?;

        while let Some(event) = events.recv().await {
            match event {
                JobEvent::Progress(percent) if !args.quiet => eprintln!("Progress: {percent}%"),
                JobEvent::Progress(_) => {}
                JobEvent::Succeeded(_) | JobEvent::Failed(_) => break,
            }
        }

        let outcome = handle.wait().await;
        interactor.shutdown().await?;
        outcome
    })?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &JobReport) {
    let p = &report.profile;
    println!("Compressed {}", report.source.display());
    println!(
        "  quality:  {} ({}x{}, {} kbps video, {} kbps audio)",
        p.tier,
        p.width,
        p.height,
        p.video_bitrate / 1000,
        p.audio_bitrate / 1000
    );
    println!(
        "  size:     {} -> {} bytes ({:.1}%)",
        report.original_size,
        report.compressed_size,
        report.size_ratio_percent()
    );
    print!("  tracks:   video {} samples", report.summary.video.samples_written);
    match &report.summary.audio {
        Some(audio) => println!(", audio {} samples", audio.samples_written),
        None => println!(", no audio"),
    }
    println!("  elapsed:  {} ms", report.elapsed_ms());
}

/// Execute the inspect command
pub fn inspect(args: InspectArgs, log_level: Option<&str>) -> Result<()> {
    let config = prepare(args.config.as_deref(), log_level)?;
    let container = AppContainer::with_libav(config)?;
    let interactor = container.inspect_interactor();

    let report = interactor.inspect(&args.input)?;
    if args.json {
        println!("{}", interactor.format_as_json(&report)?);
    } else {
        print!("{}", interactor.format_as_text(&report));
    }
    Ok(())
}

/// Execute the profiles command
pub fn profiles(args: ProfilesArgs, log_level: Option<&str>) -> Result<()> {
    prepare(None, log_level)?;
    let profiles: Vec<QualityProfile> = QualityTier::ALL
        .into_iter()
        .map(QualityProfile::for_tier)
        .collect();
    debug!(count = profiles.len(), "listing profiles");

    if args.json {
        println!("{}", serde_json::to_string_pretty(&profiles)?);
        return Ok(());
    }
    println!("{:<8} {:<11} {:>10} {:>10}", "TIER", "RESOLUTION", "VIDEO", "AUDIO");
    for p in profiles {
        println!(
            "{:<8} {:<11} {:>10} {:>10}",
            p.tier.as_str(),
            format!("{}x{}", p.width, p.height),
            format!("{} kbps", p.video_bitrate / 1000),
            format!("{} kbps", p.audio_bitrate / 1000)
        );
    }
    Ok(())
}
