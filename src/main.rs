// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Snapsort: screenshot ingestion and organization
//!
//! Watches screenshot folders, OCRs and classifies new captures, files them
//! into a dated category tree and indexes them for search.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::signal;
use tracing::info;

use snapsort::config::AppConfig;
use snapsort::db::{ScreenshotRecord, ScreenshotStore};
use snapsort::pipeline::Pipeline;
use snapsort::{Result, SnapsortError};

/// Snapsort CLI - screenshot organizer
#[derive(Parser, Debug)]
#[command(name = "snapsort")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version = "1.0.0")]
#[command(about = "Watch, OCR, classify and organize screenshots", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, default_value = "config.json", global = true)]
    config: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch the monitored directories until interrupted
    Start,

    /// Process every screenshot already in a directory
    Scan {
        /// Directory to scan (not recursive)
        dir: PathBuf,
    },

    /// Full-text search over indexed screenshots
    Search {
        /// Search query (FTS5 syntax)
        query: String,

        /// Maximum results
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show store statistics
    Stats,

    /// List the most recently processed screenshots
    Recent {
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Generate default configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,
    },

    /// Add a monitored directory
    AddDir {
        dir: PathBuf,
    },

    /// Remove a monitored directory
    RemoveDir {
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if !cli.quiet {
        info!("Snapsort v1.0.0");
    }

    let config = AppConfig::load(&cli.config)?;

    match cli.command {
        Commands::Start => run_start(config).await,
        Commands::Scan { dir } => run_scan(config, &dir).await,
        Commands::Search { query, limit } => run_search(config, &query, limit),
        Commands::Stats => run_stats(config),
        Commands::Recent { limit } => run_recent(config, limit),
        Commands::Config { action } => run_config_command(config, action, &cli.config),
    }
}

/// Watch until Ctrl+C or SIGTERM
async fn run_start(config: AppConfig) -> Result<()> {
    let mut pipeline = Pipeline::new(config)?;
    pipeline.start()?;

    info!("Watching for screenshots. Press Ctrl+C to stop.");
    wait_for_shutdown().await?;

    pipeline.stop().await?;
    info!("Snapsort stopped.");
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            res = ctrl_c => {
                res?;
                info!("Received Ctrl+C, shutting down...");
            }
            _ = terminate.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await?;
        info!("Received Ctrl+C, shutting down...");
    }

    Ok(())
}

async fn run_scan(config: AppConfig, dir: &Path) -> Result<()> {
    let mut pipeline = Pipeline::new(config)?;
    let count = pipeline.scan_directory(dir).await?;
    pipeline.stop().await?;
    println!("Processed {} screenshots from {:?}", count, dir);
    Ok(())
}

fn run_search(config: AppConfig, query: &str, limit: usize) -> Result<()> {
    let store = ScreenshotStore::open(&config.database.path)?;
    let results = store.search(query, limit)?;

    println!("Search results for '{}' ({}):", query, results.len());
    for record in &results {
        print_record(record);
    }
    Ok(())
}

fn run_stats(config: AppConfig) -> Result<()> {
    let store = ScreenshotStore::open(&config.database.path)?;
    let stats = store.get_stats()?;

    println!("Store Statistics:");
    println!("  Screenshots: {}", stats.total);
    println!("  Total size: {} bytes", stats.total_size);
    println!("  Duplicates: {}", stats.duplicates);
    if !stats.by_category.is_empty() {
        println!("  By category:");
        for (category, count) in &stats.by_category {
            println!("    {:<8} {}", category, count);
        }
    }
    Ok(())
}

fn run_recent(config: AppConfig, limit: usize) -> Result<()> {
    let store = ScreenshotStore::open(&config.database.path)?;
    let records = store.get_recent(limit)?;

    println!("Recent screenshots ({}):", records.len());
    for record in &records {
        print_record(record);
    }
    Ok(())
}

fn print_record(record: &ScreenshotRecord) {
    let marker = if record.is_duplicate { " [duplicate]" } else { "" };
    println!(
        "  {}: [{}] {}{}",
        record.id.unwrap_or_default(),
        record.category,
        record.filepath,
        marker
    );
}

fn run_config_command(mut config: AppConfig, action: ConfigCommands, config_path: &Path) -> Result<()> {
    match action {
        ConfigCommands::Show => {
            let json = serde_json::to_string_pretty(&config)?;
            println!("{}", json);
        }
        ConfigCommands::Generate { output } => {
            AppConfig::default().save(&output)?;
            println!("Generated config at {:?}", output);
        }
        ConfigCommands::AddDir { dir } => {
            if !dir.is_dir() {
                return Err(SnapsortError::Config(format!("Not a directory: {:?}", dir)));
            }
            if config.monitored_dirs.contains(&dir) {
                println!("{:?} is already monitored", dir);
            } else {
                config.monitored_dirs.push(dir.clone());
                config.save(config_path)?;
                println!("Added {:?}", dir);
            }
        }
        ConfigCommands::RemoveDir { dir } => {
            let before = config.monitored_dirs.len();
            config.monitored_dirs.retain(|d| d != &dir);
            if config.monitored_dirs.len() == before {
                println!("{:?} was not monitored", dir);
            } else {
                config.save(config_path)?;
                println!("Removed {:?}", dir);
            }
        }
    }

    Ok(())
}
