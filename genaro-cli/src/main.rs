//! Genaro CLI
//!
//! Command-line client for storing files on the Genaro network.
//!
//! # Commands
//! - `upload` - Upload a file to a bucket
//! - `download` - Download a file from a bucket
//! - `config` - Show or edit configuration
//!
//! # Configuration
//! Config file: ~/.genaro/config.toml
//! Signing key: ~/.genaro/id_ed25519

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use genaro_transfer::{
    Bridge, Downloader, FarmerClient, HttpBridge, HttpFarmerClient, TransferConfig, Uploader,
};
use std::path::PathBuf;
use std::sync::Arc;

mod commands;
mod config;
mod symbols;

use commands::{download, upload};
use config::GenaroConfig;

#[derive(Parser)]
#[command(name = "genaro")]
#[command(about = "Genaro decentralized storage CLI")]
#[command(version)]
struct Cli {
    /// Bridge URL (overrides config file)
    #[arg(long, global = true)]
    bridge: Option<String>,

    /// Shards transferred in parallel (overrides config file)
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file to a bucket
    Upload {
        /// Path to the file
        path: PathBuf,

        /// Target bucket id
        #[arg(short, long)]
        bucket: Option<String>,

        /// Name in the bucket (defaults to the file name)
        #[arg(short, long)]
        name: Option<String>,

        /// Add Reed-Solomon parity shards
        #[arg(short, long)]
        reed_solomon: bool,
    },

    /// Download a file from a bucket
    Download {
        /// File id
        file_id: String,

        /// Bucket id
        #[arg(short, long)]
        bucket: Option<String>,

        /// Output path (file or directory)
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Replace an existing output file
        #[arg(long)]
        overwrite: bool,
    },

    /// Show or initialize configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Show config file path
    Path,

    /// Initialize config file with defaults
    Init {
        /// Overwrite existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., bridge.url, transfer.max_concurrent_shards)
        key: String,
        /// Value to set
        value: String,
    },
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    genaro_transfer::metrics::init_metrics();

    if let Err(e) = run(Cli::parse()).await {
        eprintln!("{} {:#}", style(symbols::CROSS).red(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Load configuration from ~/.genaro/config.toml
    let cfg = config::load_config();

    match cli.command {
        Commands::Upload {
            path,
            bucket,
            name,
            reed_solomon,
        } => {
            let bucket = resolve_bucket(bucket, &cfg)?;
            let (bridge, farmers, transfer) = engine(cli.bridge, cli.concurrency, &cfg)?;
            let bucket_key = commands::bucket_key(&bucket)?;

            let uploader = Uploader::new(bridge, farmers, transfer);
            let config = upload::UploadConfig {
                path,
                bucket,
                name,
                reed_solomon,
            };
            commands::upload(&uploader, config, bucket_key).await?;
        }

        Commands::Download {
            file_id,
            bucket,
            output,
            overwrite,
        } => {
            let bucket = resolve_bucket(bucket, &cfg)?;
            let (bridge, farmers, transfer) = engine(cli.bridge, cli.concurrency, &cfg)?;
            let bucket_key = commands::bucket_key(&bucket)?;

            let downloader = Downloader::new(bridge, farmers, transfer);
            let config = download::DownloadConfig {
                bucket,
                file_id,
                output,
                overwrite,
            };
            commands::download(&downloader, config, bucket_key).await?;
        }

        Commands::Config { command } => {
            handle_config_command(command)?;
        }
    }

    Ok(())
}

fn resolve_bucket(bucket: Option<String>, cfg: &GenaroConfig) -> Result<String> {
    bucket
        .or_else(|| cfg.cli.default_bucket.clone())
        .context("No bucket given. Pass --bucket or run 'genaro config set cli.default_bucket <id>'")
}

/// Build the bridge and farmer clients; CLI args override the config file
fn engine(
    bridge_url: Option<String>,
    concurrency: Option<usize>,
    cfg: &GenaroConfig,
) -> Result<(Arc<dyn Bridge>, Arc<dyn FarmerClient>, TransferConfig)> {
    let mut transfer = cfg.transfer.clone();
    if let Some(concurrency) = concurrency {
        transfer.max_concurrent_shards = concurrency;
    }
    let transfer = transfer.to_transfer_config()?;

    let url = bridge_url.unwrap_or_else(|| cfg.bridge.url.clone());
    let key = config::load_or_create_key(&config::key_file_path(cfg)?)?;

    let bridge = HttpBridge::new(&url, key, transfer.bridge_timeout)
        .with_context(|| format!("Cannot use bridge at {}", url))?;
    let farmers = HttpFarmerClient::new(transfer.farmer_timeout)?;

    Ok((Arc::new(bridge), Arc::new(farmers), transfer))
}

/// Handle config subcommands
fn handle_config_command(command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            let cfg = config::load_config();
            println!();
            println!("{}", style("Genaro Configuration").bold().underlined());
            println!();
            println!("{}", style("[bridge]").cyan());
            println!("  url = \"{}\"", cfg.bridge.url);
            if let Ok(path) = config::key_file_path(&cfg) {
                println!("  key_file = \"{}\"", path.display());
            }
            println!();
            println!("{}", style("[transfer]").cyan());
            let t = &cfg.transfer;
            println!("  max_concurrent_shards = {}", t.max_concurrent_shards);
            println!("  max_shard_requests = {}", t.max_shard_requests);
            println!("  max_pointer_replacements = {}", t.max_pointer_replacements);
            println!("  max_push_attempts = {}", t.max_push_attempts);
            println!("  max_bridge_attempts = {}", t.max_bridge_attempts);
            println!("  bridge_timeout_secs = {}", t.bridge_timeout_secs);
            println!("  farmer_timeout_secs = {}", t.farmer_timeout_secs);
            println!("  retry_delay_ms = {}", t.retry_delay_ms);
            println!("  report_drain_ms = {}", t.report_drain_ms);
            println!();
            if let Some(bucket) = &cfg.cli.default_bucket {
                println!("{}", style("[cli]").cyan());
                println!("  default_bucket = \"{}\"", bucket);
                println!();
            }

            if let Ok(path) = config::config_file_path() {
                println!("{} {}", style("Config file:").dim(), path.display());
                if !path.exists() {
                    println!(
                        "{} Run '{}' to create it",
                        style("(not created yet)").yellow(),
                        style("genaro config init").green()
                    );
                }
            }
        }

        Some(ConfigCommands::Path) => {
            println!("{}", config::config_file_path()?.display());
        }

        Some(ConfigCommands::Init { force }) => {
            let path = config::config_file_path()?;
            if path.exists() && !force {
                println!(
                    "{} Config file already exists at {}",
                    style(symbols::WARN).yellow(),
                    path.display()
                );
                println!("Use --force to overwrite");
                return Ok(());
            }

            config::save_config(&GenaroConfig::default())?;
            println!(
                "{} Config file created at {}",
                style(symbols::CHECK).green(),
                path.display()
            );
        }

        Some(ConfigCommands::Set { key, value }) => {
            let mut cfg = config::load_config();
            config::set_value(&mut cfg, &key, value)?;
            cfg.transfer.to_transfer_config()?;

            config::save_config(&cfg)?;
            println!("{} Configuration updated", style(symbols::CHECK).green());
        }
    }

    Ok(())
}
