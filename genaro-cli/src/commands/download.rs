//! Download Command
//!
//! Downloads a file from a bucket, rebuilding lost shards when the file
//! carries parity.

use super::{follow, format_size};
use crate::symbols;
use anyhow::{Context, Result};
use console::style;
use genaro_core::EncryptionKey;
use genaro_transfer::{DownloadRequest, Downloader};
use std::path::PathBuf;
use tokio::fs;

/// Download configuration
pub struct DownloadConfig {
    pub bucket: String,
    pub file_id: String,
    pub output: PathBuf,
    pub overwrite: bool,
}

/// Run download command
pub async fn run(
    downloader: &Downloader,
    config: DownloadConfig,
    bucket_key: EncryptionKey,
) -> Result<()> {
    // If output is a directory, name the file after its id
    let file_path = if config.output.is_dir() {
        config.output.join(&config.file_id)
    } else {
        config.output.clone()
    };

    // Ensure parent directory exists
    if let Some(parent) = file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    let handle = downloader.download(DownloadRequest {
        bucket_id: config.bucket.clone(),
        file_id: config.file_id.clone(),
        path: file_path.clone(),
        bucket_key,
        overwrite: config.overwrite,
    });

    let completion = follow(handle, format!("Downloading {}", config.file_id))
        .await
        .context("Download failed")?;

    println!(
        "\n{} {} {}\n  Size: {}",
        style(symbols::CHECK).green(),
        style("Successfully downloaded to").green().bold(),
        file_path.display(),
        format_size(completion.size)
    );

    Ok(())
}
