//! Upload Command
//!
//! Shards, encrypts and uploads a local file to a bucket.

use super::{follow, format_size};
use crate::symbols;
use anyhow::{Context, Result};
use console::style;
use genaro_core::EncryptionKey;
use genaro_transfer::{UploadRequest, Uploader};
use std::path::PathBuf;
use tokio::fs;

/// Upload configuration
pub struct UploadConfig {
    pub path: PathBuf,
    pub bucket: String,
    /// Name in the bucket; defaults to the local file name
    pub name: Option<String>,
    pub reed_solomon: bool,
}

/// Run upload command
pub async fn run(uploader: &Uploader, config: UploadConfig, bucket_key: EncryptionKey) -> Result<()> {
    let metadata = fs::metadata(&config.path)
        .await
        .with_context(|| format!("Path does not exist: {}", config.path.display()))?;
    if !metadata.is_file() {
        anyhow::bail!("Not a file: {}", config.path.display());
    }

    let name = match config.name {
        Some(name) => name,
        None => config
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .context("File name is not valid UTF-8")?
            .to_string(),
    };

    let handle = uploader.upload(UploadRequest {
        bucket_id: config.bucket.clone(),
        file_name: name.clone(),
        path: config.path.clone(),
        bucket_key,
        reed_solomon: config.reed_solomon,
    });

    let completion = follow(handle, format!("Uploading {}", name))
        .await
        .context("Upload failed")?;

    println!(
        "\n{} {} {}/{}\n  File ID: {}\n  Size: {}",
        style(symbols::CHECK).green(),
        style("Successfully uploaded:").green().bold(),
        config.bucket,
        name,
        completion.file_id,
        format_size(completion.size)
    );
    if config.reed_solomon {
        println!("  Redundancy: {}", style("reed-solomon").cyan());
    }

    Ok(())
}
