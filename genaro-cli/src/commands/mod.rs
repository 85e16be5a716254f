//! CLI Commands

pub mod download;
pub mod upload;

pub use download::run as download;
pub use upload::run as upload;

use anyhow::{Context, Result};
use genaro_core::EncryptionKey;
use genaro_transfer::{Completion, TransferEvent, TransferHandle, TransferOutcome};
use indicatif::{ProgressBar, ProgressStyle};

/// Derive the bucket key from the user's passphrase, read from
/// `GENARO_PASSPHRASE` or prompted for
pub fn bucket_key(bucket_id: &str) -> Result<EncryptionKey> {
    let passphrase = match std::env::var("GENARO_PASSPHRASE") {
        Ok(p) => p,
        Err(_) => rpassword::prompt_password("Passphrase: ").context("Failed to read passphrase")?,
    };
    if passphrase.is_empty() {
        anyhow::bail!("Passphrase must not be empty");
    }

    EncryptionKey::derive_from_password(passphrase.as_bytes(), bucket_id.as_bytes())
        .context("Failed to derive bucket key")
}

/// Render transfer events on a progress bar until the transfer ends.
/// Ctrl-C cancels the transfer.
pub async fn follow(mut handle: TransferHandle, message: String) -> Result<Completion> {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")?
            .progress_chars("#>-"),
    );
    pb.set_message(message);

    let cancel = handle.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    while let Some(event) = handle.events().recv().await {
        match event {
            TransferEvent::Begin => pb.tick(),
            TransferEvent::Progress(fraction) => pb.set_position((fraction * 100.0) as u64),
            event if event.is_terminal() => break,
            _ => {}
        }
    }
    interrupt.abort();

    match handle.wait().await {
        TransferOutcome::Finished(completion) => {
            pb.finish_and_clear();
            Ok(completion)
        }
        TransferOutcome::Failed(e) => {
            pb.abandon();
            Err(e.into())
        }
        TransferOutcome::Canceled => {
            pb.abandon();
            anyhow::bail!("Transfer canceled")
        }
    }
}

/// Format bytes as human-readable string
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
