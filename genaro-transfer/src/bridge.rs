//! Bridge seam
//!
//! The bridge brokers farmer assignments and stores file and frame metadata.
//! The engine only talks to it through the [`Bridge`] trait; the HTTP
//! implementation lives in [`crate::http`].

use crate::config::TransferConfig;
use crate::pointer::{FarmerPointer, Pointer, PointerRecord};
use crate::report::ExchangeRecord;
use genaro_core::{GenaroError, Result, ShardMeta, ERASURE_REED_SOLOMON};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// File metadata stored by the bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub id: String,
    pub filename: String,
    pub size: u64,
    /// Hex-encoded per-file index used for key derivation
    #[serde(default)]
    pub index: Option<String>,
    #[serde(default)]
    pub erasure: Option<ErasureInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErasureInfo {
    #[serde(rename = "type")]
    pub kind: String,
}

impl FileInfo {
    /// Whether the file carries Reed-Solomon parity shards
    pub fn reed_solomon(&self) -> Result<bool> {
        match &self.erasure {
            None => Ok(false),
            Some(e) if e.kind == ERASURE_REED_SOLOMON => Ok(true),
            Some(e) => Err(GenaroError::UnsupportedErasure(e.kind.clone())),
        }
    }

    /// Decoded per-file index
    pub fn index_bytes(&self) -> Result<Vec<u8>> {
        let index = self.index.as_deref().ok_or(GenaroError::BridgeFileInfo)?;
        hex::decode(index).map_err(|_| GenaroError::BridgeFileInfo)
    }
}

/// Registers a completed frame as a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateFileRequest {
    pub bucket_id: String,
    pub frame_id: String,
    pub filename: String,
    /// Plaintext size in bytes
    pub size: u64,
    /// Hex-encoded per-file index
    pub index: String,
    pub erasure: Option<String>,
}

#[async_trait::async_trait]
pub trait Bridge: Send + Sync {
    async fn get_file_info(&self, bucket_id: &str, file_id: &str) -> Result<FileInfo>;

    /// One page of a file's pointer list
    async fn get_pointers(
        &self,
        bucket_id: &str,
        file_id: &str,
        limit: usize,
        skip: usize,
    ) -> Result<Vec<PointerRecord>>;

    /// A new farmer assignment for the shard at `index`, avoiding `excluded`
    /// node ids
    async fn replace_pointer(
        &self,
        bucket_id: &str,
        file_id: &str,
        index: usize,
        excluded: &[String],
    ) -> Result<PointerRecord>;

    async fn file_exists(&self, bucket_id: &str, file_name: &str) -> Result<bool>;

    async fn create_frame(&self) -> Result<String>;

    /// Register a shard with a frame and receive the farmer to push it to
    async fn add_shard_to_frame(
        &self,
        frame_id: &str,
        shard: &ShardMeta,
        excluded: &[String],
    ) -> Result<FarmerPointer>;

    /// Finalize a frame as a file, returning the new file id
    async fn create_file(&self, request: &CreateFileRequest) -> Result<String>;

    async fn send_exchange_report(&self, record: &ExchangeRecord) -> Result<()>;
}

/// Bound a bridge call by `limit`; expiry is a bridge timeout
pub(crate) async fn timed<T>(limit: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .unwrap_or(Err(GenaroError::BridgeTimeout))
}

/// Run a bridge call, repeating it while it fails with a retryable error
/// (rate limit, timeout, internal error).
///
/// Each attempt is bounded by `config.bridge_timeout`. The pause before
/// attempt `n + 1` is `retry_delay * 2^(n - 1)`. Callers observe cancellation
/// by wrapping the whole call, which drops any pending pause.
pub(crate) async fn with_retry<T, F, Fut>(config: &TransferConfig, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match timed(config.bridge_timeout, call()).await {
            Err(e) if e.is_retryable() && attempt < config.max_bridge_attempts => {
                let delay = backoff(config.retry_delay, attempt);
                warn!(error = %e, attempt, delay_ms = delay.as_millis() as u64, "Bridge request failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

fn backoff(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1 << (attempt - 1).min(10))
}

/// Resolve a file's full pointer list page by page.
///
/// Pages of `config.pointer_page_size` are requested with an increasing skip
/// offset until one comes back empty; short pages do not end the walk. An
/// empty overall list is a request error.
#[instrument(skip(bridge, config))]
pub async fn resolve_pointers(
    bridge: &dyn Bridge,
    bucket_id: &str,
    file_id: &str,
    config: &TransferConfig,
) -> Result<Vec<Pointer>> {
    let mut records = Vec::new();

    loop {
        let skip = records.len();
        let page = with_retry(config, || {
            bridge.get_pointers(bucket_id, file_id, config.pointer_page_size, skip)
        })
        .await?;
        if page.is_empty() {
            break;
        }
        debug!(skip, count = page.len(), "Received pointer page");
        records.extend(page);
    }

    if records.is_empty() {
        return Err(GenaroError::BridgeRequest);
    }

    let mut pointers = records
        .into_iter()
        .map(Pointer::from_record)
        .collect::<Result<Vec<_>>>()?;
    pointers.sort_by_key(|p| p.index);
    Ok(pointers)
}
