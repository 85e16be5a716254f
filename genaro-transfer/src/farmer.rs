//! Farmer seam
//!
//! Farmers serve and accept raw shard bytes authorized by a bridge-issued
//! token. The HTTP implementation lives in [`crate::http`].

use crate::pointer::Farmer;
use bytes::Bytes;
use genaro_core::{Result, ShardHash};
use std::sync::Arc;

/// Called with the bytes moved so far in the current attempt
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

/// Progress callback that ignores updates
pub fn no_progress() -> ProgressFn {
    Arc::new(|_| {})
}

#[async_trait::async_trait]
pub trait FarmerClient: Send + Sync {
    /// Fetch the shard stored under `hash`. More than `size` bytes is an
    /// integrity error.
    async fn download_shard(
        &self,
        farmer: &Farmer,
        hash: &ShardHash,
        token: &str,
        size: u64,
        progress: ProgressFn,
    ) -> Result<Bytes>;

    /// Store `data` under `hash`
    async fn upload_shard(
        &self,
        farmer: &Farmer,
        hash: &ShardHash,
        token: &str,
        data: Bytes,
        progress: ProgressFn,
    ) -> Result<()>;
}
