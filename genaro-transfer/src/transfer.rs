//! Single-shard transfers against farmers
//!
//! Handles one attempt at a time:
//! 1. Fetch or push the shard bytes within the farmer timeout
//! 2. Verify size and content hash of fetched bytes
//! 3. Record the outcome in the exchange report

use crate::farmer::{FarmerClient, ProgressFn};
use crate::pointer::Pointer;
use crate::report::{
    ExchangeRecord, DOWNLOAD_ERROR, FAILED_INTEGRITY, SHARD_DOWNLOADED, SHARD_UPLOADED,
    TRANSFER_FAILED,
};
use crate::tracker::{ShardStatus, ShardTracker};
use bytes::Bytes;
use genaro_core::{GenaroError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

/// Executes farmer transfers for pointers and shard trackers
#[derive(Clone)]
pub struct ShardTransfer {
    farmers: Arc<dyn FarmerClient>,
    timeout: Duration,
}

impl ShardTransfer {
    pub fn new(farmers: Arc<dyn FarmerClient>, timeout: Duration) -> Self {
        Self { farmers, timeout }
    }

    /// Fetch and verify the shard behind `pointer`.
    ///
    /// The pointer must have a farmer assignment. Its report is overwritten
    /// with this attempt's outcome.
    #[instrument(skip(self, pointer, progress), fields(index = pointer.index))]
    pub async fn fetch(&self, pointer: &mut Pointer, progress: ProgressFn) -> Result<Bytes> {
        let assignment = pointer.assignment().cloned().ok_or(GenaroError::BridgePointer)?;
        pointer.report.begin();

        let result = timeout(
            self.timeout,
            self.farmers.download_shard(
                &assignment.farmer,
                &pointer.hash,
                &assignment.token,
                pointer.size,
                progress,
            ),
        )
        .await
        .unwrap_or(Err(GenaroError::FarmerTimeout));

        let data = match result {
            Ok(data) => data,
            Err(e) => {
                pointer.report.fail(DOWNLOAD_ERROR);
                warn!(farmer = %assignment.farmer.node_id, error = %e, "Shard download failed");
                return Err(e);
            }
        };
        pointer.downloaded_size = data.len() as u64;

        if data.len() as u64 != pointer.size || !pointer.hash.verify(&data) {
            pointer.report.fail(FAILED_INTEGRITY);
            warn!(
                farmer = %assignment.farmer.node_id,
                expected = pointer.size,
                received = data.len(),
                "Shard failed integrity check"
            );
            return Err(GenaroError::FarmerIntegrity);
        }

        pointer.report.succeed(SHARD_DOWNLOADED);
        debug!(farmer = %assignment.farmer.node_id, size = data.len(), "Shard downloaded");
        Ok(data)
    }

    /// Push the tracker's shard to its assigned farmer
    #[instrument(skip(self, tracker, progress), fields(index = tracker.index))]
    pub async fn push(&self, tracker: &mut ShardTracker, progress: ProgressFn) -> Result<()> {
        let assignment = tracker.pointer.clone().ok_or(GenaroError::BridgeOffer)?;

        tracker.has_tried_to_push = true;
        tracker.push_count += 1;
        tracker.uploaded_size = 0;
        tracker.report.begin();

        let result = timeout(
            self.timeout,
            self.farmers.upload_shard(
                &assignment.farmer,
                &tracker.meta.hash,
                &assignment.token,
                tracker.data.clone(),
                progress,
            ),
        )
        .await
        .unwrap_or(Err(GenaroError::FarmerTimeout));

        match result {
            Ok(()) => {
                tracker.uploaded_size = tracker.meta.size;
                tracker.status = ShardStatus::PushSuccess;
                tracker.report.succeed(SHARD_UPLOADED);
                debug!(farmer = %assignment.farmer.node_id, "Shard uploaded");
                Ok(())
            }
            Err(e) => {
                tracker.status = ShardStatus::PushFailed;
                tracker.report.fail(TRANSFER_FAILED);
                warn!(farmer = %assignment.farmer.node_id, error = %e, "Shard upload failed");
                Err(e)
            }
        }
    }
}

/// Report of the latest attempt on `pointer`
pub fn pointer_record(pointer: &Pointer) -> Option<ExchangeRecord> {
    pointer.farmer().map(|farmer| ExchangeRecord {
        data_hash: pointer.hash.to_hex(),
        farmer_id: farmer.node_id.clone(),
        report: pointer.report.clone(),
    })
}
