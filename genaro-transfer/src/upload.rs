//! Upload orchestration
//!
//! Encrypts a local file into shards, adds parity when requested, registers
//! each shard with a bridge frame and pushes it to the farmer the bridge
//! picked. A shard that cannot be placed after its push budget fails the
//! whole upload; once every shard is placed the frame becomes a file.

use crate::bridge::{timed, with_retry, Bridge, CreateFileRequest};
use crate::config::TransferConfig;
use crate::events::{cancellable, spawn_transfer, Completion, EventSink, ProgressTracker, TransferHandle};
use crate::farmer::{FarmerClient, ProgressFn};
use crate::metrics;
use crate::report::{ExchangeReporter, ReportSender};
use crate::tracker::ShardTracker;
use crate::transfer::ShardTransfer;
use genaro_core::crypto::generate_file_index;
use genaro_core::{
    prepare_shards, EncryptionKey, GenaroError, Result, ShardLayout, ERASURE_REED_SOLOMON,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// What to upload and where to
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub bucket_id: String,
    /// Name the file is stored under in the bucket
    pub file_name: String,
    pub path: PathBuf,
    pub bucket_key: EncryptionKey,
    /// Add Reed-Solomon parity shards
    pub reed_solomon: bool,
}

/// Uploads files to the network
pub struct Uploader {
    bridge: Arc<dyn Bridge>,
    farmers: Arc<dyn FarmerClient>,
    config: TransferConfig,
}

impl Uploader {
    pub fn new(bridge: Arc<dyn Bridge>, farmers: Arc<dyn FarmerClient>, config: TransferConfig) -> Self {
        Self {
            bridge,
            farmers,
            config,
        }
    }

    /// Start an upload; progress and the outcome arrive through the handle
    pub fn upload(&self, request: UploadRequest) -> TransferHandle {
        let bridge = self.bridge.clone();
        let farmers = self.farmers.clone();
        let config = self.config.clone();

        spawn_transfer(move |sink, cancel| async move {
            run_upload(bridge, farmers, config, request, sink, cancel).await
        })
    }
}

/// State shared by the shard tasks of one upload
struct UploadJob {
    bridge: Arc<dyn Bridge>,
    transfer: ShardTransfer,
    config: TransferConfig,
    frame_id: String,
    reports: ReportSender,
    cancel: CancellationToken,
}

#[instrument(skip_all, fields(bucket = %request.bucket_id, file = %request.file_name))]
async fn run_upload(
    bridge: Arc<dyn Bridge>,
    farmers: Arc<dyn FarmerClient>,
    config: TransferConfig,
    request: UploadRequest,
    sink: EventSink,
    cancel: CancellationToken,
) -> Result<Completion> {
    let data = tokio::fs::read(&request.path).await.map_err(|e| {
        warn!(path = %request.path.display(), error = %e, "Cannot read input file");
        GenaroError::FileRead
    })?;
    let size = data.len() as u64;
    let layout = ShardLayout::for_upload(size, request.reed_solomon)?;

    let exists = cancellable(
        &cancel,
        with_retry(&config, || {
            bridge.file_exists(&request.bucket_id, &request.file_name)
        }),
    )
    .await?;
    if exists {
        return Err(GenaroError::FileAlreadyExists);
    }

    let index = generate_file_index();
    let file_key = EncryptionKey::derive_file_key(&request.bucket_key, &index);
    let challenges = config.shard_challenges;
    let shards = tokio::task::spawn_blocking(move || {
        prepare_shards(&data, &layout, &file_key, challenges)
    })
    .await
    .map_err(|_| GenaroError::Unknown)??;

    info!(
        size,
        data_shards = layout.data_shards(),
        parity_shards = layout.parity_shards(),
        "Prepared shards"
    );

    let frame_id = cancellable(&cancel, with_retry(&config, || bridge.create_frame())).await?;
    debug!(frame = %frame_id, "Created frame");

    let reporter = ExchangeReporter::spawn(bridge.clone(), config.bridge_timeout);
    let job = Arc::new(UploadJob {
        bridge: bridge.clone(),
        transfer: ShardTransfer::new(farmers, config.farmer_timeout),
        config: config.clone(),
        frame_id: frame_id.clone(),
        reports: reporter.sender(),
        cancel: cancel.clone(),
    });

    let total = shards.iter().map(|s| s.meta.size).sum();
    let progress = ProgressTracker::new(shards.len(), total, sink);
    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_shards));
    let mut tasks = JoinSet::new();

    for shard in shards {
        let job = job.clone();
        let semaphore = semaphore.clone();
        let progress = progress.clone();

        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| GenaroError::TransferCanceled)?;
            job.push_shard(ShardTracker::new(shard), progress).await
        });
    }

    while let Some(joined) = tasks.join_next().await {
        let tracker = joined.map_err(|_| GenaroError::Unknown)??;
        debug!(index = tracker.index, attempts = tracker.push_count, "Shard placed");
    }
    drop(job);

    let create = CreateFileRequest {
        bucket_id: request.bucket_id.clone(),
        frame_id,
        filename: request.file_name.clone(),
        size,
        index: hex::encode(index),
        erasure: request
            .reed_solomon
            .then(|| ERASURE_REED_SOLOMON.to_string()),
    };
    let file_id = cancellable(&cancel, with_retry(&config, || bridge.create_file(&create))).await?;

    reporter.shutdown(config.report_drain).await;
    Ok(Completion { file_id, size })
}

impl UploadJob {
    /// Place one shard: obtain a farmer from the frame, push, and on failure
    /// retry with that farmer excluded
    #[instrument(skip(self, tracker, progress), fields(index = tracker.index))]
    async fn push_shard(
        &self,
        mut tracker: ShardTracker,
        progress: Arc<ProgressTracker>,
    ) -> Result<ShardTracker> {
        let slot = tracker.index;
        let mut offer_failures = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Err(GenaroError::TransferCanceled);
            }
            if tracker.push_count >= self.config.max_push_attempts {
                warn!(excluded = ?tracker.excluded, "No farmer accepted the shard");
                return Err(GenaroError::FarmerExhausted);
            }

            if tracker.pointer.is_none() {
                let offer = cancellable(
                    &self.cancel,
                    timed(
                        self.config.bridge_timeout,
                        self.bridge
                            .add_shard_to_frame(&self.frame_id, &tracker.meta, &tracker.excluded),
                    ),
                )
                .await;

                match offer {
                    Ok(pointer) => {
                        debug!(farmer = %pointer.farmer.node_id, "Received storage offer");
                        tracker.pointer = Some(pointer);
                    }
                    Err(e) if e.is_canceled() || e.is_fatal() => return Err(e),
                    Err(e) => {
                        offer_failures += 1;
                        warn!(error = %e, failures = offer_failures, "Storage offer failed");
                        if offer_failures >= self.config.max_push_attempts {
                            return Err(GenaroError::BridgeOffer);
                        }
                        self.pause().await?;
                    }
                }
                continue;
            }

            let tracker_progress = progress.clone();
            let on_progress: ProgressFn = Arc::new(move |bytes| tracker_progress.update(slot, bytes));

            let result = cancellable(&self.cancel, self.transfer.push(&mut tracker, on_progress)).await;
            if let Err(GenaroError::TransferCanceled) = result {
                return Err(GenaroError::TransferCanceled);
            }
            if let Some(record) = tracker.exchange_record() {
                self.reports.submit(record);
            }

            match result {
                Ok(()) => {
                    metrics::shard_transferred("upload");
                    progress.update(slot, tracker.meta.size);
                    return Ok(tracker);
                }
                Err(e) => {
                    metrics::shard_failed("upload");
                    progress.update(slot, 0);
                    debug!(attempt = tracker.push_count, error = %e, "Push failed, excluding farmer");
                    tracker.exclude_current_farmer();
                    self.pause().await?;
                }
            }
        }
    }

    async fn pause(&self) -> Result<()> {
        cancellable(&self.cancel, async {
            tokio::time::sleep(self.config.retry_delay).await;
            Ok(())
        })
        .await
    }
}
