//! Download orchestration
//!
//! Resolves a file's pointers, fetches its data shards with bounded
//! parallelism and writes them to disk in index order. Data shards that stay
//! missing after their retry budget are rebuilt from parity shards, fetched
//! only as many at a time as are still needed.

use crate::bridge::{resolve_pointers, timed, with_retry, Bridge};
use crate::config::TransferConfig;
use crate::events::{cancellable, spawn_transfer, Completion, EventSink, ProgressTracker, TransferHandle};
use crate::farmer::{FarmerClient, ProgressFn};
use crate::metrics;
use crate::pointer::{Pointer, PointerStatus};
use crate::report::{ExchangeReporter, ReportSender};
use crate::transfer::{pointer_record, ShardTransfer};
use bytes::Bytes;
use genaro_core::{
    decrypt_from_bytes, EncryptionKey, ErasureCoder, GenaroError, Result, ShardLayout,
};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// What to download and where to
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub bucket_id: String,
    pub file_id: String,
    pub path: PathBuf,
    pub bucket_key: EncryptionKey,
    /// Replace an existing local file
    pub overwrite: bool,
}

/// Downloads files from the network
pub struct Downloader {
    bridge: Arc<dyn Bridge>,
    farmers: Arc<dyn FarmerClient>,
    config: TransferConfig,
}

impl Downloader {
    pub fn new(bridge: Arc<dyn Bridge>, farmers: Arc<dyn FarmerClient>, config: TransferConfig) -> Self {
        Self {
            bridge,
            farmers,
            config,
        }
    }

    /// Start a download; progress and the outcome arrive through the handle
    pub fn download(&self, request: DownloadRequest) -> TransferHandle {
        let bridge = self.bridge.clone();
        let farmers = self.farmers.clone();
        let config = self.config.clone();

        spawn_transfer(move |sink, cancel| async move {
            run_download(bridge, farmers, config, request, sink, cancel).await
        })
    }
}

/// State shared by the shard tasks of one download
struct DownloadJob {
    bridge: Arc<dyn Bridge>,
    transfer: ShardTransfer,
    config: TransferConfig,
    bucket_id: String,
    file_id: String,
    reports: ReportSender,
    cancel: CancellationToken,
}

#[instrument(skip_all, fields(bucket = %request.bucket_id, file = %request.file_id))]
async fn run_download(
    bridge: Arc<dyn Bridge>,
    farmers: Arc<dyn FarmerClient>,
    config: TransferConfig,
    request: DownloadRequest,
    sink: EventSink,
    cancel: CancellationToken,
) -> Result<Completion> {
    if !request.overwrite && tokio::fs::try_exists(&request.path).await.unwrap_or(false) {
        return Err(GenaroError::FileAlreadyExists);
    }

    let info = cancellable(
        &cancel,
        with_retry(&config, || {
            bridge.get_file_info(&request.bucket_id, &request.file_id)
        }),
    )
    .await?;
    let reed_solomon = info.reed_solomon()?;
    let file_key = EncryptionKey::derive_file_key(&request.bucket_key, &info.index_bytes()?);

    let pointers = cancellable(
        &cancel,
        timed(
            config.pointer_timeout(),
            resolve_pointers(bridge.as_ref(), &request.bucket_id, &request.file_id, &config),
        ),
    )
    .await?;

    let (data, parity): (Vec<Pointer>, Vec<Pointer>) =
        pointers.into_iter().partition(|p| !p.is_parity);
    let parity = if reed_solomon { parity } else { Vec::new() };

    let first = data.first().ok_or(GenaroError::BridgePointer)?;
    let layout = ShardLayout::from_shard_size(info.size, first.size, parity.len())?;
    if layout.data_shards() != data.len() || data.iter().enumerate().any(|(i, p)| p.index != i) {
        warn!(
            expected = layout.data_shards(),
            received = data.len(),
            "Pointer list does not match file layout"
        );
        return Err(GenaroError::BridgePointer);
    }

    info!(
        size = info.size,
        data_shards = data.len(),
        parity_shards = parity.len(),
        "Downloading file"
    );

    let reporter = ExchangeReporter::spawn(bridge.clone(), config.bridge_timeout);
    let job = Arc::new(DownloadJob {
        bridge,
        transfer: ShardTransfer::new(farmers, config.farmer_timeout),
        config: config.clone(),
        bucket_id: request.bucket_id.clone(),
        file_id: request.file_id.clone(),
        reports: reporter.sender(),
        cancel: cancel.clone(),
    });

    let file = File::create(&request.path).await.map_err(|e| {
        warn!(path = %request.path.display(), error = %e, "Cannot create output file");
        GenaroError::FileWrite
    })?;
    let mut writer = OrderedWriter::new(file, layout, file_key);

    let total = data.iter().map(|p| p.size).sum();
    let progress = ProgressTracker::new(data.len(), total, sink);

    let result = fetch_and_write(&job, data, parity, &layout, &mut writer, &progress).await;
    drop(job);

    settle_output(result, writer, &request.path, cancel.is_cancelled()).await?;
    reporter.shutdown(config.report_drain).await;
    Ok(Completion {
        file_id: info.id,
        size: info.size,
    })
}

/// Close the output once fetching ends. A complete file is synced. A
/// canceled download keeps its verified prefix. Any other failure removes
/// the partial file.
async fn settle_output(
    result: Result<()>,
    writer: OrderedWriter,
    path: &Path,
    canceled: bool,
) -> Result<()> {
    let result = match result {
        Ok(()) if !writer.is_complete() => {
            warn!(written = writer.next, "Download ended before every data shard was written");
            Err(GenaroError::FileShardMissing)
        }
        other => other,
    };

    match result {
        Ok(()) => writer.finish().await,
        Err(e) if e.is_canceled() || canceled => {
            if let Err(e) = writer.finish().await {
                debug!(error = %e, "Could not flush partial download");
            }
            Err(GenaroError::TransferCanceled)
        }
        Err(e) => {
            drop(writer);
            if let Err(rm) = tokio::fs::remove_file(path).await {
                debug!(error = %rm, "Could not remove partial download");
            }
            Err(e)
        }
    }
}

async fn fetch_and_write(
    job: &Arc<DownloadJob>,
    data: Vec<Pointer>,
    parity: Vec<Pointer>,
    layout: &ShardLayout,
    writer: &mut OrderedWriter,
    progress: &Arc<ProgressTracker>,
) -> Result<()> {
    let keep_for_recovery = !parity.is_empty();
    let mut fetched: HashMap<usize, Bytes> = HashMap::new();
    let mut missing = Vec::new();

    let mut tasks = spawn_fetches(job, data, Some(progress.clone()));
    while let Some(joined) = tasks.join_next().await {
        let (pointer, bytes) = joined.map_err(|_| GenaroError::Unknown)??;
        match bytes {
            Some(bytes) => {
                if keep_for_recovery {
                    fetched.insert(pointer.index, bytes.clone());
                }
                writer.push(pointer.index, bytes).await?;
            }
            None if keep_for_recovery => missing.push(pointer.index),
            None => {
                warn!(index = pointer.index, "Data shard missing and no parity available");
                return Err(GenaroError::FileShardMissing);
            }
        }
    }

    if missing.is_empty() {
        return Ok(());
    }

    let mut parity_queue = parity.into_iter();
    while fetched.len() < layout.data_shards() {
        if job.cancel.is_cancelled() {
            return Err(GenaroError::TransferCanceled);
        }
        let wave: Vec<Pointer> = parity_queue
            .by_ref()
            .take(layout.data_shards() - fetched.len())
            .collect();
        if wave.is_empty() {
            break;
        }
        debug!(count = wave.len(), "Fetching parity wave");

        let mut tasks = spawn_fetches(job, wave, None);
        while let Some(joined) = tasks.join_next().await {
            let (pointer, bytes) = joined.map_err(|_| GenaroError::Unknown)??;
            if let Some(bytes) = bytes {
                fetched.insert(pointer.index, bytes);
            }
        }
    }

    if fetched.len() < layout.data_shards() {
        warn!(
            available = fetched.len(),
            required = layout.data_shards(),
            "Not enough shards to rebuild file"
        );
        return Err(GenaroError::FileIntegrity);
    }

    let coder = ErasureCoder::new(layout.erasure_config()?)?;
    let mut slots: Vec<Option<Vec<u8>>> = (0..layout.total_shards())
        .map(|i| fetched.get(&i).map(|b| b.to_vec()))
        .collect();
    coder.reconstruct(&mut slots)?;

    metrics::shards_reconstructed(missing.len());
    info!(count = missing.len(), "Rebuilt missing data shards from parity");

    for index in missing {
        let shard = slots
            .get_mut(index)
            .and_then(Option::take)
            .ok_or(GenaroError::FileRecover)?;
        progress.update(index, layout.shard_size());
        writer.push(index, Bytes::from(shard)).await?;
    }
    Ok(())
}

fn spawn_fetches(
    job: &Arc<DownloadJob>,
    pointers: Vec<Pointer>,
    progress: Option<Arc<ProgressTracker>>,
) -> JoinSet<Result<(Pointer, Option<Bytes>)>> {
    let semaphore = Arc::new(Semaphore::new(job.config.max_concurrent_shards));
    let mut tasks = JoinSet::new();

    for pointer in pointers {
        let job = job.clone();
        let semaphore = semaphore.clone();
        let progress = progress.clone();

        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| GenaroError::TransferCanceled)?;
            job.fetch_pointer(pointer, progress).await
        });
    }
    tasks
}

impl DownloadJob {
    /// Drive one pointer through its health state machine until its shard
    /// is fetched and verified, or it is marked missing
    #[instrument(skip(self, pointer, progress), fields(index = pointer.index))]
    async fn fetch_pointer(
        &self,
        mut pointer: Pointer,
        progress: Option<Arc<ProgressTracker>>,
    ) -> Result<(Pointer, Option<Bytes>)> {
        let mut excluded: Vec<String> = Vec::new();

        loop {
            if self.cancel.is_cancelled() {
                return Err(GenaroError::TransferCanceled);
            }

            if pointer.is_exhausted(self.config.max_shard_requests, self.config.max_pointer_replacements) {
                pointer.mark_missing();
                warn!(
                    requests = pointer.request_count,
                    replacements = pointer.replace_count,
                    "Pointer is missing"
                );
                return Ok((pointer, None));
            }

            if pointer.needs_replacement() {
                self.replace(&mut pointer, &excluded).await?;
                continue;
            }

            pointer.begin_attempt();
            let slot = pointer.index;
            let on_progress: ProgressFn = match &progress {
                Some(tracker) => {
                    let tracker = tracker.clone();
                    Arc::new(move |bytes| tracker.update(slot, bytes))
                }
                None => crate::farmer::no_progress(),
            };

            let result = cancellable(&self.cancel, self.transfer.fetch(&mut pointer, on_progress)).await;
            if let Err(GenaroError::TransferCanceled) = result {
                return Err(GenaroError::TransferCanceled);
            }
            if let Some(record) = pointer_record(&pointer) {
                self.reports.submit(record);
            }

            match result {
                Ok(bytes) => {
                    metrics::shard_transferred("download");
                    if let Some(tracker) = &progress {
                        tracker.update(slot, pointer.size);
                    }
                    return Ok((pointer, Some(bytes)));
                }
                Err(e) => {
                    metrics::shard_failed("download");
                    if let Some(tracker) = &progress {
                        tracker.update(slot, 0);
                    }
                    pointer.record_failure();
                    debug!(
                        attempt = pointer.request_count,
                        status = ?pointer.status,
                        error = %e,
                        "Shard attempt failed"
                    );
                    if pointer.status == PointerStatus::Error {
                        if let Some(node) = pointer.excluded_farmer() {
                            if !excluded.contains(&node) {
                                excluded.push(node);
                            }
                        }
                    } else {
                        cancellable(&self.cancel, async {
                            tokio::time::sleep(self.config.retry_delay).await;
                            Ok(())
                        })
                        .await?;
                    }
                }
            }
        }
    }

    /// Ask the bridge for a new farmer for `pointer`
    async fn replace(&self, pointer: &mut Pointer, excluded: &[String]) -> Result<()> {
        let result = cancellable(
            &self.cancel,
            timed(
                self.config.bridge_timeout,
                self.bridge
                    .replace_pointer(&self.bucket_id, &self.file_id, pointer.index, excluded),
            ),
        )
        .await;

        match result {
            Ok(record) => match record.assignment() {
                Some(assignment) => {
                    debug!(farmer = %assignment.farmer.node_id, "Pointer replaced");
                    metrics::pointer_replaced();
                    pointer.apply_replacement(assignment);
                }
                None => {
                    warn!("Bridge returned no farmer for replacement");
                    pointer.note_replace_failure();
                }
            },
            Err(e) if e.is_canceled() || e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(error = %e, "Pointer replacement failed");
                pointer.note_replace_failure();
                cancellable(&self.cancel, async {
                    tokio::time::sleep(self.config.retry_delay).await;
                    Ok(())
                })
                .await?;
            }
        }
        Ok(())
    }
}

/// Decrypts shards and appends them to the output strictly in index order.
/// Shards arriving ahead of a gap are held until the gap is filled, so the
/// file on disk always ends on a verified shard boundary.
struct OrderedWriter {
    file: File,
    layout: ShardLayout,
    key: EncryptionKey,
    next: usize,
    pending: BTreeMap<usize, Bytes>,
}

impl OrderedWriter {
    fn new(file: File, layout: ShardLayout, key: EncryptionKey) -> Self {
        Self {
            file,
            layout,
            key,
            next: 0,
            pending: BTreeMap::new(),
        }
    }

    async fn push(&mut self, index: usize, shard: Bytes) -> Result<()> {
        self.pending.insert(index, shard);

        while let Some(shard) = self.pending.remove(&self.next) {
            let body = self.layout.strip_padding(self.next, &shard)?;
            let plain = decrypt_from_bytes(body, &self.key)?;
            if plain.len() as u64 != self.layout.plain_len(self.next) {
                return Err(GenaroError::FileIntegrity);
            }
            self.file
                .write_all(&plain)
                .await
                .map_err(|_| GenaroError::FileWrite)?;
            self.next += 1;
        }
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.next == self.layout.data_shards()
    }

    async fn finish(mut self) -> Result<()> {
        self.file.flush().await.map_err(|_| GenaroError::FileWrite)?;
        self.file.sync_all().await.map_err(|_| GenaroError::FileWrite)?;
        Ok(())
    }
}
