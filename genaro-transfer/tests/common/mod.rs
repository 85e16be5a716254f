//! In-memory bridge and farmer network for integration tests

#![allow(dead_code)]

use bytes::Bytes;
use genaro_core::crypto::generate_file_index;
use genaro_core::shard::encrypt_shards;
use genaro_core::{
    EncryptionKey, ErasureCoder, ErasureConfig, GenaroError, Result, ShardHash, ShardLayout,
    ShardMeta,
};
use genaro_transfer::{
    Bridge, CreateFileRequest, ErasureInfo, ExchangeRecord, Farmer, FarmerClient, FarmerPointer,
    FileInfo, Operation, PointerRecord, ProgressFn, TransferConfig, TransferEvent, TransferHandle,
    TransferOutcome,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

pub const BUCKET: &str = "bucket-1";

/// Generate test file data of specified size
pub fn generate_file(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i * 7 % 251) as u8).collect()
}

pub fn bucket_key() -> EncryptionKey {
    EncryptionKey::from_bytes([42u8; 32])
}

/// Short timeouts and retry delays so failure paths finish quickly
pub fn test_config() -> TransferConfig {
    TransferConfig {
        bridge_timeout: Duration::from_secs(5),
        farmer_timeout: Duration::from_secs(5),
        retry_delay: Duration::from_millis(1),
        ..TransferConfig::default()
    }
}

pub fn farmer(node_id: &str) -> Farmer {
    Farmer::new("127.0.0.1", 4000, node_id)
}

/// Pointer record for `shard` assigned to `node_id`, or unassigned
pub fn record(index: usize, shard: &Bytes, parity: bool, node_id: Option<&str>) -> PointerRecord {
    PointerRecord {
        index,
        hash: ShardHash::compute(shard).to_hex(),
        size: shard.len() as u64,
        parity,
        token: node_id.map(|n| format!("tok-{n}-{index}")),
        operation: node_id.map(|_| Operation::Pull),
        farmer: node_id.map(farmer),
    }
}

/// A file as stored on the network: its bridge metadata and every shard
pub struct EncodedFile {
    pub info: FileInfo,
    pub shards: Vec<Bytes>,
    pub data_shards: usize,
}

impl EncodedFile {
    pub fn is_parity(&self, index: usize) -> bool {
        index >= self.data_shards
    }
}

/// Encrypt `data` into shards of `slice` plaintext bytes with `parity`
/// Reed-Solomon shards appended
pub fn encode_file(file_id: &str, data: &[u8], slice: u64, parity: usize) -> EncodedFile {
    let layout = ShardLayout::with_slice_size(data.len() as u64, slice, parity > 0).unwrap();
    let index = generate_file_index();
    let key = EncryptionKey::derive_file_key(&bucket_key(), &index);

    let mut shards = encrypt_shards(data, &layout, &key).unwrap();
    if parity > 0 {
        let coder =
            ErasureCoder::new(ErasureConfig::new(layout.data_shards(), parity).unwrap()).unwrap();
        let parity_shards = coder.encode(&shards).unwrap();
        shards.extend(parity_shards);
    }

    EncodedFile {
        info: FileInfo {
            id: file_id.to_string(),
            filename: format!("{file_id}.bin"),
            size: data.len() as u64,
            index: Some(hex::encode(index)),
            erasure: (parity > 0).then(|| ErasureInfo {
                kind: "reedsolomon".into(),
            }),
        },
        shards,
        data_shards: layout.data_shards(),
    }
}

pub struct StoredFile {
    pub info: FileInfo,
    pub records: Vec<PointerRecord>,
}

#[derive(Default)]
pub struct BridgeState {
    pub files: HashMap<String, StoredFile>,
    /// Largest page the bridge returns regardless of the requested limit
    pub page_cap: Option<usize>,
    pub page_requests: usize,
    pub replacements: HashMap<usize, VecDeque<PointerRecord>>,
    pub replace_calls: Vec<(usize, Vec<String>)>,
    pub frames: HashMap<String, BTreeMap<usize, (ShardMeta, Farmer)>>,
    pub offer_pool: Vec<Farmer>,
    pub offers: usize,
    pub created: Vec<CreateFileRequest>,
    pub reports: Vec<ExchangeRecord>,
    /// Upcoming calls per method answered with a rate limit
    pub throttled: HashMap<&'static str, u32>,
    /// Exchange report posts never complete
    pub stall_reports: bool,
    next_id: usize,
}

/// Bridge keeping files, frames and reports in memory
#[derive(Default)]
pub struct MockBridge {
    state: Mutex<BridgeState>,
}

impl MockBridge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn state(&self) -> MutexGuard<'_, BridgeState> {
        self.state.lock().unwrap()
    }

    pub fn add_file(&self, info: FileInfo, records: Vec<PointerRecord>) {
        self.state().files.insert(info.id.clone(), StoredFile { info, records });
    }

    pub fn queue_replacement(&self, record: PointerRecord) {
        self.state()
            .replacements
            .entry(record.index)
            .or_default()
            .push_back(record);
    }

    pub fn set_offer_pool(&self, node_ids: &[&str]) {
        self.state().offer_pool = node_ids.iter().map(|n| farmer(n)).collect();
    }

    /// Answer the next `times` calls of `method` with a rate limit
    pub fn throttle(&self, method: &'static str, times: u32) {
        self.state().throttled.insert(method, times);
    }

    fn check_throttle(&self, method: &str) -> Result<()> {
        match self.state().throttled.get_mut(method) {
            Some(left) if *left > 0 => {
                *left -= 1;
                Err(GenaroError::BridgeRateLimit)
            }
            _ => Ok(()),
        }
    }

    pub fn replace_calls_for(&self, index: usize) -> Vec<Vec<String>> {
        self.state()
            .replace_calls
            .iter()
            .filter(|(i, _)| *i == index)
            .map(|(_, excluded)| excluded.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl Bridge for MockBridge {
    async fn get_file_info(&self, _bucket_id: &str, file_id: &str) -> Result<FileInfo> {
        self.check_throttle("get_file_info")?;
        self.state()
            .files
            .get(file_id)
            .map(|f| f.info.clone())
            .ok_or(GenaroError::FileNotFound)
    }

    async fn get_pointers(
        &self,
        _bucket_id: &str,
        file_id: &str,
        limit: usize,
        skip: usize,
    ) -> Result<Vec<PointerRecord>> {
        self.check_throttle("get_pointers")?;
        let mut state = self.state();
        state.page_requests += 1;
        let limit = state.page_cap.map_or(limit, |cap| cap.min(limit));
        let file = state.files.get(file_id).ok_or(GenaroError::FileNotFound)?;
        Ok(file.records.iter().skip(skip).take(limit).cloned().collect())
    }

    async fn replace_pointer(
        &self,
        _bucket_id: &str,
        _file_id: &str,
        index: usize,
        excluded: &[String],
    ) -> Result<PointerRecord> {
        let mut state = self.state();
        state.replace_calls.push((index, excluded.to_vec()));
        state
            .replacements
            .get_mut(&index)
            .and_then(VecDeque::pop_front)
            .ok_or(GenaroError::BridgeReplacePointer)
    }

    async fn file_exists(&self, _bucket_id: &str, file_name: &str) -> Result<bool> {
        self.check_throttle("file_exists")?;
        Ok(self
            .state()
            .files
            .values()
            .any(|f| f.info.filename == file_name))
    }

    async fn create_frame(&self) -> Result<String> {
        self.check_throttle("create_frame")?;
        let mut state = self.state();
        state.next_id += 1;
        let id = format!("frame-{}", state.next_id);
        state.frames.insert(id.clone(), BTreeMap::new());
        Ok(id)
    }

    async fn add_shard_to_frame(
        &self,
        frame_id: &str,
        shard: &ShardMeta,
        excluded: &[String],
    ) -> Result<FarmerPointer> {
        let mut state = self.state();
        let candidates: Vec<Farmer> = state
            .offer_pool
            .iter()
            .filter(|f| !excluded.contains(&f.node_id))
            .cloned()
            .collect();
        if candidates.is_empty() {
            return Err(GenaroError::BridgeOffer);
        }
        let farmer = candidates[state.offers % candidates.len()].clone();
        state.offers += 1;

        state
            .frames
            .get_mut(frame_id)
            .ok_or(GenaroError::BridgeFrame)?
            .insert(shard.index, (shard.clone(), farmer.clone()));

        Ok(FarmerPointer {
            token: format!("push-{}", shard.index),
            operation: Operation::Push,
            farmer,
        })
    }

    async fn create_file(&self, request: &CreateFileRequest) -> Result<String> {
        self.check_throttle("create_file")?;
        let mut state = self.state();
        let frame = state
            .frames
            .remove(&request.frame_id)
            .ok_or(GenaroError::BridgeFrame)?;

        let records = frame
            .into_values()
            .map(|(meta, farmer)| PointerRecord {
                index: meta.index,
                hash: meta.hash.to_hex(),
                size: meta.size,
                parity: meta.is_parity,
                token: Some(format!("pull-{}", meta.index)),
                operation: Some(Operation::Pull),
                farmer: Some(farmer),
            })
            .collect();

        state.next_id += 1;
        let id = format!("file-{}", state.next_id);
        let info = FileInfo {
            id: id.clone(),
            filename: request.filename.clone(),
            size: request.size,
            index: Some(request.index.clone()),
            erasure: request.erasure.clone().map(|kind| ErasureInfo { kind }),
        };
        state.files.insert(id.clone(), StoredFile { info, records });
        state.created.push(request.clone());
        Ok(id)
    }

    async fn send_exchange_report(&self, record: &ExchangeRecord) -> Result<()> {
        let stalled = self.state().stall_reports;
        if stalled {
            std::future::pending::<()>().await;
        }
        self.state().reports.push(record.clone());
        Ok(())
    }
}

/// How a mock farmer answers transfers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Serve,
    Fail,
    /// Serve the shard with its first byte flipped
    Corrupt,
    /// Never answer downloads
    Block,
}

#[derive(Default)]
pub struct FarmerState {
    pub shards: HashMap<(String, String), Bytes>,
    pub behavior: HashMap<String, Behavior>,
    pub downloads: HashMap<String, u32>,
    pub uploads: HashMap<String, u32>,
}

/// Farmer network keyed by node id
#[derive(Default)]
pub struct MockFarmers {
    state: Mutex<FarmerState>,
    /// Signalled whenever a download starts blocking
    pub blocked: Notify,
}

impl MockFarmers {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn state(&self) -> MutexGuard<'_, FarmerState> {
        self.state.lock().unwrap()
    }

    pub fn set_behavior(&self, node_id: &str, behavior: Behavior) {
        self.state().behavior.insert(node_id.to_string(), behavior);
    }

    pub fn store(&self, node_id: &str, shard: &Bytes) {
        self.state().shards.insert(
            (node_id.to_string(), ShardHash::compute(shard).to_hex()),
            shard.clone(),
        );
    }

    pub fn downloads(&self, node_id: &str) -> u32 {
        self.state().downloads.get(node_id).copied().unwrap_or(0)
    }

    pub fn uploads(&self, node_id: &str) -> u32 {
        self.state().uploads.get(node_id).copied().unwrap_or(0)
    }

    fn behavior(&self, node_id: &str) -> Behavior {
        self.state()
            .behavior
            .get(node_id)
            .copied()
            .unwrap_or(Behavior::Serve)
    }
}

#[async_trait::async_trait]
impl FarmerClient for MockFarmers {
    async fn download_shard(
        &self,
        farmer: &Farmer,
        hash: &ShardHash,
        _token: &str,
        _size: u64,
        progress: ProgressFn,
    ) -> Result<Bytes> {
        *self
            .state()
            .downloads
            .entry(farmer.node_id.clone())
            .or_default() += 1;

        match self.behavior(&farmer.node_id) {
            Behavior::Fail => Err(GenaroError::FarmerRequest),
            Behavior::Block => {
                self.blocked.notify_one();
                std::future::pending().await
            }
            behavior => {
                let shard = self
                    .state()
                    .shards
                    .get(&(farmer.node_id.clone(), hash.to_hex()))
                    .cloned()
                    .ok_or(GenaroError::FarmerRequest)?;
                progress(shard.len() as u64);

                if behavior == Behavior::Corrupt {
                    let mut corrupted = shard.to_vec();
                    corrupted[0] ^= 0xff;
                    return Ok(Bytes::from(corrupted));
                }
                Ok(shard)
            }
        }
    }

    async fn upload_shard(
        &self,
        farmer: &Farmer,
        _hash: &ShardHash,
        _token: &str,
        data: Bytes,
        progress: ProgressFn,
    ) -> Result<()> {
        *self
            .state()
            .uploads
            .entry(farmer.node_id.clone())
            .or_default() += 1;

        match self.behavior(&farmer.node_id) {
            Behavior::Fail => Err(GenaroError::FarmerRequest),
            _ => {
                progress(data.len() as u64);
                self.store(&farmer.node_id, &data);
                Ok(())
            }
        }
    }
}

/// Store every shard of `file` on `nodes` (round robin) and register it
/// with the bridge
pub fn publish(bridge: &MockBridge, farmers: &MockFarmers, file: &EncodedFile, nodes: &[&str]) {
    let records = file
        .shards
        .iter()
        .enumerate()
        .map(|(index, shard)| {
            let node = nodes[index % nodes.len()];
            farmers.store(node, shard);
            record(index, shard, file.is_parity(index), Some(node))
        })
        .collect();
    bridge.add_file(file.info.clone(), records);
}

/// Drain events up to and including the terminal one, then wait for the
/// outcome
pub async fn run_to_end(mut handle: TransferHandle) -> (Vec<TransferEvent>, TransferOutcome) {
    let mut events = Vec::new();
    while let Some(event) = handle.events().recv().await {
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            break;
        }
    }
    (events, handle.wait().await)
}

/// Progress fractions seen in `events`, in order
pub fn progress_values(events: &[TransferEvent]) -> Vec<f64> {
    events
        .iter()
        .filter_map(|e| match e {
            TransferEvent::Progress(f) => Some(*f),
            _ => None,
        })
        .collect()
}

pub fn assert_monotonic(values: &[f64]) {
    assert!(
        values.windows(2).all(|w| w[0] <= w[1]),
        "progress went backwards: {values:?}"
    );
    assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
}
