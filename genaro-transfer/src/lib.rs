//! Genaro Transfer Library
//!
//! This crate moves encrypted shards between a client and the Genaro network:
//! - Pointer resolution and the per-shard health state machine
//! - Farmer transfers with integrity checks and exchange reports
//! - Upload orchestration (shard, encrypt, place, finalize)
//! - Download orchestration with parity recovery and cancellation

pub mod bridge;
pub mod config;
pub mod download;
pub mod events;
pub mod farmer;
pub mod http;
pub mod metrics;
pub mod pointer;
pub mod report;
pub mod tracker;
pub mod transfer;
pub mod upload;

// Re-export main types
pub use bridge::{resolve_pointers, Bridge, CreateFileRequest, ErasureInfo, FileInfo};
pub use config::{ConfigError, TransferConfig};
pub use download::{DownloadRequest, Downloader};
pub use events::{Completion, ProgressTracker, TransferEvent, TransferHandle, TransferOutcome};
pub use farmer::{no_progress, FarmerClient, ProgressFn};
pub use http::{HttpBridge, HttpFarmerClient};
pub use pointer::{Farmer, FarmerPointer, Operation, Pointer, PointerRecord, PointerStatus};
pub use report::{ExchangeRecord, ExchangeReport, ExchangeReporter, ReportSender};
pub use tracker::{ShardStatus, ShardTracker};
pub use transfer::ShardTransfer;
pub use upload::{UploadRequest, Uploader};
