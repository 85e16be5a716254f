//! Genaro Core Library
//!
//! Shard-level primitives for the Genaro storage client.
//! This crate provides:
//! - Shard content hashing (RIPEMD-160 over SHA-256)
//! - AES-256-GCM shard encryption and key derivation
//! - Reed-Solomon erasure coding with ceil(2k/3) parity shards
//! - Merkle challenge generation for proof of retrievability
//! - Shard layout, splitting and upload-side shard metadata
//! - Common error handling

pub mod challenge;
pub mod crypto;
pub mod erasure;
pub mod error;
pub mod shard;

pub use challenge::{ChallengeSet, DEFAULT_CHALLENGES};
pub use crypto::{decrypt_from_bytes, encrypt_to_bytes, EncryptionKey, ShardHash};
pub use erasure::{ErasureCoder, ErasureConfig, ERASURE_REED_SOLOMON};
pub use error::{GenaroError, Result};
pub use shard::{prepare_shards, PreparedShard, ShardLayout, ShardMeta};

/// Smallest plaintext slice carried by one data shard (2 MiB)
pub const MIN_SLICE_SIZE: u64 = 2 * 1024 * 1024;

/// Upper bound on data shards per file; the slice size doubles to stay below it
pub const MAX_DATA_SHARDS: usize = 64;
