//! Shard layout and upload-side shard preparation
//!
//! A file is cut into fixed-size plaintext slices. Each slice is encrypted
//! into one data shard; with Reed-Solomon enabled the data shards are padded
//! to a uniform length and parity shards are appended after them.

use crate::challenge::{Challenge, ChallengeSet};
use crate::crypto::{encrypt_to_bytes, EncryptionKey, ShardHash, ENCRYPTION_OVERHEAD};
use crate::erasure::{parity_for, ErasureCoder, ErasureConfig};
use crate::error::{GenaroError, Result};
use crate::{MAX_DATA_SHARDS, MIN_SLICE_SIZE};
use bytes::Bytes;
use rayon::prelude::*;

/// How a file of a given size maps onto shards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardLayout {
    file_size: u64,
    slice_size: u64,
    data_shards: usize,
    parity_shards: usize,
}

impl ShardLayout {
    /// Pick the slice size for a new upload: 2 MiB, doubled until the file
    /// fits in at most 64 data shards
    pub fn for_upload(file_size: u64, reed_solomon: bool) -> Result<Self> {
        let mut slice_size = MIN_SLICE_SIZE;
        while file_size.div_ceil(slice_size) > MAX_DATA_SHARDS as u64 {
            slice_size *= 2;
        }
        Self::with_slice_size(file_size, slice_size, reed_solomon)
    }

    pub fn with_slice_size(file_size: u64, slice_size: u64, reed_solomon: bool) -> Result<Self> {
        if file_size == 0 || slice_size == 0 {
            return Err(GenaroError::FileSize);
        }
        let data_shards = file_size.div_ceil(slice_size) as usize;
        let parity_shards = if reed_solomon { parity_for(data_shards) } else { 0 };
        Ok(Self {
            file_size,
            slice_size,
            data_shards,
            parity_shards,
        })
    }

    /// Recover the layout of a stored file from the size of its first data
    /// shard
    pub fn from_shard_size(file_size: u64, shard_size: u64, parity_shards: usize) -> Result<Self> {
        if file_size == 0 || shard_size <= ENCRYPTION_OVERHEAD as u64 {
            return Err(GenaroError::FileSize);
        }
        let slice_size = shard_size - ENCRYPTION_OVERHEAD as u64;
        Ok(Self {
            file_size,
            slice_size,
            data_shards: file_size.div_ceil(slice_size) as usize,
            parity_shards,
        })
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn slice_size(&self) -> u64 {
        self.slice_size
    }

    pub fn data_shards(&self) -> usize {
        self.data_shards
    }

    pub fn parity_shards(&self) -> usize {
        self.parity_shards
    }

    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    pub fn has_parity(&self) -> bool {
        self.parity_shards > 0
    }

    pub fn erasure_config(&self) -> Result<ErasureConfig> {
        ErasureConfig::new(self.data_shards, self.parity_shards)
    }

    /// Plaintext bytes carried by data shard `index`
    pub fn plain_len(&self, index: usize) -> u64 {
        if index + 1 < self.data_shards {
            self.slice_size
        } else {
            self.file_size - self.slice_size * (self.data_shards as u64 - 1)
        }
    }

    /// Encrypted length of data shard `index` before padding
    pub fn encrypted_len(&self, index: usize) -> u64 {
        self.plain_len(index) + ENCRYPTION_OVERHEAD as u64
    }

    /// Uniform shard length on the wire when parity is in use
    pub fn shard_size(&self) -> u64 {
        self.slice_size + ENCRYPTION_OVERHEAD as u64
    }

    /// Drop erasure padding from a fetched or reconstructed data shard
    pub fn strip_padding<'a>(&self, index: usize, shard: &'a [u8]) -> Result<&'a [u8]> {
        let len = self.encrypted_len(index) as usize;
        if shard.len() < len {
            return Err(GenaroError::FileSize);
        }
        Ok(&shard[..len])
    }
}

/// Upload-side descriptor of one shard
#[derive(Debug, Clone)]
pub struct ShardMeta {
    pub hash: ShardHash,
    pub index: usize,
    pub is_parity: bool,
    pub size: u64,
    pub challenges: Vec<Challenge>,
    pub challenges_as_str: Vec<String>,
    pub tree: Vec<String>,
}

impl ShardMeta {
    /// Hash the shard bytes and precompute its challenges
    pub fn generate(index: usize, is_parity: bool, data: &[u8], challenges: usize) -> Self {
        let set = ChallengeSet::generate(data, challenges);
        Self {
            hash: ShardHash::compute(data),
            index,
            is_parity,
            size: data.len() as u64,
            challenges_as_str: set.challenges_as_str(),
            challenges: set.challenges,
            tree: set.tree,
        }
    }
}

/// A shard ready to be pushed
#[derive(Debug, Clone)]
pub struct PreparedShard {
    pub meta: ShardMeta,
    pub data: Bytes,
}

/// Encrypt every slice of `data` into a data shard, padding them to the
/// uniform shard size when the layout carries parity
pub fn encrypt_shards(data: &[u8], layout: &ShardLayout, key: &EncryptionKey) -> Result<Vec<Bytes>> {
    if data.len() as u64 != layout.file_size() {
        return Err(GenaroError::FileSize);
    }
    let pad_to = layout.has_parity().then(|| layout.shard_size() as usize);

    data.par_chunks(layout.slice_size() as usize)
        .map(|slice| -> Result<Bytes> {
            let mut shard = encrypt_to_bytes(slice, key)?;
            if let Some(len) = pad_to {
                shard.resize(len, 0);
            }
            Ok(Bytes::from(shard))
        })
        .collect()
}

/// Encrypt, add parity and describe every shard of a file
pub fn prepare_shards(
    data: &[u8],
    layout: &ShardLayout,
    key: &EncryptionKey,
    challenges: usize,
) -> Result<Vec<PreparedShard>> {
    let mut shards = encrypt_shards(data, layout, key)?;

    if layout.has_parity() {
        let coder = ErasureCoder::new(layout.erasure_config()?)?;
        let parity = coder.encode(&shards)?;
        shards.extend(parity);
    }

    let data_shards = layout.data_shards();
    Ok(shards
        .into_par_iter()
        .enumerate()
        .map(|(index, data)| PreparedShard {
            meta: ShardMeta::generate(index, index >= data_shards, &data, challenges),
            data,
        })
        .collect())
}
