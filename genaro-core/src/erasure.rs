//! Reed-Solomon Erasure Coding
//!
//! Systematic (k, m) code over GF(2^8):
//! - k data shards, the encrypted file slices
//! - m = ceil(2k/3) parity shards appended after them
//! - any k of the k+m shards reconstruct the data shards

use crate::error::{GenaroError, Result};
use bytes::Bytes;
use reed_solomon_erasure::galois_8::ReedSolomon;
use serde::{Deserialize, Serialize};

/// Erasure type string the bridge stores for Reed-Solomon files
pub const ERASURE_REED_SOLOMON: &str = "reedsolomon";

/// Erasure coding configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErasureConfig {
    /// Number of data shards (k)
    pub data_shards: usize,
    /// Number of parity shards (m)
    pub parity_shards: usize,
}

impl ErasureConfig {
    pub fn new(data_shards: usize, parity_shards: usize) -> Result<Self> {
        if data_shards == 0 {
            return Err(GenaroError::Configuration(
                "data_shards must be > 0".to_string(),
            ));
        }
        if parity_shards == 0 {
            return Err(GenaroError::Configuration(
                "parity_shards must be > 0".to_string(),
            ));
        }
        Ok(Self {
            data_shards,
            parity_shards,
        })
    }

    /// Network default: ceil(2k/3) parity shards for k data shards
    pub fn for_data_shards(data_shards: usize) -> Result<Self> {
        Self::new(data_shards, parity_for(data_shards))
    }

    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }
}

/// Parity shard count for `k` data shards
pub fn parity_for(data_shards: usize) -> usize {
    (2 * data_shards).div_ceil(3)
}

/// Reed-Solomon encoder/decoder
pub struct ErasureCoder {
    config: ErasureConfig,
    encoder: ReedSolomon,
}

impl ErasureCoder {
    pub fn new(config: ErasureConfig) -> Result<Self> {
        let encoder = ReedSolomon::new(config.data_shards, config.parity_shards)
            .map_err(|_| GenaroError::FileParity)?;
        Ok(Self { config, encoder })
    }

    /// Compute parity shards for the given data shards.
    ///
    /// Shorter data shards are zero-padded to the longest one; the returned
    /// parity shards all have that length.
    pub fn encode(&self, data: &[Bytes]) -> Result<Vec<Bytes>> {
        if data.len() != self.config.data_shards {
            return Err(GenaroError::FileParity);
        }
        let shard_size = data.iter().map(|d| d.len()).max().unwrap_or(0);
        if shard_size == 0 {
            return Err(GenaroError::FileParity);
        }

        let mut shards: Vec<Vec<u8>> = data
            .iter()
            .map(|d| {
                let mut v = d.to_vec();
                v.resize(shard_size, 0);
                v
            })
            .collect();
        shards.extend((0..self.config.parity_shards).map(|_| vec![0u8; shard_size]));

        self.encoder
            .encode(&mut shards)
            .map_err(|_| GenaroError::FileParity)?;

        Ok(shards
            .into_iter()
            .skip(self.config.data_shards)
            .map(Bytes::from)
            .collect())
    }

    /// Reconstruct missing data shards in place.
    ///
    /// `shards` holds k+m slots in index order, `None` for missing ones. All
    /// present shards must have the same length. Fails with a file integrity
    /// error when fewer than k shards are present.
    pub fn reconstruct(&self, shards: &mut [Option<Vec<u8>>]) -> Result<()> {
        if shards.len() != self.config.total_shards() {
            return Err(GenaroError::FileRecover);
        }

        let available = shards.iter().filter(|s| s.is_some()).count();
        if available < self.config.data_shards {
            return Err(GenaroError::FileIntegrity);
        }

        let mut sizes = shards.iter().flatten().map(|s| s.len());
        if let Some(first) = sizes.next() {
            if sizes.any(|len| len != first) {
                return Err(GenaroError::FileRecover);
            }
        }

        self.encoder.reconstruct_data(shards)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_shards(k: usize, len: usize) -> Vec<Bytes> {
        (0..k)
            .map(|i| Bytes::from((0..len).map(|j| ((i * 31 + j) % 251) as u8).collect::<Vec<_>>()))
            .collect()
    }

    #[test]
    fn test_parity_count() {
        assert_eq!(parity_for(1), 1);
        assert_eq!(parity_for(2), 2);
        assert_eq!(parity_for(3), 2);
        assert_eq!(parity_for(4), 3);
        assert_eq!(parity_for(64), 43);
    }

    #[test]
    fn test_erasure_config() {
        let config = ErasureConfig::for_data_shards(4).unwrap();
        assert_eq!(config.parity_shards, 3);
        assert_eq!(config.total_shards(), 7);
        assert!(ErasureConfig::new(0, 2).is_err());
    }

    #[test]
    fn test_reconstruct_mixed_erasures() {
        let coder = ErasureCoder::new(ErasureConfig::new(4, 2).unwrap()).unwrap();
        let data = data_shards(4, 1024);
        let parity = coder.encode(&data).unwrap();
        assert_eq!(parity.len(), 2);

        let all: Vec<Vec<u8>> = data.iter().chain(parity.iter()).map(|b| b.to_vec()).collect();

        for erase in [[0usize, 1], [1, 4], [4, 5], [2, 3]] {
            let mut slots: Vec<Option<Vec<u8>>> = all.iter().cloned().map(Some).collect();
            for i in erase {
                slots[i] = None;
            }
            coder.reconstruct(&mut slots).unwrap();
            for i in 0..4 {
                assert_eq!(slots[i].as_deref(), Some(data[i].as_ref()));
            }
        }
    }

    #[test]
    fn test_too_many_missing_shards() {
        let coder = ErasureCoder::new(ErasureConfig::new(4, 2).unwrap()).unwrap();
        let data = data_shards(4, 64);
        let parity = coder.encode(&data).unwrap();

        let mut slots: Vec<Option<Vec<u8>>> =
            data.iter().chain(parity.iter()).map(|b| Some(b.to_vec())).collect();
        slots[0] = None;
        slots[1] = None;
        slots[5] = None;

        assert!(matches!(
            coder.reconstruct(&mut slots),
            Err(GenaroError::FileIntegrity)
        ));
    }

    #[test]
    fn test_short_final_shard_is_padded() {
        let coder = ErasureCoder::new(ErasureConfig::new(3, 2).unwrap()).unwrap();
        let mut data = data_shards(3, 100);
        data[2] = data[2].slice(..40);

        let parity = coder.encode(&data).unwrap();
        assert!(parity.iter().all(|p| p.len() == 100));

        let mut padded = data[2].to_vec();
        padded.resize(100, 0);
        let mut slots = vec![
            Some(data[0].to_vec()),
            Some(data[1].to_vec()),
            None,
            Some(parity[0].to_vec()),
            Some(parity[1].to_vec()),
        ];
        coder.reconstruct(&mut slots).unwrap();
        assert_eq!(slots[2].as_deref(), Some(padded.as_slice()));
    }
}
