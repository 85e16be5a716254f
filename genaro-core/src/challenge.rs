//! Merkle challenges for proof of retrievability
//!
//! Before a shard is pushed the client draws random challenge preimages and
//! computes one leaf per challenge over `challenge ‖ shard`. The bridge later
//! uses them to audit the farmer; the client never verifies them itself.

use crate::crypto::{ripemd160_sha256, HASH_SIZE};
use rand::rngs::OsRng;
use rand::RngCore;
use rayon::prelude::*;

/// Size of one challenge preimage
pub const CHALLENGE_SIZE: usize = 32;

/// Default number of challenges per shard
pub const DEFAULT_CHALLENGES: usize = 4;

pub type Challenge = [u8; CHALLENGE_SIZE];

/// Challenges and their leaves, equal length
#[derive(Debug, Clone)]
pub struct ChallengeSet {
    pub challenges: Vec<Challenge>,
    pub tree: Vec<String>,
}

impl ChallengeSet {
    /// Draw `count` fresh challenges for `shard` and compute their leaves
    pub fn generate(shard: &[u8], count: usize) -> Self {
        let challenges: Vec<Challenge> = (0..count)
            .map(|_| {
                let mut c = [0u8; CHALLENGE_SIZE];
                OsRng.fill_bytes(&mut c);
                c
            })
            .collect();
        Self::from_challenges(shard, challenges)
    }

    pub fn from_challenges(shard: &[u8], challenges: Vec<Challenge>) -> Self {
        let tree = challenges
            .par_iter()
            .map(|c| hex::encode(leaf(c, shard)))
            .collect();
        Self { challenges, tree }
    }

    /// Hex form of the challenges as the bridge expects them
    pub fn challenges_as_str(&self) -> Vec<String> {
        self.challenges.iter().map(hex::encode).collect()
    }
}

/// `RIPEMD160(SHA256(challenge ‖ shard))`
pub fn preleaf(challenge: &Challenge, shard: &[u8]) -> [u8; HASH_SIZE] {
    let mut buf = Vec::with_capacity(CHALLENGE_SIZE + shard.len());
    buf.extend_from_slice(challenge);
    buf.extend_from_slice(shard);
    ripemd160_sha256(&buf)
}

/// Leaf = hash of the preleaf
pub fn leaf(challenge: &Challenge, shard: &[u8]) -> [u8; HASH_SIZE] {
    ripemd160_sha256(&preleaf(challenge, shard))
}
