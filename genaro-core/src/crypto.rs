//! Cryptographic primitives for Genaro
//!
//! Provides:
//! - Shard content hashing, RIPEMD-160 over SHA-256
//! - AES-256-GCM shard encryption (authenticated encryption)
//! - Bucket key derivation using Argon2 and per-file key derivation

use crate::error::{GenaroError, Result};
use aes_gcm::{aead::Aead, Aes256Gcm, KeyInit, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use ripemd::Ripemd160;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// AES-256-GCM key size (32 bytes)
pub const KEY_SIZE: usize = 32;

/// AES-GCM nonce size (12 bytes / 96 bits)
pub const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size (16 bytes)
pub const TAG_SIZE: usize = 16;

/// Bytes added to every encrypted shard (nonce + tag)
pub const ENCRYPTION_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

/// Length of a shard hash digest
pub const HASH_SIZE: usize = 20;

/// Length of the random per-file index
pub const FILE_INDEX_SIZE: usize = 32;

/// RIPEMD-160(SHA-256(data))
pub fn ripemd160_sha256(data: &[u8]) -> [u8; HASH_SIZE] {
    let sha = Sha256::digest(data);
    let rmd = Ripemd160::digest(sha);
    let mut out = [0u8; HASH_SIZE];
    out.copy_from_slice(&rmd);
    out
}

/// Content hash of a shard as the network addresses it
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShardHash([u8; HASH_SIZE]);

impl ShardHash {
    /// Hash shard bytes
    pub fn compute(data: &[u8]) -> Self {
        Self(ripemd160_sha256(data))
    }

    pub fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// Lowercase hex, 40 characters
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|_| GenaroError::FarmerIntegrity)?;
        if bytes.len() != HASH_SIZE {
            return Err(GenaroError::FarmerIntegrity);
        }
        let mut arr = [0u8; HASH_SIZE];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Verify that data matches this hash
    pub fn verify(&self, data: &[u8]) -> bool {
        Self::compute(data) == *self
    }
}

impl fmt::Debug for ShardHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShardHash({})", &self.to_hex()[..12])
    }
}

impl fmt::Display for ShardHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for ShardHash {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ShardHash {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(|_| serde::de::Error::custom("invalid shard hash"))
    }
}

/// Random per-file index, stored by the bridge next to the file
pub fn generate_file_index() -> [u8; FILE_INDEX_SIZE] {
    let mut index = [0u8; FILE_INDEX_SIZE];
    OsRng.fill_bytes(&mut index);
    index
}

/// AES-256-GCM encryption key
#[derive(Clone)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    /// Generate a new random encryption key
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from a slice (validates length)
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        if slice.len() != KEY_SIZE {
            return Err(GenaroError::Algorithm);
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(slice);
        Ok(Self(key))
    }

    /// Derive a bucket key from a passphrase using Argon2, salted with the bucket id
    pub fn derive_from_password(password: &[u8], salt: &[u8]) -> Result<Self> {
        use argon2::password_hash::SaltString;
        use argon2::{Argon2, PasswordHasher};

        let salt_b64 =
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD_NO_PAD, salt);
        let salt_string = SaltString::from_b64(&salt_b64).map_err(|_| GenaroError::Algorithm)?;

        let password_hash = Argon2::default()
            .hash_password(password, &salt_string)
            .map_err(|_| GenaroError::Algorithm)?;

        let hash_bytes = password_hash.hash.ok_or(GenaroError::Algorithm)?;
        Self::from_slice(hash_bytes.as_bytes())
    }

    /// File key = SHA-256(bucket_key ‖ file_index)
    pub fn derive_file_key(bucket_key: &EncryptionKey, file_index: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bucket_key.as_bytes());
        hasher.update(file_index);
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&hasher.finalize());
        Self(key)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptionKey([REDACTED])")
    }
}

impl Drop for EncryptionKey {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

/// Encrypt a shard slice, returning `nonce ‖ ciphertext ‖ tag`
pub fn encrypt_to_bytes(plaintext: &[u8], key: &EncryptionKey) -> Result<Vec<u8>> {
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher =
        Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| GenaroError::FileEncryption)?;
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| GenaroError::FileEncryption)?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt `nonce ‖ ciphertext ‖ tag`
pub fn decrypt_from_bytes(data: &[u8], key: &EncryptionKey) -> Result<Vec<u8>> {
    if data.len() < ENCRYPTION_OVERHEAD {
        return Err(GenaroError::FileDecryption);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let cipher =
        Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| GenaroError::FileDecryption)?;

    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| GenaroError::FileDecryption)
}
