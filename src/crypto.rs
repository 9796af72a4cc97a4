//! Segment cipher and integrity primitives
//!
//! Every payload segment is sealed with AES-256-GCM under the writer's data
//! encryption key and stored as `nonce || ciphertext || tag`. Integrity
//! hashes are always computed over that complete byte string.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

/// AES-256 key size in bytes
pub const KEY_SIZE: usize = 32;
/// Standard 96-bit GCM nonce size
pub const GCM_NONCE_SIZE: usize = 12;
/// GCM authentication tag size
pub const GCM_TAG_SIZE: usize = 16;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("AES-GCM failure during {0}")]
    Aead(&'static str),

    #[error("HMAC initialization failed")]
    HmacInit,

    #[error("GMAC requires at least 16 bytes of data, got {0}")]
    GmacDataTooShort(usize),

    #[error("Unknown integrity algorithm: {0}")]
    UnknownIntegrityAlgorithm(String),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Metadata serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Data encryption key (32 bytes) that zeroizes on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DataKey(pub(crate) [u8; KEY_SIZE]);

impl DataKey {
    /// Generate a fresh random key from the OS RNG
    pub fn generate() -> Self {
        DataKey(generate_key_32())
    }

    /// Create a key from a 32-byte slice
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                got: bytes.len(),
            });
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(DataKey(key))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DataKey([REDACTED])")
    }
}

/// Integrity algorithm used for segment hashes and the root signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntegrityAlgorithm {
    /// HMAC-SHA256 keyed by the data encryption key
    #[default]
    Hs256,
    /// The GCM authentication tag that closes the protected bytes
    Gmac,
}

impl IntegrityAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrityAlgorithm::Hs256 => "HS256",
            IntegrityAlgorithm::Gmac => "GMAC",
        }
    }
}

impl std::fmt::Display for IntegrityAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for IntegrityAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HS256" => Ok(IntegrityAlgorithm::Hs256),
            "GMAC" => Ok(IntegrityAlgorithm::Gmac),
            _ => Err(CryptoError::UnknownIntegrityAlgorithm(s.to_string())),
        }
    }
}

/// Generate a random 32-byte key
pub fn generate_key_32() -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    OsRng.fill_bytes(&mut key);
    key
}

/// Generate a random 96-bit nonce for AES-GCM
pub fn generate_nonce() -> [u8; GCM_NONCE_SIZE] {
    let mut nonce = [0u8; GCM_NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

fn create_aes_cipher(key: &[u8]) -> Result<Aes256Gcm, CryptoError> {
    Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
        expected: KEY_SIZE,
        got: key.len(),
    })
}

/// Seal `plaintext` under `key`, returning `nonce || ciphertext || tag`
pub fn aes_gcm_seal(key: &[u8], plaintext: &[u8], op: &'static str) -> Result<Vec<u8>, CryptoError> {
    let cipher = create_aes_cipher(key)?;
    seal_with(&cipher, plaintext, op)
}

fn seal_with(cipher: &Aes256Gcm, plaintext: &[u8], op: &'static str) -> Result<Vec<u8>, CryptoError> {
    let nonce = generate_nonce();
    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::Aead(op))?;

    let mut out = Vec::with_capacity(GCM_NONCE_SIZE + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Open a `nonce || ciphertext || tag` buffer produced by [`aes_gcm_seal`]
pub fn aes_gcm_open(key: &[u8], sealed: &[u8], op: &'static str) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < GCM_NONCE_SIZE + GCM_TAG_SIZE {
        return Err(CryptoError::Aead(op));
    }
    let cipher = create_aes_cipher(key)?;
    let (nonce, body) = sealed.split_at(GCM_NONCE_SIZE);
    cipher
        .decrypt(Nonce::from_slice(nonce), body)
        .map_err(|_| CryptoError::Aead(op))
}

/// Per-segment AES-256-GCM encryption under the data encryption key
pub struct SegmentCipher {
    cipher: Aes256Gcm,
}

impl SegmentCipher {
    pub fn new(key: &DataKey) -> Result<Self, CryptoError> {
        Ok(Self {
            cipher: create_aes_cipher(key.as_slice())?,
        })
    }

    /// Encrypt one segment with a fresh nonce: `nonce || ciphertext || tag`
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        seal_with(&self.cipher, plaintext, "segment encryption")
    }
}

/// Calculate HMAC-SHA256 over data
pub fn calculate_hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).map_err(|_| CryptoError::HmacInit)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Raw integrity hash of `data` under `key`
///
/// For a sealed segment the GMAC variant is the trailing GCM tag, which
/// already authenticates the nonce and ciphertext.
pub fn calculate_signature(
    data: &[u8],
    key: &DataKey,
    algorithm: IntegrityAlgorithm,
) -> Result<Vec<u8>, CryptoError> {
    match algorithm {
        IntegrityAlgorithm::Hs256 => calculate_hmac(key.as_slice(), data),
        IntegrityAlgorithm::Gmac => {
            if data.len() < GCM_TAG_SIZE {
                return Err(CryptoError::GmacDataTooShort(data.len()));
            }
            Ok(data[data.len() - GCM_TAG_SIZE..].to_vec())
        }
    }
}

/// Base64 segment hash as stored in the manifest
pub fn segment_hash(
    sealed_segment: &[u8],
    key: &DataKey,
    algorithm: IntegrityAlgorithm,
) -> Result<String, CryptoError> {
    Ok(BASE64.encode(calculate_signature(sealed_segment, key, algorithm)?))
}

/// Root signature over the decoded segment hashes, concatenated in order
pub fn calculate_root_signature(
    aggregate_hash: &[u8],
    key: &DataKey,
    algorithm: IntegrityAlgorithm,
) -> Result<String, CryptoError> {
    Ok(BASE64.encode(calculate_signature(aggregate_hash, key, algorithm)?))
}

/// Calculate a policy binding for one key split
///
/// `base64(hex(HMAC-SHA256(split_key, policy_base64)))`, the form readers
/// expect in `policyBinding.hash`.
pub fn calculate_policy_binding(policy_base64: &str, split_key: &[u8]) -> Result<String, CryptoError> {
    let mac = calculate_hmac(split_key, policy_base64.as_bytes())?;
    Ok(BASE64.encode(hex::encode(mac).as_bytes()))
}

/// Encrypted metadata carried in a key access object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncryptedMetadata {
    pub ciphertext: String,
    pub iv: String,
}

/// Encrypt caller metadata under a split key
///
/// Returns base64 of the JSON `{"ciphertext": ..., "iv": ...}` document.
pub fn encrypt_metadata(metadata: &str, split_key: &[u8]) -> Result<String, CryptoError> {
    let sealed = aes_gcm_seal(split_key, metadata.as_bytes(), "metadata encryption")?;
    let doc = EncryptedMetadata {
        ciphertext: BASE64.encode(&sealed),
        iv: BASE64.encode(&sealed[..GCM_NONCE_SIZE]),
    };
    Ok(BASE64.encode(serde_json::to_vec(&doc)?))
}
