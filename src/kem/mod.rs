//! Key encapsulation for key splits
//!
//! Each split of the data encryption key is wrapped under a custodian's
//! public key before it is written into a key access object. RSA custodians
//! use RSA-OAEP; EC custodians use an ephemeral ECDH agreement.

use thiserror::Error;

pub mod ec;
pub mod rsa;

pub use ec::{EcWrappedKey, EcdhKem};
pub use rsa::{OaepHash, RsaOaepKem};

#[derive(Debug, Error)]
pub enum KemError {
    #[error("Key wrapping failed: {0}")]
    WrapError(String),

    #[error("Invalid key format: {0}")]
    InvalidKey(String),

    #[error("Key derivation failed")]
    KeyDerivationFailed,

    #[error("Encoding error: {0}")]
    EncodingError(String),
}

/// Wraps a symmetric key under a recipient public key
pub trait KeyEncapsulation {
    /// Public key type accepted by the mechanism
    type PublicKey: ?Sized;

    /// Wrapped key output
    type WrappedKey;

    fn wrap(&self, key: &[u8], public_key: &Self::PublicKey) -> Result<Self::WrappedKey, KemError>;
}
