//! Ephemeral ECDH key wrapping (P-256)
//!
//! 1. Generate an ephemeral P-256 key pair
//! 2. ECDH with the custodian public key
//! 3. HKDF-SHA256 (salt = SHA-256("TDF"), empty info) to a 32-byte key
//! 4. AES-256-GCM seal of the split: `nonce || ciphertext || tag`
//!
//! The ephemeral public key travels with the key access object so the
//! custodian can repeat the agreement.

use super::{KemError, KeyEncapsulation};
use crate::crypto::{aes_gcm_seal, KEY_SIZE};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hkdf::Hkdf;
use lazy_static::lazy_static;
use p256::{
    ecdh::EphemeralSecret,
    pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding},
    PublicKey,
};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

lazy_static! {
    /// HKDF salt shared with TDF readers
    pub static ref TDF_SALT: [u8; 32] = Sha256::digest(b"TDF").into();
}

/// Output of an EC wrap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcWrappedKey {
    /// Base64 of `nonce || ciphertext || tag`
    pub wrapped_key: String,
    /// SPKI PEM of the ephemeral public key
    pub ephemeral_public_key: String,
}

/// ECDH key encapsulation mechanism over P-256
#[derive(Debug, Clone, Copy, Default)]
pub struct EcdhKem;

impl KeyEncapsulation for EcdhKem {
    /// PEM-encoded SPKI public key
    type PublicKey = str;
    type WrappedKey = EcWrappedKey;

    fn wrap(&self, key: &[u8], public_key_pem: &str) -> Result<EcWrappedKey, KemError> {
        let recipient = PublicKey::from_public_key_pem(public_key_pem)
            .map_err(|e| KemError::InvalidKey(format!("Failed to parse EC public key: {}", e)))?;

        let ephemeral = EphemeralSecret::random(&mut OsRng);
        let ephemeral_public_key = ephemeral
            .public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| KemError::EncodingError(format!("Failed to encode ephemeral key: {}", e)))?;

        let shared = ephemeral.diffie_hellman(&recipient);
        let wrap_key = derive_wrap_key(shared.raw_secret_bytes())?;

        let sealed = aes_gcm_seal(wrap_key.as_slice(), key, "EC key wrap")
            .map_err(|e| KemError::WrapError(e.to_string()))?;

        Ok(EcWrappedKey {
            wrapped_key: BASE64.encode(sealed),
            ephemeral_public_key,
        })
    }
}

/// HKDF-SHA256 over an ECDH shared secret, salted with SHA-256("TDF")
pub fn derive_wrap_key(shared_secret: &[u8]) -> Result<Zeroizing<[u8; KEY_SIZE]>, KemError> {
    let hkdf = Hkdf::<Sha256>::new(Some(TDF_SALT.as_slice()), shared_secret);
    let mut okm = Zeroizing::new([0u8; KEY_SIZE]);
    hkdf.expand(&[], okm.as_mut_slice())
        .map_err(|_| KemError::KeyDerivationFailed)?;
    Ok(okm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::aes_gcm_open;
    use p256::{elliptic_curve::ecdh::diffie_hellman, SecretKey};

    #[test]
    fn test_wrap_recoverable_by_custodian() {
        let custodian = SecretKey::random(&mut OsRng);
        let custodian_pem = custodian
            .public_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap();
        let split = [0x5au8; 32];

        let wrapped = EcdhKem.wrap(&split, &custodian_pem).unwrap();
        assert!(wrapped.ephemeral_public_key.starts_with("-----BEGIN PUBLIC KEY-----"));

        let ephemeral = PublicKey::from_public_key_pem(&wrapped.ephemeral_public_key).unwrap();
        let shared = diffie_hellman(custodian.to_nonzero_scalar(), ephemeral.as_affine());
        let wrap_key = derive_wrap_key(shared.raw_secret_bytes()).unwrap();

        let sealed = BASE64.decode(&wrapped.wrapped_key).unwrap();
        let recovered = aes_gcm_open(wrap_key.as_slice(), &sealed, "test").unwrap();
        assert_eq!(recovered, split);
    }

    #[test]
    fn test_ephemeral_key_differs_per_wrap() {
        let custodian = SecretKey::random(&mut OsRng);
        let pem = custodian
            .public_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap();
        let kem = EcdhKem;
        let a = kem.wrap(&[1u8; 32], &pem).unwrap();
        let b = kem.wrap(&[1u8; 32], &pem).unwrap();
        assert_ne!(a.ephemeral_public_key, b.ephemeral_public_key);
    }

    #[test]
    fn test_rsa_pem_rejected() {
        let pem = "-----BEGIN PUBLIC KEY-----\nMA==\n-----END PUBLIC KEY-----\n";
        let err = EcdhKem.wrap(&[0u8; 32], pem).unwrap_err();
        assert!(matches!(err, KemError::InvalidKey(_)));
    }
}
