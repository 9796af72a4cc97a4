//! RSA-OAEP key wrapping
//!
//! SHA-1 is the default OAEP digest because existing TDF readers unwrap with
//! it. SHA-256 is available for deployments that control both ends.

use super::{KemError, KeyEncapsulation};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::rngs::OsRng;
use rsa::{pkcs8::DecodePublicKey, Oaep, RsaPublicKey};
use sha1::Sha1;
use sha2::Sha256;

/// OAEP hash algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OaepHash {
    #[default]
    Sha1,
    Sha256,
}

/// RSA-OAEP key encapsulation mechanism
#[derive(Debug, Clone, Copy, Default)]
pub struct RsaOaepKem {
    pub hash: OaepHash,
}

impl RsaOaepKem {
    pub fn new(hash: OaepHash) -> Self {
        RsaOaepKem { hash }
    }
}

impl KeyEncapsulation for RsaOaepKem {
    /// PEM-encoded SPKI public key
    type PublicKey = str;
    /// Base64-encoded ciphertext
    type WrappedKey = String;

    fn wrap(&self, key: &[u8], public_key_pem: &str) -> Result<String, KemError> {
        let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
            .map_err(|e| KemError::InvalidKey(format!("Failed to parse RSA public key: {}", e)))?;

        let wrapped = match self.hash {
            OaepHash::Sha1 => public_key.encrypt(&mut OsRng, Oaep::new::<Sha1>(), key),
            OaepHash::Sha256 => public_key.encrypt(&mut OsRng, Oaep::new::<Sha256>(), key),
        }
        .map_err(|e| KemError::WrapError(format!("RSA-OAEP encryption failed: {}", e)))?;

        Ok(BASE64.encode(wrapped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs8::{EncodePublicKey, LineEnding};
    use rsa::RsaPrivateKey;

    fn generate_test_keypair() -> (String, RsaPrivateKey) {
        let private_key = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let public_pem = RsaPublicKey::from(&private_key)
            .to_public_key_pem(LineEnding::LF)
            .unwrap();
        (public_pem, private_key)
    }

    #[test]
    fn test_wrap_unwraps_with_sha1() {
        let (public_pem, private_key) = generate_test_keypair();
        let split = [0x42u8; 32];

        let wrapped = RsaOaepKem::default().wrap(&split, &public_pem).unwrap();
        let ciphertext = BASE64.decode(wrapped).unwrap();
        assert_eq!(ciphertext.len(), 256);

        let unwrapped = private_key.decrypt(Oaep::new::<Sha1>(), &ciphertext).unwrap();
        assert_eq!(unwrapped, split);
    }

    #[test]
    fn test_wrap_with_sha256() {
        let (public_pem, private_key) = generate_test_keypair();
        let split = [0x17u8; 32];

        let wrapped = RsaOaepKem::new(OaepHash::Sha256).wrap(&split, &public_pem).unwrap();
        let ciphertext = BASE64.decode(wrapped).unwrap();
        let unwrapped = private_key.decrypt(Oaep::new::<Sha256>(), &ciphertext).unwrap();
        assert_eq!(unwrapped, split);
    }

    #[test]
    fn test_invalid_pem() {
        let kem = RsaOaepKem::default();
        assert!(matches!(
            kem.wrap(&[0u8; 32], "not a valid pem"),
            Err(KemError::InvalidKey(_))
        ));
        assert!(kem.wrap(&[0u8; 32], "-----BEGIN PUBLIC KEY-----\nAAAA").is_err());
    }
}
