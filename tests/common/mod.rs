//! Shared helpers for writer integration tests
//!
//! Custodian key pairs are generated here so tests can play the key access
//! server: unwrap a split, recombine the DEK, then open the container.

#![allow(dead_code)]

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use lazy_static::lazy_static;
use opentdf_writer::crypto::aes_gcm_open;
use opentdf_writer::kem::ec::derive_wrap_key;
use opentdf_writer::manifest::{KeyAccess, Manifest};
use opentdf_writer::policy::{Grant, KasPublicKey, KeyAlgorithm};
use p256::elliptic_curve::ecdh::diffie_hellman;
use p256::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rand::rngs::OsRng;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use std::collections::BTreeMap;
use std::io::{Cursor, Read};

pub const HELLO_WORLD: &[u8] = b"Hello, World!";

lazy_static! {
    /// RSA-2048 generation is slow; share one key across tests
    pub static ref RSA_CUSTODIAN: RsaPrivateKey =
        RsaPrivateKey::new(&mut OsRng, 2048).expect("RSA key generation");
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A custodian private key, as held by a key access server
pub enum Custodian {
    Rsa(RsaPrivateKey),
    Ec(p256::SecretKey),
}

impl Custodian {
    pub fn rsa() -> Self {
        Custodian::Rsa(RSA_CUSTODIAN.clone())
    }

    pub fn ec() -> Self {
        Custodian::Ec(p256::SecretKey::random(&mut OsRng))
    }

    pub fn public_key(&self, url: &str, kid: &str) -> KasPublicKey {
        match self {
            Custodian::Rsa(key) => {
                let pem = RsaPublicKey::from(key)
                    .to_public_key_pem(LineEnding::LF)
                    .unwrap();
                KasPublicKey::new(url, KeyAlgorithm::Rsa2048, kid, pem)
            }
            Custodian::Ec(key) => {
                let pem = key.public_key().to_public_key_pem(LineEnding::LF).unwrap();
                KasPublicKey::new(url, KeyAlgorithm::EcSecp256r1, kid, pem)
            }
        }
    }

    pub fn grant(&self, url: &str, kid: &str) -> Grant {
        Grant::with_key(self.public_key(url, kid))
    }

    /// Recover the split carried by a key access object
    pub fn unwrap(&self, kao: &KeyAccess) -> Vec<u8> {
        let wrapped = BASE64.decode(&kao.wrapped_key).unwrap();
        match self {
            Custodian::Rsa(key) => {
                assert_eq!(kao.access_type, "wrapped");
                key.decrypt(Oaep::new::<Sha1>(), &wrapped).unwrap()
            }
            Custodian::Ec(key) => {
                assert_eq!(kao.access_type, "eccWrapped");
                let ephemeral_pem = kao.ephemeral_public_key.as_deref().unwrap();
                let ephemeral = p256::PublicKey::from_public_key_pem(ephemeral_pem).unwrap();
                let shared = diffie_hellman(key.to_nonzero_scalar(), ephemeral.as_affine());
                let wrap_key = derive_wrap_key(shared.raw_secret_bytes()).unwrap();
                aes_gcm_open(wrap_key.as_slice(), &wrapped, "test unwrap").unwrap()
            }
        }
    }
}

/// XOR of one split per split id
///
/// `custodians` maps a KAS URL to its private key; the first object of each
/// split whose URL has a custodian is used.
pub fn recover_dek(manifest: &Manifest, custodians: &BTreeMap<&str, &Custodian>) -> Vec<u8> {
    let mut by_split: BTreeMap<&str, Vec<u8>> = BTreeMap::new();
    for kao in &manifest.encryption_information.key_access {
        if by_split.contains_key(kao.sid.as_str()) {
            continue;
        }
        if let Some(custodian) = custodians.get(kao.url.as_str()) {
            by_split.insert(kao.sid.as_str(), custodian.unwrap(kao));
        }
    }
    assert!(!by_split.is_empty(), "no split could be unwrapped");

    let mut dek = vec![0u8; 32];
    for split in by_split.values() {
        for (d, s) in dek.iter_mut().zip(split) {
            *d ^= s;
        }
    }
    dek
}

/// Read the payload and manifest entries of a finished container
pub fn read_container(container: &[u8]) -> (Vec<u8>, Manifest) {
    let mut zip = zip::ZipArchive::new(Cursor::new(container)).unwrap();
    assert_eq!(zip.len(), 2);

    let mut payload = Vec::new();
    zip.by_name("0.payload")
        .unwrap()
        .read_to_end(&mut payload)
        .unwrap();

    let mut manifest_json = String::new();
    zip.by_name("0.manifest.json")
        .unwrap()
        .read_to_string(&mut manifest_json)
        .unwrap();

    (payload, Manifest::from_json(&manifest_json).unwrap())
}

/// Decrypt every segment of a payload using the manifest's segment table
pub fn decrypt_payload(payload: &[u8], manifest: &Manifest, dek: &[u8]) -> Vec<u8> {
    let mut plaintext = Vec::new();
    let mut offset = 0usize;
    for segment in &manifest.encryption_information.integrity_information.segments {
        let end = offset + segment.encrypted_segment_size as usize;
        let sealed = &payload[offset..end];
        plaintext.extend(aes_gcm_open(dek, sealed, "test decrypt").unwrap());
        offset = end;
    }
    assert_eq!(offset, payload.len());
    plaintext
}
