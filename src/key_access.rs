//! Key access object construction
//!
//! Turns a [`SplitResult`] into manifest `keyAccess` entries: one entry per
//! (split, custodian) pair whose public key is known. Every custodian of a
//! split wraps the same share, so any one of them can release it.

use crate::crypto::{calculate_policy_binding, encrypt_metadata, CryptoError};
use crate::kem::{EcdhKem, KemError, KeyEncapsulation, RsaOaepKem};
use crate::keysplit::{Split, SplitResult};
use crate::manifest::{KeyAccess, KeyAccessType, PolicyBinding, KAS_PROTOCOL, KEY_ACCESS_SCHEMA_VERSION};
use crate::policy::KasPublicKey;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum KeyAccessError {
    #[error("no splits provided")]
    NoSplitsProvided,

    #[error("no valid key access objects could be produced")]
    NoValidKeyAccessObjects,

    #[error("failed to wrap split {split_id} for {url}: {source}")]
    Wrap {
        split_id: String,
        url: String,
        source: KemError,
    },

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

/// Build the manifest key access list
///
/// Custodians without a known public key are skipped with a warning; the call
/// fails when any split is left without a key access object.
pub fn build_key_access_objects(
    split_result: &SplitResult,
    policy_base64: &str,
    encrypted_metadata: Option<&str>,
) -> Result<Vec<KeyAccess>, KeyAccessError> {
    if split_result.splits.is_empty() {
        return Err(KeyAccessError::NoSplitsProvided);
    }

    let mut objects = Vec::new();
    for split in &split_result.splits {
        let before = objects.len();
        for url in &split.kas_urls {
            let Some(key) = split_result.kas_public_keys.get(url) else {
                warn!(split_id = %split.id, kas_url = %url, "no public key for KAS, skipping");
                continue;
            };
            objects.push(create_key_access_object(
                split,
                url,
                key,
                policy_base64,
                encrypted_metadata,
            )?);
        }
        // Every share is needed to rebuild the key
        if objects.len() == before {
            warn!(split_id = %split.id, "no custodian of split has a public key");
            return Err(KeyAccessError::NoValidKeyAccessObjects);
        }
    }
    debug!(
        splits = split_result.splits.len(),
        key_access_objects = objects.len(),
        "built key access objects"
    );
    Ok(objects)
}

fn create_key_access_object(
    split: &Split,
    url: &str,
    key: &KasPublicKey,
    policy_base64: &str,
    encrypted_metadata: Option<&str>,
) -> Result<KeyAccess, KeyAccessError> {
    let wrap_error = |source: KemError| KeyAccessError::Wrap {
        split_id: split.id.clone(),
        url: url.to_string(),
        source,
    };

    let (access_type, wrapped_key, ephemeral_public_key) = if key.algorithm.is_ec() {
        let wrapped = EcdhKem.wrap(&split.data, &key.pem).map_err(wrap_error)?;
        (
            KeyAccessType::EccWrapped,
            wrapped.wrapped_key,
            Some(wrapped.ephemeral_public_key),
        )
    } else {
        let wrapped = RsaOaepKem::default()
            .wrap(&split.data, &key.pem)
            .map_err(wrap_error)?;
        (KeyAccessType::Wrapped, wrapped, None)
    };

    let encrypted_metadata = match encrypted_metadata {
        Some(metadata) if !metadata.is_empty() => Some(encrypt_metadata(metadata, &split.data)?),
        _ => None,
    };

    Ok(KeyAccess {
        access_type: access_type.as_str().to_string(),
        url: url.to_string(),
        protocol: KAS_PROTOCOL.to_string(),
        wrapped_key,
        policy_binding: PolicyBinding {
            alg: "HS256".to_string(),
            hash: calculate_policy_binding(policy_base64, &split.data)?,
        },
        kid: key.kid.clone(),
        sid: split.id.clone(),
        encrypted_metadata,
        ephemeral_public_key,
        schema_version: KEY_ACCESS_SCHEMA_VERSION.to_string(),
    })
}
