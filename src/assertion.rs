//! Signed assertions
//!
//! An assertion is a statement (handling instructions, metadata) bound to one
//! TDF. Its hash is SHA-256 over the canonical JSON of the assertion without
//! its `binding`; the binding is a compact JWS carrying two claims:
//!
//! - `assertionHash`: hex of that hash
//! - `assertionSig`: base64 of `aggregate_hash || hash bytes`
//!
//! Editing any field other than `binding` after signing changes the hash, so
//! a reader that recomputes it detects the change.

use crate::crypto::DataKey;
use crate::manifest::TDF_SPEC_VERSION;
use base64::{
    engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD},
    Engine as _,
};
use hmac::{Hmac, Mac};
use rsa::{
    pkcs1v15::{Signature, SigningKey, VerifyingKey},
    signature::{SignatureEncoding, Signer, Verifier},
    RsaPrivateKey, RsaPublicKey,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SYSTEM_METADATA_ASSERTION_ID: &str = "system-metadata";
pub const SYSTEM_METADATA_SCHEMA_V1: &str = "system-metadata-v1";
pub const JWS_BINDING_METHOD: &str = "jws";

const CLAIM_ASSERTION_HASH: &str = "assertionHash";
const CLAIM_ASSERTION_SIG: &str = "assertionSig";

#[derive(Debug, Error)]
pub enum AssertionError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid assertion hash: {0}")]
    InvalidHash(#[from] hex::FromHexError),

    #[error("malformed assertion token: {0}")]
    MalformedToken(&'static str),

    #[error("assertion token algorithm mismatch: expected {expected}, found {found}")]
    AlgorithmMismatch { expected: &'static str, found: String },

    #[error("assertion signature verification failed")]
    SignatureMismatch,

    #[error("assertion token is missing the {0} claim")]
    MissingClaim(&'static str),

    #[error("assertion signing failed: {0}")]
    Signing(String),

    #[error("HMAC initialization failed")]
    HmacInit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AssertionType {
    #[serde(rename = "handling")]
    Handling,
    #[default]
    #[serde(rename = "other")]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Scope {
    /// The whole trusted data object
    #[serde(rename = "tdo")]
    Tdo,
    #[default]
    #[serde(rename = "payload")]
    Payload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppliesToState {
    #[serde(rename = "encrypted")]
    Encrypted,
    #[serde(rename = "unencrypted")]
    Unencrypted,
}

/// Assertion body
///
/// `value` is always held as a string. On input it may also be a JSON object,
/// which is re-encoded compactly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Statement {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub format: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub schema: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub value: String,
}

impl<'de> Deserialize<'de> for Statement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct RawStatement {
            #[serde(default)]
            format: String,
            #[serde(default)]
            schema: String,
            #[serde(default)]
            value: Value,
        }

        let raw = RawStatement::deserialize(deserializer)?;
        let value = match raw.value {
            Value::Null => String::new(),
            Value::String(s) => s,
            obj @ Value::Object(_) => obj.to_string(),
            other => {
                return Err(serde::de::Error::custom(format!(
                    "value is neither a valid JSON object nor a string: {}",
                    other
                )))
            }
        };
        Ok(Statement {
            format: raw.format,
            schema: raw.schema,
            value,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub method: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assertion {
    pub id: String,
    #[serde(rename = "type")]
    pub assertion_type: AssertionType,
    pub scope: Scope,
    #[serde(
        rename = "appliesToState",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub applies_to_state: Option<AppliesToState>,
    pub statement: Statement,
    #[serde(default)]
    pub binding: Binding,
}

/// Key used to sign an assertion binding
#[derive(Clone)]
pub enum AssertionKey {
    /// Shared secret, usually the data encryption key
    Hs256(Vec<u8>),
    Rs256(RsaPrivateKey),
}

impl AssertionKey {
    pub fn algorithm(&self) -> &'static str {
        match self {
            AssertionKey::Hs256(_) => "HS256",
            AssertionKey::Rs256(_) => "RS256",
        }
    }

    /// Matching key for [`Assertion::verify`]
    pub fn verification_key(&self) -> AssertionVerificationKey {
        match self {
            AssertionKey::Hs256(secret) => AssertionVerificationKey::Hs256(secret.clone()),
            AssertionKey::Rs256(private_key) => {
                AssertionVerificationKey::Rs256(RsaPublicKey::from(private_key))
            }
        }
    }
}

impl std::fmt::Debug for AssertionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AssertionKey::{}([REDACTED])", self.algorithm())
    }
}

#[derive(Debug, Clone)]
pub enum AssertionVerificationKey {
    Hs256(Vec<u8>),
    Rs256(RsaPublicKey),
}

impl AssertionVerificationKey {
    pub fn algorithm(&self) -> &'static str {
        match self {
            AssertionVerificationKey::Hs256(_) => "HS256",
            AssertionVerificationKey::Rs256(_) => "RS256",
        }
    }
}

/// Caller supplied assertion, signed at finalize
#[derive(Debug, Clone, Default)]
pub struct AssertionConfig {
    pub id: String,
    pub assertion_type: AssertionType,
    pub scope: Scope,
    pub applies_to_state: Option<AppliesToState>,
    pub statement: Statement,
    /// Signing key; the data encryption key (HS256) when absent
    pub signing_key: Option<AssertionKey>,
}

#[derive(Serialize)]
struct TokenHeader<'a> {
    alg: &'a str,
    typ: &'a str,
}

#[derive(Deserialize)]
struct ParsedHeader {
    alg: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct AssertionClaims {
    #[serde(rename = "assertionHash", default)]
    assertion_hash: Option<String>,
    #[serde(rename = "assertionSig", default)]
    assertion_sig: Option<String>,
}

impl Assertion {
    /// Unsigned assertion carrying the config's content
    pub fn from_config(config: &AssertionConfig) -> Self {
        Assertion {
            id: config.id.clone(),
            assertion_type: config.assertion_type,
            scope: config.scope,
            applies_to_state: config.applies_to_state,
            statement: config.statement.clone(),
            binding: Binding::default(),
        }
    }

    /// Hex SHA-256 of the canonical JSON of this assertion, binding excluded
    pub fn hash(&self) -> Result<String, AssertionError> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.remove("binding");
        }
        let canonical = canonical_json(&value)?;
        Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
    }

    /// Sign `(assertion_hash, assertion_sig)` into the binding
    pub fn sign(
        &mut self,
        assertion_hash: &str,
        assertion_sig: &str,
        key: &AssertionKey,
    ) -> Result<(), AssertionError> {
        let claims = AssertionClaims {
            assertion_hash: Some(assertion_hash.to_string()),
            assertion_sig: Some(assertion_sig.to_string()),
        };
        let header = TokenHeader {
            alg: key.algorithm(),
            typ: "JWT",
        };
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?),
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?)
        );

        let signature = match key {
            AssertionKey::Hs256(secret) => {
                let mut mac =
                    HmacSha256::new_from_slice(secret).map_err(|_| AssertionError::HmacInit)?;
                mac.update(signing_input.as_bytes());
                mac.finalize().into_bytes().to_vec()
            }
            AssertionKey::Rs256(private_key) => SigningKey::<Sha256>::new(private_key.clone())
                .try_sign(signing_input.as_bytes())
                .map_err(|e| AssertionError::Signing(e.to_string()))?
                .to_vec(),
        };

        self.binding = Binding {
            method: JWS_BINDING_METHOD.to_string(),
            signature: format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(signature)),
        };
        Ok(())
    }

    /// Check the binding token and return `(assertion_hash, assertion_sig)`
    ///
    /// Comparing the returned values against a recomputed hash and aggregate
    /// binding is left to the reader.
    pub fn verify(&self, key: &AssertionVerificationKey) -> Result<(String, String), AssertionError> {
        let mut parts = self.binding.signature.split('.');
        let (Some(header_b64), Some(claims_b64), Some(signature_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(AssertionError::MalformedToken("expected three segments"));
        };

        let header: ParsedHeader = serde_json::from_slice(
            &URL_SAFE_NO_PAD
                .decode(header_b64)
                .map_err(|_| AssertionError::MalformedToken("header is not base64url"))?,
        )?;
        if header.alg != key.algorithm() {
            return Err(AssertionError::AlgorithmMismatch {
                expected: key.algorithm(),
                found: header.alg,
            });
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| AssertionError::MalformedToken("signature is not base64url"))?;
        let signing_input = &self.binding.signature[..header_b64.len() + 1 + claims_b64.len()];

        match key {
            AssertionVerificationKey::Hs256(secret) => {
                let mut mac =
                    HmacSha256::new_from_slice(secret).map_err(|_| AssertionError::HmacInit)?;
                mac.update(signing_input.as_bytes());
                let calculated = mac.finalize().into_bytes();
                if !bool::from(calculated.as_slice().ct_eq(&signature)) {
                    return Err(AssertionError::SignatureMismatch);
                }
            }
            AssertionVerificationKey::Rs256(public_key) => {
                let signature = Signature::try_from(signature.as_slice())
                    .map_err(|_| AssertionError::SignatureMismatch)?;
                VerifyingKey::<Sha256>::new(public_key.clone())
                    .verify(signing_input.as_bytes(), &signature)
                    .map_err(|_| AssertionError::SignatureMismatch)?;
            }
        }

        let claims: AssertionClaims = serde_json::from_slice(
            &URL_SAFE_NO_PAD
                .decode(claims_b64)
                .map_err(|_| AssertionError::MalformedToken("claims are not base64url"))?,
        )?;
        let hash = claims
            .assertion_hash
            .ok_or(AssertionError::MissingClaim(CLAIM_ASSERTION_HASH))?;
        let sig = claims
            .assertion_sig
            .ok_or(AssertionError::MissingClaim(CLAIM_ASSERTION_SIG))?;
        Ok((hash, sig))
    }
}

/// `base64(aggregate_hash || hex_decode(assertion_hash))`
pub fn binding_value(aggregate_hash: &[u8], assertion_hash: &str) -> Result<String, AssertionError> {
    let mut bound = aggregate_hash.to_vec();
    bound.extend_from_slice(&hex::decode(assertion_hash)?);
    Ok(BASE64.encode(bound))
}

/// Hash, bind and sign every config against the payload's aggregate hash
pub fn build_signed_assertions(
    configs: &[AssertionConfig],
    aggregate_hash: &[u8],
    dek: &DataKey,
) -> Result<Vec<Assertion>, AssertionError> {
    let default_key = AssertionKey::Hs256(dek.as_slice().to_vec());
    configs
        .iter()
        .map(|config| {
            let mut assertion = Assertion::from_config(config);
            let hash = assertion.hash()?;
            let sig = binding_value(aggregate_hash, &hash)?;
            let key = config.signing_key.as_ref().unwrap_or(&default_key);
            assertion.sign(&hash, &sig, key)?;
            Ok(assertion)
        })
        .collect()
}

#[derive(Serialize)]
struct SystemMetadata {
    tdf_spec_version: &'static str,
    creation_date: String,
    operating_system: &'static str,
    sdk_version: String,
    architecture: &'static str,
}

/// The well-known `system-metadata` assertion describing the producer
pub fn system_metadata_assertion_config() -> Result<AssertionConfig, AssertionError> {
    let metadata = SystemMetadata {
        tdf_spec_version: TDF_SPEC_VERSION,
        creation_date: chrono::Utc::now().to_rfc3339(),
        operating_system: std::env::consts::OS,
        sdk_version: format!("Rust-{}", env!("CARGO_PKG_VERSION")),
        architecture: std::env::consts::ARCH,
    };

    Ok(AssertionConfig {
        id: SYSTEM_METADATA_ASSERTION_ID.to_string(),
        assertion_type: AssertionType::Other,
        scope: Scope::Payload,
        applies_to_state: Some(AppliesToState::Unencrypted),
        statement: Statement {
            format: "json".to_string(),
            schema: SYSTEM_METADATA_SCHEMA_V1.to_string(),
            value: serde_json::to_string(&metadata)?,
        },
        signing_key: None,
    })
}

/// JSON Canonicalization Scheme (RFC 8785) rendering
///
/// Object members are ordered by the UTF-16 code units of their names.
/// Numbers are written as serde_json renders them, which matches RFC 8785 for
/// integers only. Non-integer numbers are out of scope; assertion fields
/// hashed here are strings.
fn canonical_json(value: &Value) -> Result<String, serde_json::Error> {
    let mut out = String::new();
    write_canonical(value, &mut out)?;
    Ok(out)
}

fn write_canonical(value: &Value, out: &mut String) -> Result<(), serde_json::Error> {
    match value {
        Value::Object(map) => {
            let mut members: Vec<(&String, &Value)> = map.iter().collect();
            members.sort_by(|(a, _), (b, _)| a.encode_utf16().cmp(b.encode_utf16()));
            out.push('{');
            for (i, (name, member)) in members.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(name)?);
                out.push(':');
                write_canonical(member, out)?;
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        scalar => out.push_str(&serde_json::to_string(scalar)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lazy_static::lazy_static;
    use rand::rngs::OsRng;

    lazy_static! {
        static ref RSA_KEY: RsaPrivateKey = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
    }

    fn handling_assertion() -> Assertion {
        Assertion {
            id: "a".to_string(),
            assertion_type: AssertionType::Handling,
            scope: Scope::Tdo,
            applies_to_state: None,
            statement: Statement {
                format: "json".to_string(),
                schema: "s".to_string(),
                value: "v".to_string(),
            },
            binding: Binding::default(),
        }
    }

    #[test]
    fn test_hash_is_sha256_of_canonical_form() {
        let canonical =
            r#"{"id":"a","scope":"tdo","statement":{"format":"json","schema":"s","value":"v"},"type":"handling"}"#;
        let expected = hex::encode(Sha256::digest(canonical.as_bytes()));
        assert_eq!(handling_assertion().hash().unwrap(), expected);
    }

    #[test]
    fn test_canonical_json_orders_by_utf16_units() {
        let value = serde_json::json!({
            "\u{fb33}": 1,
            "\u{1f600}": [{"z": -7, "a": null}, true],
            "b": "x",
            "a": {"d": 0, "c": "\n"},
        });
        assert_eq!(
            canonical_json(&value).unwrap(),
            "{\"a\":{\"c\":\"\\n\",\"d\":0},\"b\":\"x\",\"\u{1f600}\":[{\"a\":null,\"z\":-7},true],\"\u{fb33}\":1}"
        );
    }

    #[test]
    fn test_hash_excludes_binding() {
        let mut assertion = handling_assertion();
        let before = assertion.hash().unwrap();
        assertion
            .sign(&before, "c2ln", &AssertionKey::Hs256(vec![1u8; 32]))
            .unwrap();
        assert_eq!(assertion.binding.method, "jws");
        assert_eq!(assertion.hash().unwrap(), before);
    }

    #[test]
    fn test_hs256_round_trip() {
        let key = AssertionKey::Hs256(vec![7u8; 32]);
        let mut assertion = handling_assertion();
        let hash = assertion.hash().unwrap();
        let sig = binding_value(b"aggregate", &hash).unwrap();
        assertion.sign(&hash, &sig, &key).unwrap();

        let (got_hash, got_sig) = assertion.verify(&key.verification_key()).unwrap();
        assert_eq!(got_hash, hash);
        assert_eq!(got_sig, sig);
    }

    #[test]
    fn test_rs256_round_trip() {
        let key = AssertionKey::Rs256(RSA_KEY.clone());
        let mut assertion = handling_assertion();
        let hash = assertion.hash().unwrap();
        assertion.sign(&hash, "c2ln", &key).unwrap();

        let header = assertion.binding.signature.split('.').next().unwrap();
        let header: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(header).unwrap()).unwrap();
        assert_eq!(header["alg"], "RS256");

        let (got_hash, _) = assertion.verify(&key.verification_key()).unwrap();
        assert_eq!(got_hash, hash);
    }

    #[test]
    fn test_wrong_key_and_algorithm_rejected() {
        let mut assertion = handling_assertion();
        let hash = assertion.hash().unwrap();
        assertion
            .sign(&hash, "c2ln", &AssertionKey::Hs256(vec![7u8; 32]))
            .unwrap();

        assert!(matches!(
            assertion.verify(&AssertionVerificationKey::Hs256(vec![8u8; 32])),
            Err(AssertionError::SignatureMismatch)
        ));
        assert!(matches!(
            assertion.verify(&AssertionVerificationKey::Rs256(RsaPublicKey::from(&*RSA_KEY))),
            Err(AssertionError::AlgorithmMismatch { .. })
        ));

        assertion.binding.signature = "not-a-token".to_string();
        assert!(matches!(
            assertion.verify(&AssertionVerificationKey::Hs256(vec![7u8; 32])),
            Err(AssertionError::MalformedToken(_))
        ));
    }

    #[test]
    fn test_tampering_changes_hash() {
        let key = AssertionKey::Hs256(vec![3u8; 32]);
        let mut assertion = handling_assertion();
        let hash = assertion.hash().unwrap();
        assertion.sign(&hash, "c2ln", &key).unwrap();

        let mutations: [fn(&mut Assertion); 4] = [
            |a| a.id = "b".to_string(),
            |a| a.assertion_type = AssertionType::Other,
            |a| a.scope = Scope::Payload,
            |a| a.statement.value = "changed".to_string(),
        ];
        for mutate in mutations {
            let mut tampered = assertion.clone();
            mutate(&mut tampered);
            let (signed_hash, _) = tampered.verify(&key.verification_key()).unwrap();
            assert_ne!(tampered.hash().unwrap(), signed_hash);
        }
    }

    #[test]
    fn test_tampered_claims_fail_verification() {
        let key = AssertionKey::Hs256(vec![3u8; 32]);
        let mut assertion = handling_assertion();
        assertion.sign("00", "c2ln", &key).unwrap();

        let parts: Vec<&str> = assertion.binding.signature.split('.').collect();
        let forged = URL_SAFE_NO_PAD.encode(br#"{"assertionHash":"ff","assertionSig":"c2ln"}"#);
        assertion.binding.signature = format!("{}.{}.{}", parts[0], forged, parts[2]);
        assert!(matches!(
            assertion.verify(&key.verification_key()),
            Err(AssertionError::SignatureMismatch)
        ));
    }

    #[test]
    fn test_statement_value_forms() {
        let from_object: Statement =
            serde_json::from_str(r#"{"format":"json","schema":"x","value":{"b":1,"a":"two"}}"#).unwrap();
        let reparsed: Value = serde_json::from_str(&from_object.value).unwrap();
        assert_eq!(reparsed["a"], "two");
        assert_eq!(reparsed["b"], 1);

        let from_string: Statement =
            serde_json::from_str(r#"{"format":"string","schema":"x","value":"plain"}"#).unwrap();
        assert_eq!(from_string.value, "plain");

        assert!(serde_json::from_str::<Statement>(r#"{"value":[1,2]}"#).is_err());
    }

    #[test]
    fn test_build_signed_assertions_binding() {
        let dek = DataKey::generate();
        let aggregate = [0xabu8; 32];
        let config = AssertionConfig {
            id: "handling".to_string(),
            assertion_type: AssertionType::Handling,
            scope: Scope::Tdo,
            applies_to_state: Some(AppliesToState::Encrypted),
            statement: Statement {
                format: "string".to_string(),
                schema: "urn:nato:stanag:5636:A:1:elements:json".to_string(),
                value: "NATO//UNCLASSIFIED".to_string(),
            },
            signing_key: None,
        };

        let signed = build_signed_assertions(&[config], &aggregate, &dek).unwrap();
        assert_eq!(signed.len(), 1);
        let (hash, sig) = signed[0]
            .verify(&AssertionVerificationKey::Hs256(dek.as_slice().to_vec()))
            .unwrap();
        assert_eq!(hash, signed[0].hash().unwrap());

        let bound = BASE64.decode(sig).unwrap();
        assert_eq!(&bound[..32], &aggregate);
        assert_eq!(bound[32..].to_vec(), hex::decode(&hash).unwrap());
    }

    #[test]
    fn test_system_metadata_assertion() {
        let config = system_metadata_assertion_config().unwrap();
        assert_eq!(config.id, "system-metadata");
        assert_eq!(config.assertion_type, AssertionType::Other);
        assert_eq!(config.scope, Scope::Payload);
        assert_eq!(config.applies_to_state, Some(AppliesToState::Unencrypted));
        assert_eq!(config.statement.schema, "system-metadata-v1");

        let value: Value = serde_json::from_str(&config.statement.value).unwrap();
        assert_eq!(value["tdf_spec_version"], TDF_SPEC_VERSION);
        assert!(value["sdk_version"].as_str().unwrap().starts_with("Rust-"));
        assert!(chrono::DateTime::parse_from_rfc3339(value["creation_date"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn test_assertion_json_field_names() {
        let mut assertion = handling_assertion();
        assertion.applies_to_state = Some(AppliesToState::Encrypted);
        let json = serde_json::to_value(&assertion).unwrap();
        assert_eq!(json["type"], "handling");
        assert_eq!(json["appliesToState"], "encrypted");
        assert!(json.get("binding").is_some());
    }
}
