//! Serde model of the TDF manifest (`0.manifest.json`)

use crate::assertion::Assertion;
use serde::{Deserialize, Serialize};

/// TDF format version written into every manifest
pub const TDF_SPEC_VERSION: &str = "4.3.0";
/// Archive entry name of the encrypted payload
pub const PAYLOAD_URL: &str = "0.payload";
/// Archive entry name of the manifest
pub const MANIFEST_FILE_NAME: &str = "0.manifest.json";
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";
pub const KEY_ACCESS_SCHEMA_VERSION: &str = "1.0";
pub const KAS_PROTOCOL: &str = "kas";
pub const ENCRYPTION_ALGORITHM: &str = "AES-256-GCM";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    #[serde(rename = "tdf_spec_version")]
    pub tdf_spec_version: String,
    pub payload: Payload,
    #[serde(rename = "encryptionInformation")]
    pub encryption_information: EncryptionInformation,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assertions: Vec<Assertion>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payload {
    #[serde(rename = "type")]
    pub payload_type: String,
    pub url: String,
    pub protocol: String,
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(rename = "isEncrypted")]
    pub is_encrypted: bool,
}

impl Payload {
    pub fn new(mime_type: Option<String>) -> Self {
        Payload {
            payload_type: "reference".to_string(),
            url: PAYLOAD_URL.to_string(),
            protocol: "zip".to_string(),
            mime_type: Some(mime_type.unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string())),
            is_encrypted: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncryptionInformation {
    #[serde(rename = "type")]
    pub encryption_type: String,
    #[serde(rename = "keyAccess")]
    pub key_access: Vec<KeyAccess>,
    pub method: EncryptionMethod,
    #[serde(rename = "integrityInformation")]
    pub integrity_information: IntegrityInformation,
    pub policy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyBinding {
    pub alg: String,
    pub hash: String,
}

/// One custodian's wrapped copy of one key split
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeyAccess {
    #[serde(rename = "type")]
    pub access_type: String,
    pub url: String,
    pub protocol: String,
    #[serde(rename = "wrappedKey")]
    pub wrapped_key: String,
    #[serde(rename = "policyBinding")]
    pub policy_binding: PolicyBinding,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kid: String,
    /// Split id shared by every custodian of the same split
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sid: String,
    #[serde(rename = "encryptedMetadata", skip_serializing_if = "Option::is_none")]
    pub encrypted_metadata: Option<String>,
    #[serde(rename = "ephemeralPublicKey", skip_serializing_if = "Option::is_none")]
    pub ephemeral_public_key: Option<String>,
    #[serde(rename = "schemaVersion", default, skip_serializing_if = "String::is_empty")]
    pub schema_version: String,
}

/// Key wrapping scheme recorded in `keyAccess[].type`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAccessType {
    /// RSA-OAEP
    Wrapped,
    /// Ephemeral ECDH + AES-GCM
    EccWrapped,
}

impl KeyAccessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyAccessType::Wrapped => "wrapped",
            KeyAccessType::EccWrapped => "eccWrapped",
        }
    }
}

impl std::fmt::Display for KeyAccessType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncryptionMethod {
    pub algorithm: String,
    #[serde(rename = "isStreamable")]
    pub is_streamable: bool,
    pub iv: String,
}

impl Default for EncryptionMethod {
    fn default() -> Self {
        EncryptionMethod {
            algorithm: ENCRYPTION_ALGORITHM.to_string(),
            is_streamable: true,
            iv: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntegrityInformation {
    #[serde(rename = "rootSignature")]
    pub root_signature: RootSignature,
    #[serde(rename = "segmentHashAlg")]
    pub segment_hash_alg: String,
    pub segments: Vec<Segment>,
    #[serde(rename = "segmentSizeDefault")]
    pub segment_size_default: u64,
    #[serde(rename = "encryptedSegmentSizeDefault")]
    pub encrypted_segment_size_default: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RootSignature {
    pub alg: String,
    pub sig: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Segment {
    pub hash: String,
    #[serde(rename = "segmentSize")]
    pub segment_size: u64,
    #[serde(rename = "encryptedSegmentSize")]
    pub encrypted_segment_size: u64,
}

impl Manifest {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Compact JSON, as written into the container
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST_JSON: &str = r#"{
        "tdf_spec_version": "4.3.0",
        "encryptionInformation": {
            "type": "split",
            "keyAccess": [{
                "type": "wrapped",
                "url": "http://localhost:8080",
                "protocol": "kas",
                "wrappedKey": "abc123",
                "policyBinding": {
                    "alg": "HS256",
                    "hash": "def456"
                },
                "kid": "r1",
                "sid": "6b3c7f1e-3a42-4a5e-9d4c-7b1f0c2d9e11",
                "schemaVersion": "1.0"
            }],
            "method": {
                "algorithm": "AES-256-GCM",
                "iv": "",
                "isStreamable": true
            },
            "integrityInformation": {
              "rootSignature": {
                "alg": "HS256",
                "sig": "M2E2MTI5YmMxMWU0ODIzZDA4YTdkNTY2MzdlNDM4OGRlZDE2MTFhZjU1YTY1YzBhYWNlMWVjYjlmODUzNmNiZQ=="
              },
              "segmentHashAlg": "GMAC",
              "segments": [
                  {
                      "hash": "NzhlZDg5OWMwZWVhZDBjMWEzZTQyYmFlODA0NjNlMDM=",
                      "segmentSize": 14056,
                      "encryptedSegmentSize": 14084
                    }
              ],
              "segmentSizeDefault": 14056,
              "encryptedSegmentSizeDefault": 14084
            },
            "policy": "base64policy"
        },
        "payload": {
            "type": "reference",
            "url": "0.payload",
            "protocol": "zip",
            "mimeType": "application/octet-stream",
            "isEncrypted": true
        }
    }"#;

    #[test]
    fn test_manifest_deserialization() {
        let manifest = Manifest::from_json(MANIFEST_JSON).unwrap();
        let kao = &manifest.encryption_information.key_access[0];
        assert_eq!(kao.policy_binding.alg, "HS256");
        assert_eq!(kao.kid, "r1");
        assert!(kao.encrypted_metadata.is_none());
        assert!(kao.ephemeral_public_key.is_none());
        assert!(manifest.assertions.is_empty());
        assert_eq!(
            manifest.encryption_information.integrity_information.segments[0].encrypted_segment_size,
            14084
        );
    }

    #[test]
    fn test_manifest_serialization_field_names() {
        let manifest = Manifest::from_json(MANIFEST_JSON).unwrap();
        let value: serde_json::Value = serde_json::from_str(&manifest.to_json().unwrap()).unwrap();

        assert_eq!(value["tdf_spec_version"], TDF_SPEC_VERSION);
        assert_eq!(value["encryptionInformation"]["keyAccess"][0]["schemaVersion"], "1.0");
        assert!(value["encryptionInformation"]["keyAccess"][0]
            .get("ephemeralPublicKey")
            .is_none());
        assert!(value.get("assertions").is_none());

        let back = Manifest::from_json(&manifest.to_json_pretty().unwrap()).unwrap();
        assert_eq!(back, manifest);
    }

    #[test]
    fn test_payload_defaults() {
        let payload = Payload::new(None);
        assert_eq!(payload.url, PAYLOAD_URL);
        assert_eq!(payload.mime_type.as_deref(), Some(DEFAULT_MIME_TYPE));
        assert!(payload.is_encrypted);

        let payload = Payload::new(Some("text/plain".into()));
        assert_eq!(payload.mime_type.as_deref(), Some("text/plain"));
    }

    #[test]
    fn test_key_access_type_names() {
        assert_eq!(KeyAccessType::Wrapped.to_string(), "wrapped");
        assert_eq!(KeyAccessType::EccWrapped.to_string(), "eccWrapped");
    }
}
