//! Attribute policy model
//!
//! Attribute values arrive already resolved by the caller: each value carries
//! its definition (rule, ordered values, grants) and the key access servers
//! that may hold a split for it. This module also owns FQN validation and the
//! policy document embedded in the manifest.
//!
//! FQNs follow the format `<scheme>://<authority>[/path]/attr/<name>/value/<value>`.
//!
//! # Example
//!
//! ```
//! use opentdf_writer::policy::{AttributeRule, AttributeValue, Grant};
//!
//! let value = AttributeValue::new("https://example.com/attr/Region/value/EU", AttributeRule::AnyOf)?
//!     .with_grant(Grant::uri_only("https://kas.eu/"));
//! assert_eq!(value.definition.fqn, "https://example.com/attr/Region");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("invalid attribute FQN: {0}")]
    InvalidFqn(#[from] FqnError),

    #[error("unsupported key algorithm: {0}")]
    UnsupportedKeyAlgorithm(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PolicyError {
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            PolicyError::InvalidFqn(_) => {
                Some("FQN must follow format: https://<namespace>/attr/<name>/value/<value>")
            }
            PolicyError::UnsupportedKeyAlgorithm(_) => {
                Some("Use one of rsa:2048, rsa:4096 or ec:secp256r1")
            }
            PolicyError::Serialization(_) => None,
        }
    }
}

/// FQN validation errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FqnError {
    #[error("FQN is empty")]
    Empty,

    #[error("invalid FQN format: {0}")]
    InvalidFormat(String),

    #[error("FQN has empty components: {0}")]
    EmptyComponents(String),

    #[error("invalid attribute name encoding: {0}")]
    InvalidNameEncoding(String),

    #[error("invalid attribute value encoding: {0}")]
    InvalidValueEncoding(String),
}

/// A validated attribute value FQN
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeFqn {
    raw: String,
    definition_end: usize,
    authority: String,
    name: String,
    value: String,
}

impl AttributeFqn {
    /// Parse and validate a value FQN
    ///
    /// Both `https` and `http` schemes are accepted. Name and value are
    /// percent-decoded; malformed escapes are rejected.
    pub fn parse(fqn: &str) -> Result<Self, FqnError> {
        if fqn.is_empty() {
            return Err(FqnError::Empty);
        }
        let invalid = || FqnError::InvalidFormat(fqn.to_string());

        let rest = fqn
            .strip_prefix("https://")
            .or_else(|| fqn.strip_prefix("http://"))
            .ok_or_else(invalid)?;
        let slash = rest.find('/').ok_or_else(invalid)?;
        let (authority, path) = rest.split_at(slash);
        if authority.is_empty() {
            return Err(invalid());
        }

        let attr_at = path.rfind("/attr/").ok_or_else(invalid)?;
        let tail = &path[attr_at + "/attr/".len()..];
        let (raw_name, raw_value) = tail.split_once("/value/").ok_or_else(invalid)?;
        if raw_name.contains('/') || raw_value.contains('/') {
            return Err(invalid());
        }
        if raw_name.is_empty() || raw_value.is_empty() {
            return Err(FqnError::EmptyComponents(fqn.to_string()));
        }

        let name =
            percent_decode(raw_name).ok_or_else(|| FqnError::InvalidNameEncoding(fqn.to_string()))?;
        let value = percent_decode(raw_value)
            .ok_or_else(|| FqnError::InvalidValueEncoding(fqn.to_string()))?;

        let definition_end = fqn.len() - path.len() + attr_at + "/attr/".len() + raw_name.len();

        Ok(Self {
            raw: fqn.to_string(),
            definition_end,
            authority: authority.to_lowercase(),
            name,
            value,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Authority (host and optional port), lowercased
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Decoded attribute name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Decoded attribute value
    pub fn value(&self) -> &str {
        &self.value
    }

    /// FQN of the attribute definition this value belongs to
    pub fn definition_fqn(&self) -> &str {
        &self.raw[..self.definition_end]
    }
}

impl std::fmt::Display for AttributeFqn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for AttributeFqn {
    type Err = FqnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Validate an attribute value FQN without keeping the parsed form
pub fn validate_attribute_fqn(fqn: &str) -> Result<(), FqnError> {
    AttributeFqn::parse(fqn).map(|_| ())
}

/// Decode `%XX` escapes; `None` on a malformed escape or non UTF-8 output
pub(crate) fn percent_decode(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3)?;
            if !hex.iter().all(u8::is_ascii_hexdigit) {
                return None;
            }
            let hex = std::str::from_utf8(hex).ok()?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// Access rule attached to an attribute definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AttributeRule {
    /// Every value's custodians must cooperate
    AllOf,
    /// Any one custodian suffices
    AnyOf,
    /// Ordered values; the highest supplied value governs
    Hierarchy,
    /// Treated as `AllOf`
    #[default]
    Unspecified,
}

impl AttributeRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeRule::AllOf => "allOf",
            AttributeRule::AnyOf => "anyOf",
            AttributeRule::Hierarchy => "hierarchy",
            AttributeRule::Unspecified => "unspecified",
        }
    }
}

impl std::fmt::Display for AttributeRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Public key algorithm of a key access server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAlgorithm {
    Rsa2048,
    Rsa4096,
    EcSecp256r1,
}

impl KeyAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyAlgorithm::Rsa2048 => "rsa:2048",
            KeyAlgorithm::Rsa4096 => "rsa:4096",
            KeyAlgorithm::EcSecp256r1 => "ec:secp256r1",
        }
    }

    pub fn is_ec(&self) -> bool {
        matches!(self, KeyAlgorithm::EcSecp256r1)
    }
}

impl std::fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for KeyAlgorithm {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rsa:2048" => Ok(KeyAlgorithm::Rsa2048),
            "rsa:4096" => Ok(KeyAlgorithm::Rsa4096),
            "ec:secp256r1" => Ok(KeyAlgorithm::EcSecp256r1),
            _ => Err(PolicyError::UnsupportedKeyAlgorithm(s.to_string())),
        }
    }
}

/// A key access server public key, already fetched by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KasPublicKey {
    pub url: String,
    pub algorithm: KeyAlgorithm,
    pub kid: String,
    pub pem: String,
}

impl KasPublicKey {
    pub fn new(
        url: impl Into<String>,
        algorithm: KeyAlgorithm,
        kid: impl Into<String>,
        pem: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            algorithm,
            kid: kid.into(),
            pem: pem.into(),
        }
    }
}

/// Assignment of a key access server to a value, definition or namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub uri: String,
    pub public_key: Option<KasPublicKey>,
}

impl Grant {
    /// Grant that names the server only; its key must come from the default KAS
    pub fn uri_only(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            public_key: None,
        }
    }

    /// Grant with an embedded public key
    pub fn with_key(key: KasPublicKey) -> Self {
        Self {
            uri: key.url.clone(),
            public_key: Some(key),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Namespace {
    pub fqn: String,
    pub grants: Vec<Grant>,
}

/// Attribute definition: rule, ordered values and definition-level grants
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDefinition {
    pub fqn: String,
    pub rule: AttributeRule,
    /// Value FQNs in rank order; for a hierarchy the first is the highest
    pub values: Vec<String>,
    pub grants: Vec<Grant>,
    pub namespace: Option<Namespace>,
}

impl AttributeDefinition {
    pub fn new(fqn: impl Into<String>, rule: AttributeRule) -> Self {
        Self {
            fqn: fqn.into(),
            rule,
            values: Vec::new(),
            grants: Vec::new(),
            namespace: None,
        }
    }

    #[must_use]
    pub fn with_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.values = values.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_grant(mut self, grant: Grant) -> Self {
        self.grants.push(grant);
        self
    }

    #[must_use]
    pub fn with_namespace(mut self, namespace: Namespace) -> Self {
        self.namespace = Some(namespace);
        self
    }

    /// Rank of a value FQN in the definition's order (0 is highest)
    pub fn rank_of(&self, value_fqn: &str) -> Option<usize> {
        self.values
            .iter()
            .position(|v| v.eq_ignore_ascii_case(value_fqn))
    }

    /// Definition name decoded from the FQN, or the raw FQN when it has no `/attr/`
    pub fn name(&self) -> &str {
        self.fqn
            .rsplit_once("/attr/")
            .map(|(_, name)| name)
            .unwrap_or(&self.fqn)
    }
}

/// A policy attribute value with its resolved definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeValue {
    pub fqn: String,
    pub grants: Vec<Grant>,
    pub definition: AttributeDefinition,
}

impl AttributeValue {
    /// Validate `fqn` and attach a definition derived from it
    pub fn new(fqn: &str, rule: AttributeRule) -> Result<Self, PolicyError> {
        let parsed = AttributeFqn::parse(fqn)?;
        let definition = AttributeDefinition::new(parsed.definition_fqn(), rule);
        Ok(Self {
            fqn: fqn.to_string(),
            grants: Vec::new(),
            definition,
        })
    }

    /// Validate `fqn` and attach an explicit definition
    pub fn with_definition(fqn: &str, definition: AttributeDefinition) -> Result<Self, PolicyError> {
        validate_attribute_fqn(fqn)?;
        Ok(Self {
            fqn: fqn.to_string(),
            grants: Vec::new(),
            definition,
        })
    }

    #[must_use]
    pub fn with_grant(mut self, grant: Grant) -> Self {
        self.grants.push(grant);
        self
    }

    /// Decoded value segment of the FQN
    pub fn value_name(&self) -> String {
        AttributeFqn::parse(&self.fqn)
            .map(|f| f.value().to_string())
            .unwrap_or_else(|_| self.fqn.clone())
    }

    /// Most specific non-empty grant list: value, then definition, then namespace
    pub fn effective_grants(&self) -> &[Grant] {
        if !self.grants.is_empty() {
            return &self.grants;
        }
        if !self.definition.grants.is_empty() {
            return &self.definition.grants;
        }
        match &self.definition.namespace {
            Some(ns) => ns.grants.as_slice(),
            None => &[],
        }
    }
}

/// Policy document embedded (base64) in the manifest
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyObject {
    pub uuid: String,
    pub body: PolicyBody,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyBody {
    #[serde(rename = "dataAttributes")]
    pub data_attributes: Vec<PolicyAttribute>,
    pub dissem: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyAttribute {
    pub attribute: String,
}

impl PolicyObject {
    /// Build a policy with a fresh UUID from the given attribute values
    pub fn from_values(values: &[AttributeValue]) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            body: PolicyBody {
                data_attributes: values
                    .iter()
                    .map(|v| PolicyAttribute {
                        attribute: v.fqn.clone(),
                    })
                    .collect(),
                dissem: Vec::new(),
            },
        }
    }

    pub fn to_json(&self) -> Result<String, PolicyError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Base64 of the JSON document, as stored in the manifest
    pub fn to_base64(&self) -> Result<String, PolicyError> {
        Ok(BASE64.encode(self.to_json()?))
    }
}
