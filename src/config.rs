//! Writer configuration
//!
//! [`WriterConfig`] is fixed when the writer is created. [`FinalizeOptions`]
//! is supplied once at finalize; its policy fields replace the construction
//! defaults only when set.

use crate::assertion::AssertionConfig;
use crate::crypto::IntegrityAlgorithm;
use crate::policy::{AttributeValue, Grant};

/// Construction time settings
#[derive(Debug, Clone, Default)]
pub struct WriterConfig {
    /// Algorithm of the root signature
    pub integrity_algorithm: IntegrityAlgorithm,
    /// Algorithm of each segment hash
    pub segment_integrity_algorithm: IntegrityAlgorithm,
    /// Default policy, used when finalize supplies no attributes
    pub initial_attributes: Vec<AttributeValue>,
    /// Default custodian, used when finalize supplies none
    pub default_kas: Option<Grant>,
}

impl WriterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn integrity_algorithm(mut self, algorithm: IntegrityAlgorithm) -> Self {
        self.integrity_algorithm = algorithm;
        self
    }

    #[must_use]
    pub fn segment_integrity_algorithm(mut self, algorithm: IntegrityAlgorithm) -> Self {
        self.segment_integrity_algorithm = algorithm;
        self
    }

    #[must_use]
    pub fn attributes(mut self, attributes: Vec<AttributeValue>) -> Self {
        self.initial_attributes = attributes;
        self
    }

    #[must_use]
    pub fn default_kas(mut self, kas: Grant) -> Self {
        self.default_kas = Some(kas);
        self
    }
}

/// Finalize time settings
#[derive(Debug, Clone, Default)]
pub struct FinalizeOptions {
    pub attributes: Vec<AttributeValue>,
    pub default_kas: Option<Grant>,
    /// Plaintext metadata, encrypted under each split for its custodians
    pub encrypted_metadata: Option<String>,
    pub payload_mime_type: Option<String>,
    pub assertions: Vec<AssertionConfig>,
    /// Explicit segment order; all written segments in index order when unset
    pub keep_segments: Option<Vec<i64>>,
    /// Append the `system-metadata` assertion
    pub system_metadata_assertion: bool,
}

impl FinalizeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn attributes(mut self, attributes: Vec<AttributeValue>) -> Self {
        self.attributes = attributes;
        self
    }

    #[must_use]
    pub fn default_kas(mut self, kas: Grant) -> Self {
        self.default_kas = Some(kas);
        self
    }

    #[must_use]
    pub fn encrypted_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.encrypted_metadata = Some(metadata.into());
        self
    }

    #[must_use]
    pub fn payload_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.payload_mime_type = Some(mime_type.into());
        self
    }

    #[must_use]
    pub fn assertion(mut self, assertion: AssertionConfig) -> Self {
        self.assertions.push(assertion);
        self
    }

    #[must_use]
    pub fn keep_segments(mut self, indices: Vec<i64>) -> Self {
        self.keep_segments = Some(indices);
        self
    }

    #[must_use]
    pub fn system_metadata_assertion(mut self, enabled: bool) -> Self {
        self.system_metadata_assertion = enabled;
        self
    }

    pub(crate) fn effective_attributes<'a>(&'a self, config: &'a WriterConfig) -> &'a [AttributeValue] {
        if self.attributes.is_empty() {
            &config.initial_attributes
        } else {
            &self.attributes
        }
    }

    pub(crate) fn effective_default_kas<'a>(&'a self, config: &'a WriterConfig) -> Option<&'a Grant> {
        self.default_kas.as_ref().or(config.default_kas.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::AttributeRule;

    #[test]
    fn test_finalize_overrides_only_when_set() {
        let initial = AttributeValue::new("https://example.com/attr/A/value/1", AttributeRule::AllOf).unwrap();
        let config = WriterConfig::new()
            .attributes(vec![initial.clone()])
            .default_kas(Grant::uri_only("https://kas.default/"));

        let options = FinalizeOptions::new();
        assert_eq!(options.effective_attributes(&config), &[initial]);
        assert_eq!(options.effective_default_kas(&config).unwrap().uri, "https://kas.default/");

        let override_value =
            AttributeValue::new("https://example.com/attr/B/value/2", AttributeRule::AnyOf).unwrap();
        let options = FinalizeOptions::new()
            .attributes(vec![override_value.clone()])
            .default_kas(Grant::uri_only("https://kas.override/"));
        assert_eq!(options.effective_attributes(&config), &[override_value]);
        assert_eq!(options.effective_default_kas(&config).unwrap().uri, "https://kas.override/");
    }

    #[test]
    fn test_defaults() {
        let config = WriterConfig::default();
        assert_eq!(config.integrity_algorithm, IntegrityAlgorithm::Hs256);
        assert_eq!(config.segment_integrity_algorithm, IntegrityAlgorithm::Hs256);

        let options = FinalizeOptions::default();
        assert!(options.keep_segments.is_none());
        assert!(!options.system_metadata_assertion);
    }
}
