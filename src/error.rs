//! Unified error type for the TDF writer
//!
//! Each component keeps its own error enum for precise handling. The writer
//! surfaces all of them through [`WriterError`].
//!
//! # Example
//!
//! ```no_run
//! use opentdf_writer::{Writer, WriterConfig, WriterError};
//!
//! fn write_twice() -> Result<(), WriterError> {
//!     let writer = Writer::new(WriterConfig::default())?;
//!     writer.write_segment(0, b"data")?;
//!     match writer.write_segment(0, b"again") {
//!         Err(WriterError::DuplicateSegment(0)) => Ok(()),
//!         other => other.map(|_| ()),
//!     }
//! }
//! ```

use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T, E = WriterError> = std::result::Result<T, E>;

/// Unified error type for all writer operations
///
/// # Error Categories
///
/// - **Usage**: calls made in the wrong state or with bad arguments
/// - **Policy**: attribute, split and key access failures
/// - **Crypto**: AEAD, MAC, key wrapping and key format failures
/// - **Integrity**: internal consistency defects detected at finalize
/// - **Archive**: container framing failures
#[derive(Debug, Error)]
pub enum WriterError {
    #[error("writer has already been finalized")]
    AlreadyFinalized,

    #[error("invalid segment index {0}: must be >= 0")]
    InvalidSegmentIndex(i64),

    #[error("segment {0} has already been written")]
    DuplicateSegment(i64),

    #[error("invalid segment selection at index {index}: {reason}")]
    InvalidSegmentSelection { index: i64, reason: &'static str },

    #[error("segment {0} has an empty integrity hash")]
    EmptySegmentHash(i64),

    #[error("no splits provided: {0}")]
    NoSplitsProvided(String),

    #[error("no valid key access objects could be produced")]
    NoValidKeyAccessObjects,

    #[error("Crypto error: {0}")]
    Crypto(#[from] crate::crypto::CryptoError),

    #[error("failed to wrap split {split_id} for {url}: {source}")]
    KeyWrap {
        split_id: String,
        url: String,
        #[source]
        source: crate::kem::KemError,
    },

    #[error("Policy error: {0}")]
    Policy(#[from] crate::policy::PolicyError),

    #[error("Key split error: {0}")]
    Split(crate::keysplit::SplitError),

    #[error("Assertion error: {0}")]
    Assertion(#[from] crate::assertion::AssertionError),

    #[error("Archive error: {0}")]
    Archive(#[from] crate::archive::ArchiveError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<crate::keysplit::SplitError> for WriterError {
    fn from(err: crate::keysplit::SplitError) -> Self {
        use crate::keysplit::SplitError;
        match err {
            SplitError::NoDefaultKas => WriterError::NoSplitsProvided(err.to_string()),
            other => WriterError::Split(other),
        }
    }
}

impl From<crate::key_access::KeyAccessError> for WriterError {
    fn from(err: crate::key_access::KeyAccessError) -> Self {
        use crate::key_access::KeyAccessError;
        match err {
            KeyAccessError::NoSplitsProvided => WriterError::NoSplitsProvided(err.to_string()),
            KeyAccessError::NoValidKeyAccessObjects => WriterError::NoValidKeyAccessObjects,
            KeyAccessError::Wrap {
                split_id,
                url,
                source,
            } => WriterError::KeyWrap {
                split_id,
                url,
                source,
            },
            KeyAccessError::Crypto(e) => WriterError::Crypto(e),
        }
    }
}

impl WriterError {
    /// Writer failures are terminal for the current call; nothing is retried.
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Returns true for errors caused by calling the writer incorrectly
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::AlreadyFinalized
                | Self::InvalidSegmentIndex(_)
                | Self::DuplicateSegment(_)
                | Self::InvalidSegmentSelection { .. }
        )
    }

    /// Returns true if this is a policy or key distribution error
    pub fn is_policy_error(&self) -> bool {
        matches!(
            self,
            Self::NoSplitsProvided(_)
                | Self::NoValidKeyAccessObjects
                | Self::Policy(_)
                | Self::Split(_)
        )
    }

    /// Returns true if this is a cryptographic error
    pub fn is_crypto_error(&self) -> bool {
        matches!(self, Self::Crypto(_) | Self::KeyWrap { .. })
    }

    /// Returns a suggestion for resolving this error, if one exists
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::AlreadyFinalized => Some("Create a new Writer for another TDF"),
            Self::NoSplitsProvided(_) => {
                Some("Supply attribute values with grants or configure a default KAS")
            }
            Self::NoValidKeyAccessObjects => {
                Some("Ensure each KAS has a public key, either embedded in a grant or as the default KAS")
            }
            Self::Policy(e) => e.suggestion(),
            _ => None,
        }
    }

    /// Returns a stable error code for programmatic handling
    ///
    /// Codes follow the format `TDF_E_<CATEGORY>_<SPECIFIC>`.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AlreadyFinalized => "TDF_E_USAGE_FINALIZED",
            Self::InvalidSegmentIndex(_) => "TDF_E_USAGE_SEGMENT_INDEX",
            Self::DuplicateSegment(_) => "TDF_E_USAGE_SEGMENT_DUPLICATE",
            Self::InvalidSegmentSelection { .. } => "TDF_E_USAGE_SEGMENT_SELECTION",
            Self::EmptySegmentHash(_) => "TDF_E_INTEGRITY_SEGMENT_HASH",
            Self::NoSplitsProvided(_) => "TDF_E_POLICY_NO_SPLITS",
            Self::NoValidKeyAccessObjects => "TDF_E_POLICY_NO_KEY_ACCESS",
            Self::Crypto(_) => "TDF_E_CRYPTO",
            Self::KeyWrap { .. } => "TDF_E_CRYPTO_WRAP",
            Self::Policy(_) => "TDF_E_POLICY_ATTRIBUTE",
            Self::Split(_) => "TDF_E_POLICY_SPLIT",
            Self::Assertion(_) => "TDF_E_ASSERTION",
            Self::Archive(_) => "TDF_E_ARCHIVE",
            Self::Serialization(_) => "TDF_E_SERIALIZATION",
        }
    }
}
