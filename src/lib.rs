//! Streaming TDF creation
//!
//! Encrypts payload segments as they arrive, splits the data key across key
//! access servers according to an attribute policy, and signs assertions
//! bound to the payload. See [`Writer`] for the entry point.

pub mod archive;
pub mod assertion;
pub mod config;
pub mod crypto;
pub mod error;
pub mod kem;
pub mod key_access;
pub mod keysplit;
pub mod manifest;
pub mod policy;
pub mod prelude;
pub mod writer;

pub use archive::{ArchiveError, BufferedZipArchive, SegmentArchive, StreamingZipArchive};
pub use assertion::{Assertion, AssertionConfig, AssertionKey, AssertionVerificationKey};
pub use config::{FinalizeOptions, WriterConfig};
pub use crypto::{DataKey, IntegrityAlgorithm};
pub use error::{Result, WriterError};
pub use manifest::Manifest;
pub use policy::{AttributeDefinition, AttributeRule, AttributeValue, Grant, KasPublicKey, KeyAlgorithm};
pub use writer::{FinalizeResult, SegmentResult, Writer};
