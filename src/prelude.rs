//! Prelude
//!
//! ```rust
//! use opentdf_writer::prelude::*;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let region = AttributeValue::new("https://example.com/attr/Region/value/EU", AttributeRule::AnyOf)?
//!     .with_grant(Grant::uri_only("https://kas.eu/"));
//! let options = FinalizeOptions::new().attributes(vec![region]);
//! assert_eq!(options.attributes.len(), 1);
//! # Ok(())
//! # }
//! ```

pub use crate::archive::{ArchiveError, BufferedZipArchive, SegmentArchive, StreamingZipArchive};
pub use crate::assertion::{
    AppliesToState, Assertion, AssertionConfig, AssertionKey, AssertionType,
    AssertionVerificationKey, Scope, Statement,
};
pub use crate::config::{FinalizeOptions, WriterConfig};
pub use crate::crypto::{DataKey, IntegrityAlgorithm};
pub use crate::error::WriterError;
pub use crate::kem::{KeyEncapsulation, OaepHash};
pub use crate::keysplit::{Split, SplitResult, XorSplitter};
pub use crate::manifest::{KeyAccess, Manifest};
pub use crate::policy::{
    AttributeDefinition, AttributeRule, AttributeValue, Grant, KasPublicKey, KeyAlgorithm,
    Namespace, PolicyObject,
};
pub use crate::writer::{FinalizeResult, SegmentResult, Writer};
