//! TDF writer
//!
//! The writer owns the data encryption key and a sparse table of sealed
//! segments. Segments may arrive in any order and from several threads;
//! each call is serialized by one internal lock. Key splitting, policy
//! binding and assertion signing are deferred to [`Writer::finalize`], which
//! runs once.
//!
//! # Example
//!
//! ```no_run
//! use opentdf_writer::{FinalizeOptions, Writer, WriterConfig};
//! use opentdf_writer::policy::{Grant, KasPublicKey, KeyAlgorithm};
//!
//! # fn example(kas_pem: &str) -> Result<(), opentdf_writer::WriterError> {
//! let kas = KasPublicKey::new("https://kas.example.com", KeyAlgorithm::Rsa2048, "r1", kas_pem);
//! let writer = Writer::new(WriterConfig::new().default_kas(Grant::with_key(kas)))?;
//!
//! let mut container = writer.write_segment(0, b"Hello, ")?.data;
//! container.extend(writer.write_segment(1, b"World!")?.data);
//! container.extend(writer.finalize(FinalizeOptions::new())?.data);
//! # Ok(())
//! # }
//! ```

use crate::archive::{SegmentArchive, StreamingZipArchive};
use crate::assertion::{build_signed_assertions, system_metadata_assertion_config};
use crate::config::{FinalizeOptions, WriterConfig};
use crate::crypto::{calculate_root_signature, segment_hash, CryptoError, DataKey, SegmentCipher};
use crate::error::{Result, WriterError};
use crate::key_access::build_key_access_objects;
use crate::keysplit::XorSplitter;
use crate::manifest::{
    EncryptionInformation, EncryptionMethod, IntegrityInformation, Manifest, Payload, RootSignature,
    Segment, TDF_SPEC_VERSION,
};
use crate::policy::PolicyObject;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

/// Output of one [`Writer::write_segment`] call
#[derive(Debug, Clone)]
pub struct SegmentResult {
    /// Container bytes to emit for this segment
    pub data: Vec<u8>,
    pub index: i64,
    /// Base64 integrity hash of the sealed segment
    pub hash: String,
    pub plaintext_size: u64,
    pub encrypted_size: u64,
    /// IEEE CRC-32 of the plaintext
    pub crc32: u32,
}

/// Output of [`Writer::finalize`]
#[derive(Debug, Clone)]
pub struct FinalizeResult {
    /// Trailing container bytes (manifest and directory)
    pub data: Vec<u8>,
    pub manifest: Manifest,
    pub total_segments: usize,
    pub total_size: u64,
    pub encrypted_size: u64,
}

#[derive(Debug, Clone)]
struct SegmentRecord {
    hash: String,
    size: u64,
    encrypted_size: u64,
}

struct WriterState {
    segments: BTreeMap<i64, SegmentRecord>,
    archive: Box<dyn SegmentArchive>,
    /// Set once finalize succeeds
    manifest: Option<Manifest>,
}

struct BuiltManifest {
    manifest: Manifest,
    order: Vec<i64>,
    total_size: u64,
    encrypted_size: u64,
}

pub struct Writer {
    config: WriterConfig,
    dek: DataKey,
    cipher: SegmentCipher,
    state: Mutex<WriterState>,
}

impl std::fmt::Debug for Writer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Writer")
            .field("config", &self.config)
            .field("segments", &state.segments.len())
            .field("finalized", &state.manifest.is_some())
            .finish()
    }
}

impl Writer {
    /// Create a writer with a fresh data encryption key and streaming ZIP framing
    pub fn new(config: WriterConfig) -> Result<Self> {
        Self::with_archive(config, StreamingZipArchive::new())
    }

    /// Create a writer that frames segments with a custom archive
    pub fn with_archive(config: WriterConfig, archive: impl SegmentArchive + 'static) -> Result<Self> {
        let dek = DataKey::generate();
        let cipher = SegmentCipher::new(&dek)?;
        Ok(Writer {
            config,
            dek,
            cipher,
            state: Mutex::new(WriterState {
                segments: BTreeMap::new(),
                archive: Box::new(archive),
                manifest: None,
            }),
        })
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    pub fn is_finalized(&self) -> bool {
        self.state.lock().manifest.is_some()
    }

    pub fn segment_count(&self) -> usize {
        self.state.lock().segments.len()
    }

    /// Encrypt and record one segment
    ///
    /// Indices need not be contiguous or ordered, but each may be written
    /// only once.
    pub fn write_segment(&self, index: i64, data: &[u8]) -> Result<SegmentResult> {
        let mut state = self.state.lock();
        if state.manifest.is_some() {
            return Err(WriterError::AlreadyFinalized);
        }
        if index < 0 {
            return Err(WriterError::InvalidSegmentIndex(index));
        }
        if state.segments.contains_key(&index) {
            return Err(WriterError::DuplicateSegment(index));
        }

        let crc32 = crc32fast::hash(data);
        let sealed = self.cipher.encrypt(data)?;
        let hash = segment_hash(&sealed, &self.dek, self.config.segment_integrity_algorithm)?;
        let framed = state.archive.write_segment(index, &sealed)?;

        let record = SegmentRecord {
            hash: hash.clone(),
            size: data.len() as u64,
            encrypted_size: sealed.len() as u64,
        };
        state.segments.insert(index, record);

        debug!(
            index,
            plaintext_size = data.len(),
            encrypted_size = sealed.len(),
            "wrote segment"
        );

        Ok(SegmentResult {
            data: framed,
            index,
            hash,
            plaintext_size: data.len() as u64,
            encrypted_size: sealed.len() as u64,
            crc32,
        })
    }

    /// Build the manifest and the trailing container bytes
    ///
    /// Legal once. On failure nothing is recorded and finalize may be retried.
    pub fn finalize(&self, options: FinalizeOptions) -> Result<FinalizeResult> {
        let mut state = self.state.lock();
        if state.manifest.is_some() {
            return Err(WriterError::AlreadyFinalized);
        }

        let built = self.build_manifest(&state.segments, &options)?;
        let manifest_json = serde_json::to_vec(&built.manifest)?;
        let data = state.archive.finalize(&manifest_json, &built.order)?;
        state.archive.close();
        state.manifest = Some(built.manifest.clone());

        debug!(
            segments = built.order.len(),
            total_size = built.total_size,
            encrypted_size = built.encrypted_size,
            key_access_objects = built.manifest.encryption_information.key_access.len(),
            assertions = built.manifest.assertions.len(),
            "finalized TDF"
        );

        Ok(FinalizeResult {
            data,
            total_segments: built.order.len(),
            total_size: built.total_size,
            encrypted_size: built.encrypted_size,
            manifest: built.manifest,
        })
    }

    /// The finalized manifest, or a stub built from the current state
    ///
    /// A stub is informational only: it reflects the segments written so far
    /// and fresh key splits, and must never be used for verification.
    pub fn get_manifest(&self, options: &FinalizeOptions) -> Result<Manifest> {
        let state = self.state.lock();
        if let Some(manifest) = &state.manifest {
            return Ok(manifest.clone());
        }
        warn!(
            segments = state.segments.len(),
            "get_manifest called before finalize; returning an incomplete stub manifest"
        );
        Ok(self.build_manifest(&state.segments, options)?.manifest)
    }

    fn build_manifest(
        &self,
        segments: &BTreeMap<i64, SegmentRecord>,
        options: &FinalizeOptions,
    ) -> Result<BuiltManifest> {
        let order = resolve_order(segments, options.keep_segments.as_deref())?;

        let attributes = options.effective_attributes(&self.config);
        let split_result = XorSplitter::new()
            .with_default_kas(options.effective_default_kas(&self.config).cloned())
            .generate_splits(attributes, self.dek.as_slice())?;
        let policy = PolicyObject::from_values(attributes).to_base64()?;

        let mut manifest_segments = Vec::with_capacity(order.len());
        let mut aggregate_hash = Vec::new();
        let mut total_size = 0u64;
        let mut encrypted_size = 0u64;
        for &index in &order {
            let record = segments
                .get(&index)
                .ok_or(WriterError::InvalidSegmentSelection {
                    index,
                    reason: "segment was not written",
                })?;
            if record.hash.is_empty() {
                return Err(WriterError::EmptySegmentHash(index));
            }
            aggregate_hash.extend(BASE64.decode(&record.hash).map_err(CryptoError::from)?);
            total_size += record.size;
            encrypted_size += record.encrypted_size;
            manifest_segments.push(Segment {
                hash: record.hash.clone(),
                segment_size: record.size,
                encrypted_segment_size: record.encrypted_size,
            });
        }

        let root_signature =
            calculate_root_signature(&aggregate_hash, &self.dek, self.config.integrity_algorithm)?;
        let key_access = build_key_access_objects(
            &split_result,
            &policy,
            options.encrypted_metadata.as_deref(),
        )?;

        let mut assertion_configs = options.assertions.clone();
        if options.system_metadata_assertion {
            assertion_configs.push(system_metadata_assertion_config()?);
        }
        let assertions = build_signed_assertions(&assertion_configs, &aggregate_hash, &self.dek)?;

        let (segment_size_default, encrypted_segment_size_default) = segments
            .get(&0)
            .map(|first| (first.size, first.encrypted_size))
            .unwrap_or((0, 0));

        let manifest = Manifest {
            tdf_spec_version: TDF_SPEC_VERSION.to_string(),
            payload: Payload::new(options.payload_mime_type.clone()),
            encryption_information: EncryptionInformation {
                encryption_type: "split".to_string(),
                key_access,
                method: EncryptionMethod::default(),
                integrity_information: IntegrityInformation {
                    root_signature: RootSignature {
                        alg: self.config.integrity_algorithm.to_string(),
                        sig: root_signature,
                    },
                    segment_hash_alg: self.config.segment_integrity_algorithm.to_string(),
                    segments: manifest_segments,
                    segment_size_default,
                    encrypted_segment_size_default,
                },
                policy,
            },
            assertions,
        };

        Ok(BuiltManifest {
            manifest,
            order,
            total_size,
            encrypted_size,
        })
    }
}

/// All written indices ascending, or the validated caller subset
fn resolve_order(segments: &BTreeMap<i64, SegmentRecord>, keep: Option<&[i64]>) -> Result<Vec<i64>> {
    let Some(keep) = keep else {
        return Ok(segments.keys().copied().collect());
    };

    let mut seen = HashSet::with_capacity(keep.len());
    for &index in keep {
        if index < 0 {
            return Err(WriterError::InvalidSegmentSelection {
                index,
                reason: "index must be >= 0",
            });
        }
        if !segments.contains_key(&index) {
            return Err(WriterError::InvalidSegmentSelection {
                index,
                reason: "segment was not written",
            });
        }
        if !seen.insert(index) {
            return Err(WriterError::InvalidSegmentSelection {
                index,
                reason: "duplicate index",
            });
        }
    }
    Ok(keep.to_vec())
}
