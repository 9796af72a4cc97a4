//! Container framing for encrypted segments
//!
//! The writer hands every sealed segment to a [`SegmentArchive`] as soon as it
//! is encrypted and gets back the bytes to emit for it. At finalize the
//! archive receives the manifest and the final segment order and returns the
//! trailing bytes. Emitting every segment's framed bytes in finalize order and
//! then the trailing bytes yields the complete container.

use crate::manifest::{MANIFEST_FILE_NAME, PAYLOAD_URL};
use chrono::{Datelike, Timelike, Utc};
use crc32fast::Hasher;
use std::collections::BTreeMap;
use std::io::{self, Cursor, Write};
use thiserror::Error;
use tracing::debug;
use zip::write::FileOptions;
use zip::ZipWriter;

const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x0403_4b50;
const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x0807_4b50;
const CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0201_4b50;
const END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0605_4b50;
const ZIP_VERSION: u16 = 20;
const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;
const METHOD_STORED: u16 = 0;
const LOCAL_FILE_HEADER_LEN: u64 = 30;
const DATA_DESCRIPTOR_LEN: u64 = 16;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive has already been finalized")]
    Finalized,

    #[error("archive has been closed")]
    Closed,

    #[error("segment {0} was never written to the archive")]
    MissingSegment(i64),

    #[error("segment {0} was already written to the archive")]
    DuplicateSegment(i64),

    #[error("payload must start with segment 0, found {0:?}")]
    PayloadStart(Option<i64>),

    #[error("archive exceeds 32-bit ZIP limits; ZIP64 is not supported")]
    Zip64Required,

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Framing contract between the writer and the container format
pub trait SegmentArchive: Send {
    /// Frame one sealed segment; the returned bytes are emitted for it
    fn write_segment(&mut self, index: i64, data: &[u8]) -> Result<Vec<u8>, ArchiveError>;

    /// Trailing bytes for the manifest and directory, given the final order
    fn finalize(&mut self, manifest: &[u8], order: &[i64]) -> Result<Vec<u8>, ArchiveError>;

    /// Release any buffered state
    fn close(&mut self);
}

#[derive(Debug, Clone, Copy)]
struct SegmentEntry {
    crc: u32,
    len: u64,
}

#[derive(Debug, Clone, Copy)]
struct DosDateTime {
    time: u16,
    date: u16,
}

impl DosDateTime {
    fn now() -> Self {
        let now = Utc::now();
        let year = now.year().clamp(1980, 2107) as u16;
        DosDateTime {
            time: ((now.hour() as u16) << 11) | ((now.minute() as u16) << 5) | (now.second() as u16 / 2),
            date: ((year - 1980) << 9) | ((now.month() as u16) << 5) | now.day() as u16,
        }
    }
}

struct CentralEntry<'a> {
    name: &'a str,
    flags: u16,
    crc: u32,
    size: u32,
    offset: u32,
}

/// Streaming ZIP framing with a single stored `0.payload` entry
///
/// Segment 0 carries the payload's local header (data descriptor flag set,
/// sizes deferred). Every other segment is framed as its raw bytes, so
/// segments can be emitted as soon as they are sealed. The payload CRC-32 is
/// combined from per-segment CRCs at finalize.
///
/// ZIP64 is not written, so the payload is limited to `u32::MAX` bytes. A
/// segment that would take the written total past that limit is rejected with
/// [`ArchiveError::Zip64Required`] when it is written, not at finalize.
pub struct StreamingZipArchive {
    segments: BTreeMap<i64, SegmentEntry>,
    written: u64,
    payload_limit: u64,
    modified: DosDateTime,
    finalized: bool,
    closed: bool,
}

impl Default for StreamingZipArchive {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingZipArchive {
    pub fn new() -> Self {
        StreamingZipArchive {
            segments: BTreeMap::new(),
            written: 0,
            payload_limit: u64::from(u32::MAX),
            modified: DosDateTime::now(),
            finalized: false,
            closed: false,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_payload_limit(payload_limit: u64) -> Self {
        StreamingZipArchive {
            payload_limit,
            ..Self::new()
        }
    }

    fn check_open(&self) -> Result<(), ArchiveError> {
        if self.closed {
            return Err(ArchiveError::Closed);
        }
        if self.finalized {
            return Err(ArchiveError::Finalized);
        }
        Ok(())
    }

    fn local_header(&self, out: &mut Vec<u8>, name: &str, flags: u16, crc: u32, size: u32) {
        put_u32(out, LOCAL_FILE_HEADER_SIGNATURE);
        put_u16(out, ZIP_VERSION);
        put_u16(out, flags);
        put_u16(out, METHOD_STORED);
        put_u16(out, self.modified.time);
        put_u16(out, self.modified.date);
        put_u32(out, crc);
        put_u32(out, size);
        put_u32(out, size);
        put_u16(out, name.len() as u16);
        put_u16(out, 0);
        out.extend_from_slice(name.as_bytes());
    }

    fn central_header(&self, out: &mut Vec<u8>, entry: &CentralEntry<'_>) {
        put_u32(out, CENTRAL_DIRECTORY_SIGNATURE);
        put_u16(out, ZIP_VERSION);
        put_u16(out, ZIP_VERSION);
        put_u16(out, entry.flags);
        put_u16(out, METHOD_STORED);
        put_u16(out, self.modified.time);
        put_u16(out, self.modified.date);
        put_u32(out, entry.crc);
        put_u32(out, entry.size);
        put_u32(out, entry.size);
        put_u16(out, entry.name.len() as u16);
        put_u16(out, 0);
        put_u16(out, 0);
        put_u16(out, 0);
        put_u16(out, 0);
        put_u32(out, 0);
        put_u32(out, entry.offset);
        out.extend_from_slice(entry.name.as_bytes());
    }
}

impl SegmentArchive for StreamingZipArchive {
    fn write_segment(&mut self, index: i64, data: &[u8]) -> Result<Vec<u8>, ArchiveError> {
        self.check_open()?;
        if self.segments.contains_key(&index) {
            return Err(ArchiveError::DuplicateSegment(index));
        }
        let written = self.written + data.len() as u64;
        if written > self.payload_limit {
            return Err(ArchiveError::Zip64Required);
        }

        let mut framed = Vec::with_capacity(data.len() + LOCAL_FILE_HEADER_LEN as usize + PAYLOAD_URL.len());
        if index == 0 {
            self.local_header(&mut framed, PAYLOAD_URL, FLAG_DATA_DESCRIPTOR, 0, 0);
        }
        framed.extend_from_slice(data);

        self.segments.insert(
            index,
            SegmentEntry {
                crc: crc32fast::hash(data),
                len: data.len() as u64,
            },
        );
        self.written = written;
        Ok(framed)
    }

    fn finalize(&mut self, manifest: &[u8], order: &[i64]) -> Result<Vec<u8>, ArchiveError> {
        self.check_open()?;
        if order.first() != Some(&0) {
            return Err(ArchiveError::PayloadStart(order.first().copied()));
        }

        let mut payload_crc = Hasher::new();
        let mut payload_len = 0u64;
        for index in order {
            let entry = self
                .segments
                .get(index)
                .ok_or(ArchiveError::MissingSegment(*index))?;
            payload_crc.combine(&Hasher::new_with_initial_len(entry.crc, entry.len));
            payload_len += entry.len;
        }
        let payload_crc = payload_crc.finalize();

        let payload_header_len = LOCAL_FILE_HEADER_LEN + PAYLOAD_URL.len() as u64;
        let manifest_offset = payload_header_len + payload_len + DATA_DESCRIPTOR_LEN;
        let directory_offset =
            manifest_offset + LOCAL_FILE_HEADER_LEN + MANIFEST_FILE_NAME.len() as u64 + manifest.len() as u64;
        let payload_size = to_u32(payload_len)?;
        let manifest_size = to_u32(manifest.len() as u64)?;
        let manifest_offset = to_u32(manifest_offset)?;
        let directory_offset = to_u32(directory_offset)?;
        let manifest_crc = crc32fast::hash(manifest);

        let mut out = Vec::with_capacity(manifest.len() + 256);
        put_u32(&mut out, DATA_DESCRIPTOR_SIGNATURE);
        put_u32(&mut out, payload_crc);
        put_u32(&mut out, payload_size);
        put_u32(&mut out, payload_size);

        self.local_header(&mut out, MANIFEST_FILE_NAME, 0, manifest_crc, manifest_size);
        out.extend_from_slice(manifest);

        let directory_start = out.len();
        self.central_header(
            &mut out,
            &CentralEntry {
                name: PAYLOAD_URL,
                flags: FLAG_DATA_DESCRIPTOR,
                crc: payload_crc,
                size: payload_size,
                offset: 0,
            },
        );
        self.central_header(
            &mut out,
            &CentralEntry {
                name: MANIFEST_FILE_NAME,
                flags: 0,
                crc: manifest_crc,
                size: manifest_size,
                offset: manifest_offset,
            },
        );
        let directory_len = to_u32((out.len() - directory_start) as u64)?;

        put_u32(&mut out, END_OF_CENTRAL_DIRECTORY_SIGNATURE);
        put_u16(&mut out, 0);
        put_u16(&mut out, 0);
        put_u16(&mut out, 2);
        put_u16(&mut out, 2);
        put_u32(&mut out, directory_len);
        put_u32(&mut out, directory_offset);
        put_u16(&mut out, 0);

        self.finalized = true;
        debug!(
            segments = order.len(),
            payload_bytes = payload_len,
            manifest_bytes = manifest.len(),
            "finalized streaming archive"
        );
        Ok(out)
    }

    fn close(&mut self) {
        self.segments.clear();
        self.closed = true;
    }
}

/// Collects segments in memory and writes the whole container at finalize
///
/// Framed segment bytes are empty; the finalize output is a complete ZIP
/// built with [`zip::ZipWriter`].
#[derive(Default)]
pub struct BufferedZipArchive {
    segments: BTreeMap<i64, Vec<u8>>,
    finalized: bool,
    closed: bool,
}

impl BufferedZipArchive {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SegmentArchive for BufferedZipArchive {
    fn write_segment(&mut self, index: i64, data: &[u8]) -> Result<Vec<u8>, ArchiveError> {
        if self.closed {
            return Err(ArchiveError::Closed);
        }
        if self.finalized {
            return Err(ArchiveError::Finalized);
        }
        if self.segments.contains_key(&index) {
            return Err(ArchiveError::DuplicateSegment(index));
        }
        self.segments.insert(index, data.to_vec());
        Ok(Vec::new())
    }

    fn finalize(&mut self, manifest: &[u8], order: &[i64]) -> Result<Vec<u8>, ArchiveError> {
        if self.closed {
            return Err(ArchiveError::Closed);
        }
        if self.finalized {
            return Err(ArchiveError::Finalized);
        }

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer.start_file::<_, ()>(
            PAYLOAD_URL,
            FileOptions::default().compression_method(zip::CompressionMethod::Stored),
        )?;
        for index in order {
            let segment = self
                .segments
                .get(index)
                .ok_or(ArchiveError::MissingSegment(*index))?;
            writer.write_all(segment)?;
        }

        writer.start_file::<_, ()>(
            MANIFEST_FILE_NAME,
            FileOptions::default().compression_method(zip::CompressionMethod::Stored),
        )?;
        writer.write_all(manifest)?;

        let out = writer.finish()?.into_inner();
        self.finalized = true;
        self.segments.clear();
        Ok(out)
    }

    fn close(&mut self) {
        self.segments.clear();
        self.closed = true;
    }
}

fn to_u32(value: u64) -> Result<u32, ArchiveError> {
    u32::try_from(value).map_err(|_| ArchiveError::Zip64Required)
}

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}
