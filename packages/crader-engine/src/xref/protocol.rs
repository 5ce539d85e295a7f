//! Wire protocol for the cross-reference indexer subprocess.
//!
//! The tool emits length-prefixed frames: `[u32 LE length][u8 tag][payload]`
//! where the payload is msgpack. Unknown tags are skipped so the reader
//! survives protocol evolution.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, Result};

pub const TAG_OCCURRENCE: u8 = 1;

/// Frames larger than this are treated as corruption, not data.
const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Role bit-field on an occurrence.
pub mod roles {
    pub const DEFINES: u32 = 1;
    pub const REFERENCES: u32 = 2;
    pub const READS_FROM: u32 = 16;
    pub const WRITES_TO: u32 = 32;
    pub const OVERRIDES: u32 = 64;
    pub const IMPLEMENTS: u32 = 128;
}

/// One symbol occurrence reported by the indexer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccurrenceRecord {
    pub symbol: String,
    /// Project-root-relative file path.
    pub file: String,
    pub byte_start: u64,
    pub byte_end: u64,
    pub role_mask: u32,
}

impl OccurrenceRecord {
    pub fn is_definition(&self) -> bool {
        self.role_mask & roles::DEFINES != 0
    }
}

/// Map a role mask to the edge relation it implies. Definition occurrences
/// feed the symbol table instead and never reach this mapping alone.
pub fn relation_for_mask(mask: u32) -> crader_storage::RelationType {
    use crader_storage::RelationType;
    if mask & roles::IMPLEMENTS != 0 {
        RelationType::Implements
    } else if mask & roles::OVERRIDES != 0 {
        RelationType::Overrides
    } else if mask & roles::WRITES_TO != 0 {
        RelationType::WritesTo
    } else if mask & roles::READS_FROM != 0 {
        RelationType::ReadsFrom
    } else {
        RelationType::Calls
    }
}

/// Streaming frame reader over the tool's output.
pub struct FrameReader<R: Read> {
    inner: R,
    skipped_tags: usize,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            skipped_tags: 0,
        }
    }

    pub fn skipped_tags(&self) -> usize {
        self.skipped_tags
    }

    /// Next occurrence record, skipping frames with unknown tags.
    /// `Ok(None)` on clean EOF.
    pub fn next_occurrence(&mut self) -> Result<Option<OccurrenceRecord>> {
        loop {
            let len = match self.inner.read_u32::<LittleEndian>() {
                Ok(len) => len,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
                Err(e) => return Err(e.into()),
            };
            if len == 0 || len > MAX_FRAME_LEN {
                return Err(EngineError::IndexerTool(format!(
                    "invalid frame length {}",
                    len
                )));
            }

            let tag = self.inner.read_u8()?;
            let mut payload = vec![0u8; (len - 1) as usize];
            self.inner.read_exact(&mut payload)?;

            if tag != TAG_OCCURRENCE {
                self.skipped_tags += 1;
                debug!(tag, "skipping unknown frame tag");
                continue;
            }

            let record = rmp_serde::from_slice(&payload).map_err(|e| {
                EngineError::IndexerTool(format!("malformed occurrence frame: {}", e))
            })?;
            return Ok(Some(record));
        }
    }
}

/// Frame writer, used by tests and tool shims.
pub struct FrameWriter<W: Write> {
    inner: W,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn write_occurrence(&mut self, record: &OccurrenceRecord) -> Result<()> {
        let payload = rmp_serde::to_vec(record)
            .map_err(|e| EngineError::IndexerTool(format!("encode failed: {}", e)))?;
        self.write_frame(TAG_OCCURRENCE, &payload)
    }

    pub fn write_frame(&mut self, tag: u8, payload: &[u8]) -> Result<()> {
        self.inner
            .write_u32::<LittleEndian>(payload.len() as u32 + 1)?;
        self.inner.write_u8(tag)?;
        self.inner.write_all(payload)?;
        Ok(())
    }
}
