//! Append-only log backing the routing table.
//!
//! Every routing mutation (`Put`, `Delete`, `SetTier`) is appended here
//! before the in-memory map is updated, so a crash between the two can be
//! recovered by replaying the log from the last checkpoint. Entries are
//! postcard-encoded with a CRC32 checksum, matching the framing the ANN
//! backends' own snapshot format uses.

use std::io::{Read, Write};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use super::directory::Directory;
use super::error::{PersistenceError, PersistenceResult};
use super::format::ROUTING_LOG_MAGIC;
use crate::ann::AnnType;
use crate::DocId;

/// One mutation to the routing table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RoutingLogEntry {
    Put {
        doc_id: DocId,
        tier: Tier,
        file_id: String,
        created_at: i64,
    },
    Delete {
        doc_id: DocId,
    },
    SetTier {
        doc_id: DocId,
        tier: Tier,
    },
    /// Records which ANN backend type a tier was last persisted with, so
    /// `load` can reconstruct the right `AnnBackend` variant without a
    /// separate sidecar file.
    BackendType {
        tier: Tier,
        ann_type: AnnType,
    },
}

/// Which physical tier a routing record points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tier {
    Hot,
    Cold,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hot => write!(f, "hot"),
            Self::Cold => write!(f, "cold"),
        }
    }
}

fn encode_entry(entry: &RoutingLogEntry) -> PersistenceResult<Vec<u8>> {
    let payload = postcard::to_allocvec(entry)?;
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&payload);
    let checksum = hasher.finalize();

    let mut encoded = Vec::with_capacity(8 + payload.len());
    encoded.write_u32::<LittleEndian>(payload.len() as u32)?;
    encoded.write_u32::<LittleEndian>(checksum)?;
    encoded.extend_from_slice(&payload);
    Ok(encoded)
}

fn decode_entry<R: Read>(reader: &mut R) -> PersistenceResult<RoutingLogEntry> {
    let len = reader.read_u32::<LittleEndian>()? as usize;
    let checksum = reader.read_u32::<LittleEndian>()?;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&payload);
    let computed = hasher.finalize();
    if computed != checksum {
        return Err(PersistenceError::ChecksumMismatch {
            expected: checksum,
            actual: computed,
        });
    }
    Ok(postcard::from_bytes(&payload)?)
}

/// Appends routing mutations to `routing.log` under the given directory.
pub struct RoutingLogWriter {
    directory: Arc<dyn Directory>,
    path: String,
}

impl RoutingLogWriter {
    pub fn new(directory: Arc<dyn Directory>, path: impl Into<String>) -> Self {
        Self {
            directory,
            path: path.into(),
        }
    }

    pub fn append(&self, entry: &RoutingLogEntry) -> PersistenceResult<()> {
        let first_write = !self.directory.exists(&self.path);
        let encoded = encode_entry(entry)?;

        if first_write {
            let mut file = self.directory.create_file(&self.path)?;
            file.write_all(&ROUTING_LOG_MAGIC)?;
            file.write_all(&encoded)?;
            file.flush()?;
        } else {
            let mut file = self.directory.append_file(&self.path)?;
            file.write_all(&encoded)?;
            file.flush()?;
        }
        Ok(())
    }

    pub fn append_batch(&self, entries: &[RoutingLogEntry]) -> PersistenceResult<()> {
        for entry in entries {
            self.append(entry)?;
        }
        Ok(())
    }

    /// Truncate the log after a checkpoint (full routing table snapshot)
    /// has been durably written elsewhere.
    pub fn compact(&self) -> PersistenceResult<()> {
        if self.directory.exists(&self.path) {
            self.directory.delete(&self.path)?;
        }
        Ok(())
    }
}

/// Replays `routing.log` into an ordered list of entries.
pub struct RoutingLogReader {
    directory: Arc<dyn Directory>,
    path: String,
}

impl RoutingLogReader {
    pub fn new(directory: Arc<dyn Directory>, path: impl Into<String>) -> Self {
        Self {
            directory,
            path: path.into(),
        }
    }

    pub fn replay(&self) -> PersistenceResult<Vec<RoutingLogEntry>> {
        if !self.directory.exists(&self.path) {
            return Ok(Vec::new());
        }
        let mut file = self.directory.open_file(&self.path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if magic != ROUTING_LOG_MAGIC {
            return Err(PersistenceError::Format {
                message: "invalid routing log magic".into(),
                expected: Some(format!("{ROUTING_LOG_MAGIC:?}")),
                actual: Some(format!("{magic:?}")),
            });
        }

        let mut entries = Vec::new();
        loop {
            match decode_entry(&mut file) {
                Ok(entry) => entries.push(entry),
                Err(PersistenceError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break
                }
                Err(e) => return Err(e),
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::directory::MemoryDirectory;

    #[test]
    fn append_then_replay_roundtrips() {
        let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
        let writer = RoutingLogWriter::new(dir.clone(), "routing.log");
        writer
            .append(&RoutingLogEntry::Put {
                doc_id: 1,
                tier: Tier::Hot,
                file_id: "f1".into(),
                created_at: 1000,
            })
            .unwrap();
        writer
            .append(&RoutingLogEntry::SetTier {
                doc_id: 1,
                tier: Tier::Cold,
            })
            .unwrap();

        let reader = RoutingLogReader::new(dir, "routing.log");
        let entries = reader.replay().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(matches!(entries[1], RoutingLogEntry::SetTier { tier: Tier::Cold, .. }));
    }

    #[test]
    fn compact_clears_the_log() {
        let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
        let writer = RoutingLogWriter::new(dir.clone(), "routing.log");
        writer
            .append(&RoutingLogEntry::Delete { doc_id: 1 })
            .unwrap();
        writer.compact().unwrap();
        let reader = RoutingLogReader::new(dir, "routing.log");
        assert!(reader.replay().unwrap().is_empty());
    }
}
