//! Journal-backed durable partition store.
//!
//! Every mutation is appended to an on-disk journal and synced before it is
//! applied to the in-memory tables, so nothing becomes visible to readers
//! until it is durable.
//!
//! # Architecture
//!
//! ```text
//! apply → validate → journal append → sync → MemoryStore apply
//! ```
//!
//! # Features
//!
//! - **CRC32 Checksums**: each record is framed as `len | crc32 | payload`
//! - **Segment Rotation**: segments are rotated based on size thresholds
//! - **Crash Recovery**: records are replayed in sequence order on open;
//!   a torn record at the tail of a segment ends replay of that segment
//! - **Compaction**: [`JournalStore::compact`] writes a checkpoint segment
//!   holding the live state, renames it into place once synced, and removes
//!   the segments before it
//!
//! # Example
//!
//! ```rust,ignore
//! use dcp_archive::store::{JournalConfig, JournalStore};
//!
//! let store = JournalStore::open("/var/lib/archive/journal", JournalConfig::default())?;
//! let archive = Archive::open(Arc::new(store), config)?;
//! ```

use crate::error::{ArchiveError, Result};
use crate::message::{DcpMessage, RecordId};
use crate::store::codec::{Decoder, Encoder};
use crate::store::memory::MemoryStore;
use crate::store::{MessageChunk, MessageQuery, PartitionStore, SlotRecord, WriteOp};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Default maximum segment size (64 MB).
pub const DEFAULT_SEGMENT_SIZE: usize = 64 * 1024 * 1024;

/// Largest record accepted when reading a segment.
const MAX_RECORD_SIZE: usize = 256 * 1024 * 1024;

const SEGMENT_EXTENSION: &str = "jnl";

const SEGMENT_PREFIX: &str = "segment";

/// Name a checkpoint segment is built under before it is renamed into place.
const CHECKPOINT_TMP: &str = "checkpoint.tmp";

const JOURNAL_MAGIC: [u8; 4] = *b"DJNL";

const JOURNAL_VERSION: u16 = 1;

/// Sync mode for journal durability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Fsync after each append (default, highest durability).
    #[default]
    Fsync,
    /// Use fdatasync (skip metadata update, faster).
    Fdatasync,
    /// No sync (fastest, lowest durability - for testing only).
    None,
}

/// Configuration for journal behavior.
#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Maximum size of a single segment file.
    pub segment_size: usize,
    /// Sync mode for durability guarantees.
    pub sync_mode: SyncMode,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            segment_size: DEFAULT_SEGMENT_SIZE,
            sync_mode: SyncMode::default(),
        }
    }
}

impl JournalConfig {
    /// Creates a journal configuration with custom settings.
    pub fn new(segment_size: usize, sync_mode: SyncMode) -> Self {
        Self {
            segment_size,
            sync_mode,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum EntryType {
    SaveSlot = 1,
    Apply = 2,
    ResetGenerator = 3,
    AdvanceGenerator = 4,
    Checkpoint = 5,
}

/// A single journal record.
#[derive(Debug, Clone, PartialEq)]
pub enum JournalEntry {
    /// Slot binding changed.
    SaveSlot {
        /// Unique sequence number for this entry.
        sequence: u64,
        /// New slot state.
        slot: SlotRecord,
    },
    /// Atomic batch of row operations.
    Apply {
        /// Unique sequence number for this entry.
        sequence: u64,
        /// Target partition.
        partition: String,
        /// Operations in batch order.
        ops: Vec<WriteOp>,
    },
    /// Identifier generator restarted at 1.
    ResetGenerator {
        /// Unique sequence number for this entry.
        sequence: u64,
        /// Target partition.
        partition: String,
    },
    /// Identifier generator moved forward; written by checkpoints.
    AdvanceGenerator {
        /// Unique sequence number for this entry.
        sequence: u64,
        /// Target partition.
        partition: String,
        /// Next identifier to hand out.
        next_id: RecordId,
    },
    /// Everything before this entry is superseded by the snapshot entries
    /// that follow it.
    Checkpoint {
        /// Unique sequence number for this entry.
        sequence: u64,
        /// Number of snapshot entries written after the marker.
        entries: u64,
    },
}

impl JournalEntry {
    /// Returns the sequence number of the entry.
    pub fn sequence(&self) -> u64 {
        match self {
            Self::SaveSlot { sequence, .. }
            | Self::Apply { sequence, .. }
            | Self::ResetGenerator { sequence, .. }
            | Self::AdvanceGenerator { sequence, .. }
            | Self::Checkpoint { sequence, .. } => *sequence,
        }
    }

    fn set_sequence(&mut self, seq: u64) {
        match self {
            Self::SaveSlot { sequence, .. }
            | Self::Apply { sequence, .. }
            | Self::ResetGenerator { sequence, .. }
            | Self::AdvanceGenerator { sequence, .. }
            | Self::Checkpoint { sequence, .. } => *sequence = seq,
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        match self {
            Self::SaveSlot { sequence, slot } => {
                enc.put_u8(EntryType::SaveSlot as u8);
                enc.put_u64(*sequence);
                enc.put_slot(slot);
            }
            Self::Apply {
                sequence,
                partition,
                ops,
            } => {
                enc.put_u8(EntryType::Apply as u8);
                enc.put_u64(*sequence);
                enc.put_str(partition);
                enc.put_u32(ops.len() as u32);
                for op in ops {
                    enc.put_op(op);
                }
            }
            Self::ResetGenerator {
                sequence,
                partition,
            } => {
                enc.put_u8(EntryType::ResetGenerator as u8);
                enc.put_u64(*sequence);
                enc.put_str(partition);
            }
            Self::AdvanceGenerator {
                sequence,
                partition,
                next_id,
            } => {
                enc.put_u8(EntryType::AdvanceGenerator as u8);
                enc.put_u64(*sequence);
                enc.put_str(partition);
                enc.put_u64(*next_id);
            }
            Self::Checkpoint { sequence, entries } => {
                enc.put_u8(EntryType::Checkpoint as u8);
                enc.put_u64(*sequence);
                enc.put_u64(*entries);
            }
        }
        enc.finish()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(bytes);
        let entry_type = dec.get_u8()?;
        let sequence = dec.get_u64()?;

        let entry = match entry_type {
            x if x == EntryType::SaveSlot as u8 => Self::SaveSlot {
                sequence,
                slot: dec.get_slot()?,
            },
            x if x == EntryType::Apply as u8 => {
                let partition = dec.get_str()?;
                let count = dec.get_u32()? as usize;
                let mut ops = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    ops.push(dec.get_op()?);
                }
                Self::Apply {
                    sequence,
                    partition,
                    ops,
                }
            }
            x if x == EntryType::ResetGenerator as u8 => Self::ResetGenerator {
                sequence,
                partition: dec.get_str()?,
            },
            x if x == EntryType::AdvanceGenerator as u8 => Self::AdvanceGenerator {
                sequence,
                partition: dec.get_str()?,
                next_id: dec.get_u64()?,
            },
            x if x == EntryType::Checkpoint as u8 => Self::Checkpoint {
                sequence,
                entries: dec.get_u64()?,
            },
            _ => {
                return Err(ArchiveError::Corrupt(format!(
                    "unknown journal entry type {entry_type}"
                )))
            }
        };

        if !dec.is_empty() {
            return Err(ArchiveError::Corrupt(
                "trailing bytes after journal entry".to_string(),
            ));
        }
        Ok(entry)
    }
}

/// Journal segment header.
#[derive(Debug, Clone)]
struct SegmentHeader {
    magic: [u8; 4],
    version: u16,
    segment_id: u64,
    created_at: i64,
}

impl SegmentHeader {
    const SIZE: usize = 22; // 4 + 2 + 8 + 8

    fn new(segment_id: u64) -> Self {
        Self {
            magic: JOURNAL_MAGIC,
            version: JOURNAL_VERSION,
            segment_id,
            created_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0),
        }
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.magic)?;
        writer.write_all(&self.version.to_le_bytes())?;
        writer.write_all(&self.segment_id.to_le_bytes())?;
        writer.write_all(&self.created_at.to_le_bytes())?;
        Ok(())
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != JOURNAL_MAGIC {
            return Err(ArchiveError::InvalidMagic(magic));
        }

        let mut buf = [0u8; 2];
        reader.read_exact(&mut buf)?;
        let version = u16::from_le_bytes(buf);
        if version != JOURNAL_VERSION {
            return Err(ArchiveError::UnsupportedVersion(version));
        }

        let mut buf = [0u8; 8];
        reader.read_exact(&mut buf)?;
        let segment_id = u64::from_le_bytes(buf);

        reader.read_exact(&mut buf)?;
        let created_at = i64::from_le_bytes(buf);

        Ok(Self {
            magic,
            version,
            segment_id,
            created_at,
        })
    }
}

/// Append-only segmented journal.
pub struct Journal {
    log_dir: PathBuf,
    current_segment: BufWriter<File>,
    current_segment_id: u64,
    current_segment_size: usize,
    next_sequence: u64,
    config: JournalConfig,
}

impl Journal {
    /// Opens a journal in `log_dir`, starting a fresh segment after any
    /// existing ones.
    pub fn open(log_dir: impl AsRef<Path>, config: JournalConfig) -> Result<Self> {
        let log_dir = log_dir.as_ref().to_path_buf();
        fs::create_dir_all(&log_dir)?;

        let stale = log_dir.join(CHECKPOINT_TMP);
        if stale.exists() {
            warn!("Discarding unfinished checkpoint {}", stale.display());
            fs::remove_file(&stale)?;
        }

        let (next_segment_id, next_sequence) = Self::scan_existing_segments(&log_dir)?;
        let current_segment = Self::create_segment(&log_dir, next_segment_id)?;

        Ok(Self {
            log_dir,
            current_segment,
            current_segment_id: next_segment_id,
            current_segment_size: SegmentHeader::SIZE,
            next_sequence,
            config,
        })
    }

    fn scan_existing_segments(log_dir: &Path) -> Result<(u64, u64)> {
        let mut max_segment_id: Option<u64> = None;
        let mut max_sequence = 0;

        for path in list_segments(log_dir)? {
            if let Some(id) = parse_segment_id(&path) {
                max_segment_id = Some(max_segment_id.map_or(id, |max| max.max(id)));
            }
            if let Ok(entries) = Self::read_segment(&path) {
                if let Some(max) = entries.iter().map(JournalEntry::sequence).max() {
                    max_sequence = max_sequence.max(max);
                }
            }
        }

        let next_segment_id = max_segment_id.map_or(0, |id| id + 1);
        Ok((next_segment_id, max_sequence + 1))
    }

    fn create_segment(log_dir: &Path, segment_id: u64) -> Result<BufWriter<File>> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(segment_path(log_dir, segment_id))?;
        let mut writer = BufWriter::new(file);
        SegmentHeader::new(segment_id).write_to(&mut writer)?;
        writer.flush()?;
        Ok(writer)
    }

    /// Reads every intact entry from a segment.
    fn read_segment(path: &Path) -> Result<Vec<JournalEntry>> {
        let mut reader = BufReader::new(File::open(path)?);
        let _header = SegmentHeader::read_from(&mut reader)?;

        let mut entries = Vec::new();
        loop {
            match Self::read_entry(&mut reader) {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => break,
                Err(e) => {
                    warn!(
                        "Stopping replay of journal segment {} after {} entries: {:?}",
                        path.display(),
                        entries.len(),
                        e
                    );
                    break;
                }
            }
        }
        Ok(entries)
    }

    fn read_entry<R: Read>(reader: &mut R) -> Result<Option<JournalEntry>> {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        if len == 0 {
            return Ok(None);
        }
        if len > MAX_RECORD_SIZE {
            return Err(ArchiveError::Corrupt(format!(
                "journal record of {len} bytes exceeds limit"
            )));
        }

        let mut crc_buf = [0u8; 4];
        reader.read_exact(&mut crc_buf)?;
        let expected_crc = u32::from_le_bytes(crc_buf);

        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;

        let actual_crc = crc32fast::hash(&data);
        if actual_crc != expected_crc {
            return Err(ArchiveError::ChecksumMismatch {
                expected: expected_crc,
                actual: actual_crc,
            });
        }

        JournalEntry::from_bytes(&data).map(Some)
    }

    /// Appends and syncs one entry, returning its sequence number.
    pub fn append(&mut self, entry: JournalEntry) -> Result<u64> {
        let sequences = self.append_batch(vec![entry])?;
        Ok(sequences[0])
    }

    /// Appends entries in order and syncs once.
    pub fn append_batch(&mut self, entries: Vec<JournalEntry>) -> Result<Vec<u64>> {
        let mut sequences = Vec::with_capacity(entries.len());
        for mut entry in entries {
            entry.set_sequence(self.next_sequence);
            self.next_sequence += 1;
            sequences.push(entry.sequence());

            let data = entry.to_bytes();
            if self.current_segment_size + data.len() + 8 > self.config.segment_size
                && self.current_segment_size > SegmentHeader::SIZE
            {
                self.rotate_segment()?;
            }
            self.current_segment_size += write_record(&mut self.current_segment, &data)?;
        }
        self.sync()?;
        Ok(sequences)
    }

    fn sync(&mut self) -> Result<()> {
        self.current_segment.flush()?;
        match self.config.sync_mode {
            SyncMode::Fsync => self.current_segment.get_ref().sync_all()?,
            SyncMode::Fdatasync => self.current_segment.get_ref().sync_data()?,
            SyncMode::None => {}
        }
        Ok(())
    }

    fn rotate_segment(&mut self) -> Result<()> {
        self.current_segment.flush()?;
        self.current_segment.get_ref().sync_all()?;

        self.current_segment_id += 1;
        self.current_segment = Self::create_segment(&self.log_dir, self.current_segment_id)?;
        self.current_segment_size = SegmentHeader::SIZE;

        debug!("Rotated to journal segment {}", self.current_segment_id);
        Ok(())
    }

    /// Writes a checkpoint followed by `snapshot` into a new segment, then
    /// removes every older segment.
    ///
    /// The segment is built under a temporary name and only renamed into
    /// place once synced, so a crash part way through leaves the older
    /// segments authoritative.
    pub fn checkpoint(&mut self, snapshot: Vec<JournalEntry>) -> Result<()> {
        self.sync()?;
        let checkpoint_id = self.current_segment_id + 1;
        let tmp_path = self.log_dir.join(CHECKPOINT_TMP);

        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        SegmentHeader::new(checkpoint_id).write_to(&mut writer)?;
        let marker = JournalEntry::Checkpoint {
            sequence: 0,
            entries: snapshot.len() as u64,
        };
        let mut size = SegmentHeader::SIZE;
        for mut entry in std::iter::once(marker).chain(snapshot) {
            entry.set_sequence(self.next_sequence);
            self.next_sequence += 1;
            size += write_record(&mut writer, &entry.to_bytes())?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);

        let path = segment_path(&self.log_dir, checkpoint_id);
        fs::rename(&tmp_path, &path)?;
        sync_dir(&self.log_dir)?;
        debug!("Wrote checkpoint segment {}", checkpoint_id);

        // Later appends continue in the checkpoint segment.
        self.current_segment = BufWriter::new(OpenOptions::new().append(true).open(&path)?);
        self.current_segment_id = checkpoint_id;
        self.current_segment_size = size;

        for path in list_segments(&self.log_dir)? {
            if parse_segment_id(&path).is_some_and(|id| id < checkpoint_id) {
                fs::remove_file(&path)?;
                debug!("Removed journal segment: {}", path.display());
            }
        }
        Ok(())
    }

    /// Recovers entries from `log_dir` in sequence order, starting at the
    /// latest complete checkpoint.
    ///
    /// A checkpoint missing any of its snapshot entries is ignored.
    pub fn recover(log_dir: impl AsRef<Path>) -> Result<Vec<JournalEntry>> {
        let log_dir = log_dir.as_ref();
        let mut all_entries = Vec::new();

        for segment_path in list_segments(log_dir)? {
            match Self::read_segment(&segment_path) {
                Ok(entries) => {
                    debug!(
                        "Recovered {} entries from segment {}",
                        entries.len(),
                        segment_path.display()
                    );
                    all_entries.extend(entries);
                }
                Err(e) => warn!(
                    "Failed to read journal segment {}: {:?}",
                    segment_path.display(),
                    e
                ),
            }
        }

        all_entries.sort_by_key(JournalEntry::sequence);
        let start = (0..all_entries.len()).rev().find(|&pos| {
            let JournalEntry::Checkpoint { sequence, entries } = &all_entries[pos] else {
                return false;
            };
            let (sequence, entries) = (*sequence, *entries);
            let complete = usize::try_from(entries)
                .ok()
                .and_then(|n| pos.checked_add(n))
                .and_then(|last| all_entries.get(last))
                .is_some_and(|last| sequence.checked_add(entries) == Some(last.sequence()));
            if !complete {
                warn!(
                    "Ignoring incomplete checkpoint at sequence {} ({} entries expected)",
                    sequence, entries
                );
            }
            complete
        });
        if let Some(pos) = start {
            all_entries.drain(..pos);
        }

        debug!("Total recovered journal entries: {}", all_entries.len());
        Ok(all_entries)
    }
}

impl Drop for Journal {
    fn drop(&mut self) {
        if let Err(e) = self.current_segment.flush() {
            warn!("Failed to flush journal on drop: {:?}", e);
        }
    }
}

/// Writes one `len | crc32 | payload` record, returning the bytes written.
fn write_record<W: Write>(writer: &mut W, data: &[u8]) -> Result<usize> {
    let crc = crc32fast::hash(data);
    writer.write_all(&(data.len() as u32).to_le_bytes())?;
    writer.write_all(&crc.to_le_bytes())?;
    writer.write_all(data)?;
    Ok(4 + 4 + data.len())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

fn segment_path(log_dir: &Path, segment_id: u64) -> PathBuf {
    log_dir.join(format!(
        "{}_{:016x}.{}",
        SEGMENT_PREFIX, segment_id, SEGMENT_EXTENSION
    ))
}

fn parse_segment_id(path: &Path) -> Option<u64> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.strip_prefix(&format!("{}_", SEGMENT_PREFIX)))
        .and_then(|s| u64::from_str_radix(s, 16).ok())
}

fn list_segments(log_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut segments = Vec::new();
    for entry in fs::read_dir(log_dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == SEGMENT_EXTENSION) {
            segments.push(path);
        }
    }
    segments.sort();
    Ok(segments)
}

/// Durable [`PartitionStore`] backed by a [`Journal`].
pub struct JournalStore {
    memory: MemoryStore,
    journal: Mutex<Journal>,
}

impl JournalStore {
    /// Opens the store, replaying any existing journal in `dir`.
    pub fn open(dir: impl AsRef<Path>, config: JournalConfig) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let memory = MemoryStore::new();
        let entries = Journal::recover(dir)?;
        let replayed = entries.len();
        for entry in entries {
            Self::replay(&memory, entry);
        }
        debug!("Replayed {} journal entries from {}", replayed, dir.display());

        Ok(Self {
            memory,
            journal: Mutex::new(Journal::open(dir, config)?),
        })
    }

    fn replay(memory: &MemoryStore, entry: JournalEntry) {
        let result = match entry {
            JournalEntry::SaveSlot { slot, .. } => memory.save_slot(&slot),
            JournalEntry::Apply { partition, ops, .. } => memory.apply(&partition, ops),
            JournalEntry::ResetGenerator { partition, .. } => {
                memory.reset_identifier_generator(&partition)
            }
            JournalEntry::AdvanceGenerator {
                partition, next_id, ..
            } => {
                memory.advance_generator(&partition, next_id);
                Ok(())
            }
            JournalEntry::Checkpoint { .. } => Ok(()),
        };
        if let Err(err) = result {
            warn!("Skipping journal entry that failed to replay: {:?}", err);
        }
    }

    /// Rewrites the journal as a checkpoint of the live state.
    pub fn compact(&self) -> Result<()> {
        let mut journal = self.journal.lock().unwrap_or_else(|err| err.into_inner());

        let mut snapshot = Vec::new();
        for slot in self.memory.load_slots()? {
            snapshot.push(JournalEntry::SaveSlot { sequence: 0, slot });
        }
        for (partition, messages, chunks, next_id) in self.memory.dump() {
            for msg in messages {
                let Some(record_id) = msg.record_id else {
                    continue;
                };
                let mut ops: Vec<WriteOp> = chunks
                    .iter()
                    .filter(|c| c.record_id == record_id)
                    .cloned()
                    .map(WriteOp::PutChunk)
                    .collect();
                ops.push(WriteOp::Insert(msg));
                snapshot.push(JournalEntry::Apply {
                    sequence: 0,
                    partition: partition.clone(),
                    ops,
                });
            }
            snapshot.push(JournalEntry::AdvanceGenerator {
                sequence: 0,
                partition,
                next_id,
            });
        }

        let count = snapshot.len();
        journal.checkpoint(snapshot)?;
        debug!("Compacted journal to {} entries", count);
        Ok(())
    }

    fn log(&self, journal: &mut Journal, entry: JournalEntry) -> Result<()> {
        journal.append(entry).map(|_| ())
    }
}

impl PartitionStore for JournalStore {
    fn load_slots(&self) -> Result<Vec<SlotRecord>> {
        self.memory.load_slots()
    }

    fn save_slot(&self, slot: &SlotRecord) -> Result<()> {
        let mut journal = self.journal.lock().unwrap_or_else(|err| err.into_inner());
        self.log(
            &mut journal,
            JournalEntry::SaveSlot {
                sequence: 0,
                slot: slot.clone(),
            },
        )?;
        self.memory.save_slot(slot)
    }

    fn apply(&self, partition: &str, ops: Vec<WriteOp>) -> Result<()> {
        let mut journal = self.journal.lock().unwrap_or_else(|err| err.into_inner());
        self.memory.validate(partition, &ops)?;
        self.log(
            &mut journal,
            JournalEntry::Apply {
                sequence: 0,
                partition: partition.to_string(),
                ops: ops.clone(),
            },
        )?;
        self.memory.apply(partition, ops)
    }

    fn query_messages(
        &self,
        partition: &str,
        query: &MessageQuery<'_>,
    ) -> Result<Vec<DcpMessage>> {
        self.memory.query_messages(partition, query)
    }

    fn query_chunks(&self, partition: &str, record_id: RecordId) -> Result<Vec<MessageChunk>> {
        self.memory.query_chunks(partition, record_id)
    }

    fn next_record_id(&self, partition: &str) -> Result<RecordId> {
        // Replayed inserts move the generator past every stored id.
        self.memory.next_record_id(partition)
    }

    fn reset_identifier_generator(&self, partition: &str) -> Result<()> {
        let mut journal = self.journal.lock().unwrap_or_else(|err| err.into_inner());
        self.log(
            &mut journal,
            JournalEntry::ResetGenerator {
                sequence: 0,
                partition: partition.to_string(),
            },
        )?;
        self.memory.reset_identifier_generator(partition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{DcpAddress, MessageSource};
    use tempfile::TempDir;

    fn test_config() -> JournalConfig {
        JournalConfig::new(1024 * 1024, SyncMode::None)
    }

    fn message(id: RecordId) -> DcpMessage {
        let mut msg = DcpMessage::new(
            MessageSource::Other,
            DcpAddress::new("CE31A2B4"),
            1_000 * id as i64,
            vec![b'z'; 8],
        );
        msg.record_id = Some(id);
        msg
    }

    #[test]
    fn test_entry_bytes_roundtrip() {
        let entry = JournalEntry::Apply {
            sequence: 9,
            partition: "0003".to_string(),
            ops: vec![WriteOp::Clear, WriteOp::Insert(message(1))],
        };
        assert_eq!(JournalEntry::from_bytes(&entry.to_bytes()).unwrap(), entry);
    }

    #[test]
    fn test_sequences_continue_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let mut journal = Journal::open(temp_dir.path(), test_config()).unwrap();
            assert_eq!(
                journal.append(JournalEntry::Checkpoint { sequence: 0, entries: 0 }).unwrap(),
                1
            );
        }
        let mut journal = Journal::open(temp_dir.path(), test_config()).unwrap();
        assert_eq!(
            journal.append(JournalEntry::Checkpoint { sequence: 0, entries: 0 }).unwrap(),
            2
        );
        assert_eq!(journal.current_segment_id, 1);
    }

    #[test]
    fn test_rotation_by_size() {
        let temp_dir = TempDir::new().unwrap();
        let mut journal =
            Journal::open(temp_dir.path(), JournalConfig::new(256, SyncMode::None)).unwrap();
        for id in 1..=10 {
            journal
                .append(JournalEntry::Apply {
                    sequence: 0,
                    partition: "0001".to_string(),
                    ops: vec![WriteOp::Insert(message(id))],
                })
                .unwrap();
        }
        assert!(list_segments(temp_dir.path()).unwrap().len() > 1);
        assert_eq!(Journal::recover(temp_dir.path()).unwrap().len(), 10);
    }

    #[test]
    fn test_recover_stops_at_corrupt_tail() {
        let temp_dir = TempDir::new().unwrap();
        {
            let mut journal = Journal::open(temp_dir.path(), test_config()).unwrap();
            journal
                .append(JournalEntry::ResetGenerator {
                    sequence: 0,
                    partition: "0001".to_string(),
                })
                .unwrap();
            journal
                .append(JournalEntry::ResetGenerator {
                    sequence: 0,
                    partition: "0002".to_string(),
                })
                .unwrap();
        }

        let path = segment_path(temp_dir.path(), 0);
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, bytes).unwrap();

        let entries = Journal::recover(temp_dir.path()).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(matches!(
            &entries[0],
            JournalEntry::ResetGenerator { partition, .. } if partition == "0001"
        ));
    }

    #[test]
    fn test_invalid_magic_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = segment_path(temp_dir.path(), 0);
        fs::write(&path, b"XXXX\x01\x00").unwrap();
        assert!(matches!(
            Journal::read_segment(&path),
            Err(ArchiveError::InvalidMagic(_))
        ));
    }

    #[test]
    fn test_store_replays_after_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = JournalStore::open(temp_dir.path(), test_config()).unwrap();
            store
                .save_slot(&SlotRecord {
                    suffix: "0000".to_string(),
                    day: Some(19767),
                })
                .unwrap();
            let id = store.next_record_id("0000").unwrap();
            store.insert("0000", message(id)).unwrap();
            let id = store.next_record_id("0000").unwrap();
            store.insert("0000", message(id)).unwrap();
        }

        let store = JournalStore::open(temp_dir.path(), test_config()).unwrap();
        assert_eq!(
            store.load_slots().unwrap(),
            vec![SlotRecord {
                suffix: "0000".to_string(),
                day: Some(19767)
            }]
        );
        assert_eq!(store.query_messages("0000", &MessageQuery::all()).unwrap().len(), 2);
        assert_eq!(store.next_record_id("0000").unwrap(), 3);
    }

    #[test]
    fn test_rejected_batch_not_journaled() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = JournalStore::open(temp_dir.path(), test_config()).unwrap();
            store.insert("0000", message(1)).unwrap();
            assert!(store.insert("0000", message(1)).is_err());
        }
        let entries = Journal::recover(temp_dir.path()).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_unfinished_checkpoint_file_is_discarded() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = JournalStore::open(temp_dir.path(), test_config()).unwrap();
            for id in 1..=3 {
                store.insert("0000", message(id)).unwrap();
            }
        }

        // A crash while building the checkpoint leaves only its temp file.
        let mut partial = Vec::new();
        SegmentHeader::new(9).write_to(&mut partial).unwrap();
        let marker = JournalEntry::Checkpoint {
            sequence: 4,
            entries: 5,
        };
        write_record(&mut partial, &marker.to_bytes()).unwrap();
        fs::write(temp_dir.path().join(CHECKPOINT_TMP), partial).unwrap();

        let store = JournalStore::open(temp_dir.path(), test_config()).unwrap();
        assert_eq!(store.query_messages("0000", &MessageQuery::all()).unwrap().len(), 3);
        assert!(!temp_dir.path().join(CHECKPOINT_TMP).exists());
    }

    #[test]
    fn test_incomplete_checkpoint_is_ignored() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = JournalStore::open(temp_dir.path(), test_config()).unwrap();
            for id in 1..=3 {
                store.insert("0000", message(id)).unwrap();
            }
        }
        {
            // Marker promises three snapshot entries; only one made it.
            let mut journal = Journal::open(temp_dir.path(), test_config()).unwrap();
            journal
                .append_batch(vec![
                    JournalEntry::Checkpoint {
                        sequence: 0,
                        entries: 3,
                    },
                    JournalEntry::Apply {
                        sequence: 0,
                        partition: "0000".to_string(),
                        ops: vec![WriteOp::Insert(message(1))],
                    },
                ])
                .unwrap();
        }

        let entries = Journal::recover(temp_dir.path()).unwrap();
        assert_eq!(entries.len(), 5);
        let store = JournalStore::open(temp_dir.path(), test_config()).unwrap();
        assert_eq!(store.query_messages("0000", &MessageQuery::all()).unwrap().len(), 3);
    }

    #[test]
    fn test_compact_then_append_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = JournalStore::open(temp_dir.path(), test_config()).unwrap();
            store.insert("0000", message(1)).unwrap();
            store.compact().unwrap();
            store.insert("0000", message(2)).unwrap();
            store.compact().unwrap();
            store.insert("0000", message(3)).unwrap();
        }
        let store = JournalStore::open(temp_dir.path(), test_config()).unwrap();
        assert_eq!(store.query_messages("0000", &MessageQuery::all()).unwrap().len(), 3);
        assert_eq!(list_segments(temp_dir.path()).unwrap().len(), 2);
    }

    #[test]
    fn test_compact_preserves_state() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = JournalStore::open(temp_dir.path(), test_config()).unwrap();
            for id in 1..=3 {
                store.insert("0000", message(id)).unwrap();
            }
            store.delete("0000", 2).unwrap();
            store
                .apply(
                    "0000",
                    vec![WriteOp::PutChunk(MessageChunk {
                        record_id: 3,
                        block_num: 0,
                        payload: vec![7; 4],
                    })],
                )
                .unwrap();
            store.compact().unwrap();
            assert_eq!(list_segments(temp_dir.path()).unwrap().len(), 1);
        }

        let store = JournalStore::open(temp_dir.path(), test_config()).unwrap();
        let ids: Vec<_> = store
            .query_messages("0000", &MessageQuery::all())
            .unwrap()
            .iter()
            .filter_map(|m| m.record_id)
            .collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(store.query_chunks("0000", 3).unwrap().len(), 1);
        assert_eq!(store.next_record_id("0000").unwrap(), 4);
    }
}
