//! Persistence collaborator.
//!
//! The archive needs very little from its backing store: atomic batches of
//! row operations scoped to a named partition, predicate queries, ordered
//! chunk reads, a per-partition identifier generator, and a table holding the
//! day binding of every partition slot. [`PartitionStore`] captures exactly
//! that and nothing about schemas or query languages.

pub mod codec;
pub mod journal;
pub mod memory;

pub use journal::{JournalConfig, JournalStore, SyncMode};
pub use memory::MemoryStore;

use crate::error::{ArchiveError, Result};
use crate::message::{DayNumber, DcpMessage, RecordId};

/// A fragment of an oversize message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageChunk {
    /// Owning record.
    pub record_id: RecordId,
    /// 0-based position; blocks of one record are contiguous.
    pub block_num: u32,
    /// Fragment bytes.
    pub payload: Vec<u8>,
}

/// Persisted state of one partition slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRecord {
    /// Stable partition key.
    pub suffix: String,
    /// Day the slot is bound to, `None` when free.
    pub day: Option<DayNumber>,
}

/// One row operation within an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Inserts a new message row. The record id must be set and unused.
    Insert(DcpMessage),
    /// Replaces an existing message row.
    Update(DcpMessage),
    /// Deletes a message row and its chunks.
    Delete(RecordId),
    /// Writes a chunk row.
    PutChunk(MessageChunk),
    /// Deletes every chunk of a record.
    DeleteChunks(RecordId),
    /// Deletes every message and chunk row in the partition.
    Clear,
}

/// Predicate applied to stored messages.
pub type MessageFilter<'a> = &'a (dyn Fn(&DcpMessage) -> bool + Sync);

/// Selects messages from a partition in ascending record id order.
#[derive(Clone, Copy, Default)]
pub struct MessageQuery<'a> {
    /// Only records with an id strictly greater than this.
    pub after: Option<RecordId>,
    /// Maximum number of records returned.
    pub limit: Option<usize>,
    /// Only records for which the predicate holds.
    pub filter: Option<MessageFilter<'a>>,
}

impl<'a> MessageQuery<'a> {
    /// Query matching every record.
    pub fn all() -> Self {
        Self::default()
    }

    /// Starts after `record_id`.
    pub fn after(mut self, record_id: RecordId) -> Self {
        self.after = Some(record_id);
        self
    }

    /// Caps the result size.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Restricts to records matching `filter`.
    pub fn filter(mut self, filter: MessageFilter<'a>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub(crate) fn admits(&self, msg: &DcpMessage) -> bool {
        self.filter.map_or(true, |f| f(msg))
    }
}

/// Storage operations the archive requires, scoped to named partitions.
///
/// Every batch passed to [`PartitionStore::apply`] is atomic: readers see
/// either none or all of its effects.
pub trait PartitionStore: Send + Sync {
    /// Loads every known partition slot.
    fn load_slots(&self) -> Result<Vec<SlotRecord>>;

    /// Creates or updates a slot binding.
    fn save_slot(&self, slot: &SlotRecord) -> Result<()>;

    /// Applies a batch of row operations atomically.
    fn apply(&self, partition: &str, ops: Vec<WriteOp>) -> Result<()>;

    /// Returns messages matching `query`, ascending by record id.
    fn query_messages(&self, partition: &str, query: &MessageQuery<'_>)
        -> Result<Vec<DcpMessage>>;

    /// Returns the chunks of a record, ascending by block number.
    fn query_chunks(&self, partition: &str, record_id: RecordId) -> Result<Vec<MessageChunk>>;

    /// Draws the next identifier from the partition's generator.
    fn next_record_id(&self, partition: &str) -> Result<RecordId>;

    /// Restarts the partition's generator at 1.
    fn reset_identifier_generator(&self, partition: &str) -> Result<()>;

    /// Inserts one message.
    fn insert(&self, partition: &str, msg: DcpMessage) -> Result<()> {
        self.apply(partition, vec![WriteOp::Insert(msg)])
    }

    /// Updates one message.
    fn update(&self, partition: &str, msg: DcpMessage) -> Result<()> {
        self.apply(partition, vec![WriteOp::Update(msg)])
    }

    /// Deletes one message and its chunks.
    fn delete(&self, partition: &str, record_id: RecordId) -> Result<()> {
        self.apply(partition, vec![WriteOp::Delete(record_id)])
    }

    /// Fetches a single message row by id.
    fn get_message(&self, partition: &str, record_id: RecordId) -> Result<Option<DcpMessage>> {
        let query = MessageQuery::all().limit(1);
        let query = match record_id.checked_sub(1) {
            Some(prev) => query.after(prev),
            None => query,
        };
        Ok(self
            .query_messages(partition, &query)?
            .into_iter()
            .find(|m| m.record_id == Some(record_id)))
    }
}

pub(crate) fn require_record_id(msg: &DcpMessage) -> Result<RecordId> {
    msg.record_id
        .ok_or_else(|| ArchiveError::Store("message has no record id".to_string()))
}
