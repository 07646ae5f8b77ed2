//! In-memory partition store.

use crate::error::{ArchiveError, Result};
use crate::message::{DayNumber, DcpMessage, RecordId};
use crate::store::{
    require_record_id, MessageChunk, MessageQuery, PartitionStore, SlotRecord, WriteOp,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

#[derive(Debug)]
struct PartitionTables {
    messages: BTreeMap<RecordId, DcpMessage>,
    chunks: BTreeMap<(RecordId, u32), Vec<u8>>,
    next_id: RecordId,
}

impl Default for PartitionTables {
    fn default() -> Self {
        Self {
            messages: BTreeMap::new(),
            chunks: BTreeMap::new(),
            next_id: 1,
        }
    }
}

impl PartitionTables {
    fn validate(&self, ops: &[WriteOp]) -> Result<()> {
        let mut inserted = HashSet::new();
        let mut cleared = false;
        for op in ops {
            match op {
                WriteOp::Insert(msg) => {
                    let id = require_record_id(msg)?;
                    let exists = !cleared && self.messages.contains_key(&id);
                    if exists || !inserted.insert(id) {
                        return Err(ArchiveError::Store(format!(
                            "record {id} already exists"
                        )));
                    }
                }
                WriteOp::Update(msg) => {
                    let id = require_record_id(msg)?;
                    let exists = !cleared && self.messages.contains_key(&id);
                    if !exists && !inserted.contains(&id) {
                        return Err(ArchiveError::Store(format!("record {id} not found")));
                    }
                }
                WriteOp::Clear => {
                    cleared = true;
                    inserted.clear();
                }
                WriteOp::Delete(id) => {
                    inserted.remove(id);
                }
                WriteOp::PutChunk(_) | WriteOp::DeleteChunks(_) => {}
            }
        }
        Ok(())
    }

    fn apply(&mut self, ops: Vec<WriteOp>) {
        for op in ops {
            match op {
                WriteOp::Insert(msg) | WriteOp::Update(msg) => {
                    if let Some(id) = msg.record_id {
                        self.next_id = self.next_id.max(id + 1);
                        self.messages.insert(id, msg);
                    }
                }
                WriteOp::Delete(id) => {
                    self.messages.remove(&id);
                    self.delete_chunks(id);
                }
                WriteOp::PutChunk(chunk) => {
                    self.chunks
                        .insert((chunk.record_id, chunk.block_num), chunk.payload);
                }
                WriteOp::DeleteChunks(id) => self.delete_chunks(id),
                WriteOp::Clear => {
                    self.messages.clear();
                    self.chunks.clear();
                }
            }
        }
    }

    fn delete_chunks(&mut self, id: RecordId) {
        let keys: Vec<_> = self
            .chunks
            .range((id, 0)..=(id, u32::MAX))
            .map(|(k, _)| *k)
            .collect();
        for key in keys {
            self.chunks.remove(&key);
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    slots: BTreeMap<String, Option<DayNumber>>,
    partitions: HashMap<String, PartitionTables>,
}

/// Partition store held entirely in memory.
///
/// Batches are applied under a single write lock, so they are atomic with
/// respect to concurrent queries.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks that `ops` would apply cleanly, without applying them.
    pub(crate) fn validate(&self, partition: &str, ops: &[WriteOp]) -> Result<()> {
        let state = self.state.read().unwrap_or_else(|err| err.into_inner());
        match state.partitions.get(partition) {
            Some(tables) => tables.validate(ops),
            None => PartitionTables::default().validate(ops),
        }
    }

    /// Number of messages stored in a partition.
    pub fn message_count(&self, partition: &str) -> usize {
        let state = self.state.read().unwrap_or_else(|err| err.into_inner());
        state
            .partitions
            .get(partition)
            .map_or(0, |t| t.messages.len())
    }

    /// Number of chunks stored in a partition.
    pub fn chunk_count(&self, partition: &str) -> usize {
        let state = self.state.read().unwrap_or_else(|err| err.into_inner());
        state
            .partitions
            .get(partition)
            .map_or(0, |t| t.chunks.len())
    }

    /// Returns every partition's rows, chunks and generator position.
    pub(crate) fn dump(&self) -> Vec<(String, Vec<DcpMessage>, Vec<MessageChunk>, RecordId)> {
        let state = self.state.read().unwrap_or_else(|err| err.into_inner());
        let mut partitions: Vec<_> = state
            .partitions
            .iter()
            .map(|(name, tables)| {
                let chunks = tables
                    .chunks
                    .iter()
                    .map(|(&(record_id, block_num), payload)| MessageChunk {
                        record_id,
                        block_num,
                        payload: payload.clone(),
                    })
                    .collect();
                (
                    name.clone(),
                    tables.messages.values().cloned().collect(),
                    chunks,
                    tables.next_id,
                )
            })
            .collect();
        partitions.sort_by(|a, b| a.0.cmp(&b.0));
        partitions
    }

    /// Moves a partition's generator to at least `next_id`.
    pub(crate) fn advance_generator(&self, partition: &str, next_id: RecordId) {
        let mut state = self.state.write().unwrap_or_else(|err| err.into_inner());
        let tables = state.partitions.entry(partition.to_string()).or_default();
        tables.next_id = tables.next_id.max(next_id);
    }
}

impl PartitionStore for MemoryStore {
    fn load_slots(&self) -> Result<Vec<SlotRecord>> {
        let state = self.state.read().unwrap_or_else(|err| err.into_inner());
        Ok(state
            .slots
            .iter()
            .map(|(suffix, day)| SlotRecord {
                suffix: suffix.clone(),
                day: *day,
            })
            .collect())
    }

    fn save_slot(&self, slot: &SlotRecord) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(|err| err.into_inner());
        state.slots.insert(slot.suffix.clone(), slot.day);
        Ok(())
    }

    fn apply(&self, partition: &str, ops: Vec<WriteOp>) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(|err| err.into_inner());
        let tables = state.partitions.entry(partition.to_string()).or_default();
        tables.validate(&ops)?;
        tables.apply(ops);
        Ok(())
    }

    fn query_messages(
        &self,
        partition: &str,
        query: &MessageQuery<'_>,
    ) -> Result<Vec<DcpMessage>> {
        let state = self.state.read().unwrap_or_else(|err| err.into_inner());
        let Some(tables) = state.partitions.get(partition) else {
            return Ok(Vec::new());
        };
        let start = query.after.map_or(0, |id| id.saturating_add(1));
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(tables
            .messages
            .range(start..)
            .map(|(_, msg)| msg)
            .filter(|msg| query.admits(msg))
            .take(limit)
            .cloned()
            .collect())
    }

    fn query_chunks(&self, partition: &str, record_id: RecordId) -> Result<Vec<MessageChunk>> {
        let state = self.state.read().unwrap_or_else(|err| err.into_inner());
        let Some(tables) = state.partitions.get(partition) else {
            return Ok(Vec::new());
        };
        Ok(tables
            .chunks
            .range((record_id, 0)..=(record_id, u32::MAX))
            .map(|(&(record_id, block_num), payload)| MessageChunk {
                record_id,
                block_num,
                payload: payload.clone(),
            })
            .collect())
    }

    fn next_record_id(&self, partition: &str) -> Result<RecordId> {
        let mut state = self.state.write().unwrap_or_else(|err| err.into_inner());
        let tables = state.partitions.entry(partition.to_string()).or_default();
        let id = tables.next_id;
        tables.next_id += 1;
        Ok(id)
    }

    fn reset_identifier_generator(&self, partition: &str) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(|err| err.into_inner());
        state
            .partitions
            .entry(partition.to_string())
            .or_default()
            .next_id = 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{DcpAddress, MessageSource};

    fn message(id: RecordId) -> DcpMessage {
        let mut msg = DcpMessage::new(
            MessageSource::Other,
            DcpAddress::new("CE31A2B4"),
            id as i64 * 1000,
            vec![b'a'; 4],
        );
        msg.record_id = Some(id);
        msg
    }

    #[test]
    fn test_generator_and_reset() {
        let store = MemoryStore::new();
        assert_eq!(store.next_record_id("0001").unwrap(), 1);
        assert_eq!(store.next_record_id("0001").unwrap(), 2);
        assert_eq!(store.next_record_id("0002").unwrap(), 1);
        store.reset_identifier_generator("0001").unwrap();
        assert_eq!(store.next_record_id("0001").unwrap(), 1);
    }

    #[test]
    fn test_query_after_limit_filter() {
        let store = MemoryStore::new();
        for id in 1..=5 {
            store.insert("p", message(id)).unwrap();
        }
        let even = |m: &DcpMessage| m.record_id.unwrap_or(0) % 2 == 0;
        let query = MessageQuery::all().after(1).limit(1).filter(&even);
        let found = store.query_messages("p", &query).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].record_id, Some(2));

        let rest = store
            .query_messages("p", &MessageQuery::all().after(3))
            .unwrap();
        let ids: Vec<_> = rest.iter().filter_map(|m| m.record_id).collect();
        assert_eq!(ids, vec![4, 5]);
    }

    #[test]
    fn test_batch_is_all_or_nothing() {
        let store = MemoryStore::new();
        store.insert("p", message(1)).unwrap();

        let result = store.apply(
            "p",
            vec![
                WriteOp::PutChunk(MessageChunk {
                    record_id: 2,
                    block_num: 0,
                    payload: vec![1, 2, 3],
                }),
                WriteOp::Insert(message(2)),
                WriteOp::Insert(message(1)),
            ],
        );
        assert!(matches!(result, Err(ArchiveError::Store(_))));
        assert_eq!(store.message_count("p"), 1);
        assert_eq!(store.chunk_count("p"), 0);
    }

    #[test]
    fn test_update_requires_existing() {
        let store = MemoryStore::new();
        assert!(store.update("p", message(7)).is_err());
        store.insert("p", message(7)).unwrap();
        let mut changed = message(7);
        changed.channel = 99;
        store.update("p", changed).unwrap();
        assert_eq!(store.get_message("p", 7).unwrap().unwrap().channel, 99);
    }

    #[test]
    fn test_delete_removes_chunks() {
        let store = MemoryStore::new();
        store
            .apply(
                "p",
                vec![
                    WriteOp::PutChunk(MessageChunk {
                        record_id: 3,
                        block_num: 1,
                        payload: vec![2],
                    }),
                    WriteOp::PutChunk(MessageChunk {
                        record_id: 3,
                        block_num: 0,
                        payload: vec![1],
                    }),
                    WriteOp::Insert(message(3)),
                ],
            )
            .unwrap();
        let chunks = store.query_chunks("p", 3).unwrap();
        assert_eq!(chunks.iter().map(|c| c.block_num).collect::<Vec<_>>(), vec![0, 1]);

        store.delete("p", 3).unwrap();
        assert!(store.query_chunks("p", 3).unwrap().is_empty());
        assert_eq!(store.get_message("p", 3).unwrap(), None);
    }

    #[test]
    fn test_clear_then_reinsert_in_batch() {
        let store = MemoryStore::new();
        store.insert("p", message(1)).unwrap();
        store
            .apply("p", vec![WriteOp::Clear, WriteOp::Insert(message(1))])
            .unwrap();
        assert_eq!(store.message_count("p"), 1);
    }
}
