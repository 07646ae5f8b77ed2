//! Little-endian binary encoding of rows for the journal.

use crate::error::{ArchiveError, Result};
use crate::message::{DcpAddress, DcpMessage, FailureCodes, MessageFlags, MessageSource};
use crate::store::{MessageChunk, SlotRecord, WriteOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum OpType {
    Insert = 1,
    Update = 2,
    Delete = 3,
    PutChunk = 4,
    DeleteChunks = 5,
    Clear = 6,
}

/// Append-only byte buffer writer.
#[derive(Debug, Default)]
pub(crate) struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.buf
    }

    pub(crate) fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub(crate) fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub(crate) fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub(crate) fn put_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub(crate) fn put_bytes(&mut self, v: &[u8]) {
        self.put_u32(v.len() as u32);
        self.buf.extend_from_slice(v);
    }

    pub(crate) fn put_str(&mut self, v: &str) {
        self.put_bytes(v.as_bytes());
    }

    fn put_opt_i64(&mut self, v: Option<i64>) {
        match v {
            Some(v) => {
                self.put_u8(1);
                self.put_i64(v);
            }
            None => self.put_u8(0),
        }
    }

    pub(crate) fn put_slot(&mut self, slot: &SlotRecord) {
        self.put_str(&slot.suffix);
        self.put_opt_i64(slot.day.map(i64::from));
    }

    pub(crate) fn put_message(&mut self, msg: &DcpMessage) {
        self.put_opt_i64(msg.record_id.map(|id| id as i64));
        self.put_str(msg.address.as_str());
        self.put_i64(msg.local_recv_time);
        self.put_i64(msg.transmit_time);
        self.put_opt_i64(msg.carrier_start);
        self.put_opt_i64(msg.carrier_stop);
        self.put_u32(msg.baud);
        self.put_str(&msg.failure_codes.as_slice().iter().collect::<String>());
        self.put_u64(msg.msg_length as u64);
        self.put_bytes(&msg.data);
        self.put_u8(msg.source.code());
        self.put_u8(u8::from(msg.flags.duplicate));
        self.put_u32(u32::from(msg.channel));
        self.put_opt_i64(msg.sequence_num.map(i64::from));
    }

    pub(crate) fn put_chunk(&mut self, chunk: &MessageChunk) {
        self.put_u64(chunk.record_id);
        self.put_u32(chunk.block_num);
        self.put_bytes(&chunk.payload);
    }

    pub(crate) fn put_op(&mut self, op: &WriteOp) {
        match op {
            WriteOp::Insert(msg) => {
                self.put_u8(OpType::Insert as u8);
                self.put_message(msg);
            }
            WriteOp::Update(msg) => {
                self.put_u8(OpType::Update as u8);
                self.put_message(msg);
            }
            WriteOp::Delete(id) => {
                self.put_u8(OpType::Delete as u8);
                self.put_u64(*id);
            }
            WriteOp::PutChunk(chunk) => {
                self.put_u8(OpType::PutChunk as u8);
                self.put_chunk(chunk);
            }
            WriteOp::DeleteChunks(id) => {
                self.put_u8(OpType::DeleteChunks as u8);
                self.put_u64(*id);
            }
            WriteOp::Clear => self.put_u8(OpType::Clear as u8),
        }
    }
}

/// Cursor over an encoded byte slice.
#[derive(Debug)]
pub(crate) struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| ArchiveError::Corrupt(format!("truncated at offset {}", self.pos)))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub(crate) fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn get_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub(crate) fn get_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub(crate) fn get_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    pub(crate) fn get_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.get_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    pub(crate) fn get_str(&mut self) -> Result<String> {
        String::from_utf8(self.get_bytes()?)
            .map_err(|err| ArchiveError::Corrupt(format!("invalid utf-8: {err}")))
    }

    fn get_opt_i64(&mut self) -> Result<Option<i64>> {
        match self.get_u8()? {
            0 => Ok(None),
            1 => Ok(Some(self.get_i64()?)),
            tag => Err(ArchiveError::Corrupt(format!("bad option tag {tag}"))),
        }
    }

    pub(crate) fn get_slot(&mut self) -> Result<SlotRecord> {
        let suffix = self.get_str()?;
        let day = self.get_opt_i64()?.map(|d| d as i32);
        Ok(SlotRecord { suffix, day })
    }

    pub(crate) fn get_message(&mut self) -> Result<DcpMessage> {
        let record_id = self.get_opt_i64()?.map(|id| id as u64);
        let address = DcpAddress::new(&self.get_str()?);
        let local_recv_time = self.get_i64()?;
        let transmit_time = self.get_i64()?;
        let carrier_start = self.get_opt_i64()?;
        let carrier_stop = self.get_opt_i64()?;
        let baud = self.get_u32()?;
        let failure_codes = FailureCodes::from_codes(&self.get_str()?);
        let msg_length = self.get_u64()? as usize;
        let data = self.get_bytes()?;
        let source_code = self.get_u8()?;
        let source = MessageSource::from_code(source_code)
            .ok_or_else(|| ArchiveError::Corrupt(format!("bad source code {source_code}")))?;
        let duplicate = self.get_u8()? != 0;
        let channel = self.get_u32()? as u16;
        let sequence_num = self.get_opt_i64()?.map(|s| s as u32);

        Ok(DcpMessage {
            record_id,
            address,
            local_recv_time,
            transmit_time,
            carrier_start,
            carrier_stop,
            baud,
            failure_codes,
            msg_length,
            data,
            source,
            flags: MessageFlags { duplicate },
            channel,
            sequence_num,
        })
    }

    pub(crate) fn get_chunk(&mut self) -> Result<MessageChunk> {
        Ok(MessageChunk {
            record_id: self.get_u64()?,
            block_num: self.get_u32()?,
            payload: self.get_bytes()?,
        })
    }

    pub(crate) fn get_op(&mut self) -> Result<WriteOp> {
        let tag = self.get_u8()?;
        match tag {
            x if x == OpType::Insert as u8 => Ok(WriteOp::Insert(self.get_message()?)),
            x if x == OpType::Update as u8 => Ok(WriteOp::Update(self.get_message()?)),
            x if x == OpType::Delete as u8 => Ok(WriteOp::Delete(self.get_u64()?)),
            x if x == OpType::PutChunk as u8 => Ok(WriteOp::PutChunk(self.get_chunk()?)),
            x if x == OpType::DeleteChunks as u8 => Ok(WriteOp::DeleteChunks(self.get_u64()?)),
            x if x == OpType::Clear as u8 => Ok(WriteOp::Clear),
            _ => Err(ArchiveError::Corrupt(format!("unknown op type {tag}"))),
        }
    }
}
