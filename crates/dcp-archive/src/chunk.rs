//! Chunked storage for message bodies larger than the inline limit.
//!
//! The first `inline_capacity` bytes of a body live in the message row. The
//! remainder is split into chunks of at most `chunk_size` bytes keyed by
//! `(record_id, block_num)` with `block_num` starting at 0. The row and its
//! chunks are written in one store batch, so a reader never sees the row
//! without the chunks written alongside it.

use crate::config::ArchiveConfig;
use crate::error::Result;
use crate::message::{DcpMessage, RecordId};
use crate::store::{require_record_id, MessageChunk, PartitionStore, WriteOp};

/// A reassembled message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// Every byte up to the message length is present.
    Complete(Vec<u8>),
    /// Fewer bytes are stored than the message length implies.
    Partial {
        /// Bytes available, in order.
        bytes: Vec<u8>,
        /// Authoritative message length.
        expected: usize,
    },
}

impl Body {
    /// True if the body is complete.
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }

    /// Bytes available.
    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Complete(bytes) | Self::Partial { bytes, .. } => bytes,
        }
    }

    /// Consumes the body, returning the bytes available.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Complete(bytes) | Self::Partial { bytes, .. } => bytes,
        }
    }

    /// Bytes zero-padded to the message length.
    pub fn padded(&self) -> Vec<u8> {
        match self {
            Self::Complete(bytes) => bytes.clone(),
            Self::Partial { bytes, expected } => {
                let mut out = bytes.clone();
                out.resize(*expected, 0);
                out
            }
        }
    }
}

/// Splits and reassembles message bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkedBodyStore {
    inline_capacity: usize,
    chunk_size: usize,
}

impl ChunkedBodyStore {
    /// Creates a body store. A zero chunk size is treated as 1.
    pub fn new(inline_capacity: usize, chunk_size: usize) -> Self {
        Self {
            inline_capacity,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Creates a body store using the archive's limits.
    pub fn from_config(config: &ArchiveConfig) -> Self {
        Self::new(config.inline_body_limit, config.chunk_size)
    }

    /// Splits `body` into inline bytes and chunks.
    pub fn split(&self, record_id: RecordId, body: &[u8]) -> (Vec<u8>, Vec<MessageChunk>) {
        let inline_len = body.len().min(self.inline_capacity);
        let inline = body[..inline_len].to_vec();
        let chunks = body[inline_len..]
            .chunks(self.chunk_size)
            .enumerate()
            .map(|(block_num, payload)| MessageChunk {
                record_id,
                block_num: block_num as u32,
                payload: payload.to_vec(),
            })
            .collect();
        (inline, chunks)
    }

    /// Writes `msg` and its overflow chunks as one batch.
    ///
    /// With `update`, the row is replaced and any previous chunks are deleted
    /// first. The body is capped at `msg.msg_length`.
    pub fn store<S: PartitionStore + ?Sized>(
        &self,
        store: &S,
        partition: &str,
        msg: &DcpMessage,
        update: bool,
    ) -> Result<()> {
        let record_id = require_record_id(msg)?;
        let body_len = msg.data.len().min(msg.msg_length);
        let (inline, chunks) = self.split(record_id, &msg.data[..body_len]);

        let mut row = msg.clone();
        row.data = inline;

        let mut ops = Vec::with_capacity(chunks.len() + 2);
        if update {
            ops.push(WriteOp::DeleteChunks(record_id));
        }
        ops.extend(chunks.into_iter().map(WriteOp::PutChunk));
        ops.push(if update {
            WriteOp::Update(row)
        } else {
            WriteOp::Insert(row)
        });
        store.apply(partition, ops)
    }

    /// Reassembles the body of a stored row.
    ///
    /// Chunks are appended in block order up to the first gap. The result is
    /// truncated to `row.msg_length`; a shorter result is [`Body::Partial`].
    pub fn reconstruct<S: PartitionStore + ?Sized>(
        &self,
        store: &S,
        partition: &str,
        row: &DcpMessage,
    ) -> Result<Body> {
        let mut bytes = row.data.clone();
        if bytes.len() < row.msg_length {
            let record_id = require_record_id(row)?;
            let chunks = store.query_chunks(partition, record_id)?;
            for (expected, chunk) in chunks.into_iter().enumerate() {
                if chunk.block_num as usize != expected || bytes.len() >= row.msg_length {
                    break;
                }
                bytes.extend_from_slice(&chunk.payload);
            }
        }
        bytes.truncate(row.msg_length);

        if bytes.len() == row.msg_length {
            Ok(Body::Complete(bytes))
        } else {
            Ok(Body::Partial {
                bytes,
                expected: row.msg_length,
            })
        }
    }
}
