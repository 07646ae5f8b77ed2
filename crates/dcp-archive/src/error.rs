//! Error and Result types for archive operations.

use crate::message::{DayNumber, Timestamp};
use std::io;
use thiserror::Error;

/// A convenience `Result` type for archive operations.
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// The error type for archive operations.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Malformed search criteria text. Nothing was changed; fix and resubmit.
    #[error("Criteria syntax error at line {line}: {message}")]
    Syntax {
        /// 1-based line number of the offending directive (0 if not line-specific).
        line: usize,
        /// Description of the problem.
        message: String,
    },

    /// A partition the cursor depended on was evicted, or the store is inconsistent.
    ///
    /// The cursor must be closed and reopened.
    #[error("Archive unavailable: {0}")]
    ArchiveUnavailable(String),

    /// The requested day is older than every retained day and all slots are bound.
    #[error("Day {day} refused: oldest retained day is {oldest}")]
    DayRefused {
        /// Day number that was requested.
        day: DayNumber,
        /// Oldest day number currently bound.
        oldest: DayNumber,
    },

    /// The message transmit time is too far in the future to be archived.
    #[error("Message from {address} stamped {transmit_time} is in the future (now {now})")]
    FutureMessage {
        /// Platform address of the rejected message.
        address: String,
        /// Transmit time carried by the message (ms since epoch).
        transmit_time: Timestamp,
        /// Archive clock at the time of rejection (ms since epoch).
        now: Timestamp,
    },

    /// A network list named by criteria could not be found.
    #[error("Network list not found: {0}")]
    NetworkListNotFound(String),

    /// A DCP name named by criteria could not be resolved to an address.
    #[error("Unrecognized DCP name: {0}")]
    UnknownDcpName(String),

    /// Configuration failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be parsed.
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// The persistence collaborator rejected an operation.
    #[error("Store error: {0}")]
    Store(String),

    /// Invalid magic bytes in a journal segment header.
    #[error("Invalid magic bytes: expected DJNL, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported journal format version.
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u16),

    /// Journal record checksum does not match.
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Expected CRC32 checksum.
        expected: u32,
        /// Actual computed CRC32 checksum.
        actual: u32,
    },

    /// A journal record could not be decoded.
    #[error("Corrupt journal record: {0}")]
    Corrupt(String),

    /// The system clock is unusable (before the Unix epoch).
    #[error("Clock error: {0}")]
    Clock(String),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ArchiveError {
    /// Builds a [`ArchiveError::Syntax`] error.
    pub(crate) fn syntax(line: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            line,
            message: message.into(),
        }
    }

    /// Returns true if the caller may fix its input and retry.
    pub fn is_recoverable_syntax(&self) -> bool {
        matches!(self, Self::Syntax { .. })
    }
}
