//! DCP Archive - day-partitioned telemetry message store
//!
//! This crate stores telemetry messages relayed from remote sensor platforms
//! in a fixed pool of day partitions, and serves filtered, incrementally
//! polled views of them to many consumers.
//!
//! # Components
//!
//! - [`DcpMessage`] / [`GoesHeader`]: message model and fixed-width header codec
//! - [`PartitionDirectory`]: binds days to storage slots, evicting the oldest
//! - [`ChunkedBodyStore`]: splits oversize bodies into ordered chunks
//! - [`AddressIndex`] / [`NetlistCache`]: network-list and name resolution
//! - [`SearchCriteria`] / [`Matcher`]: filter model, text format and matcher
//! - [`Cursor`]: poll-based retrieval returning a [`PollOutcome`]
//! - [`MemoryStore`] / [`JournalStore`]: persistence collaborators
//!
//! # Example
//!
//! ```rust,ignore
//! use dcp_archive::{Archive, ArchiveConfig, JournalStore, PollOutcome, SearchCriteria};
//!
//! let store = Arc::new(JournalStore::open(dir, JournalConfig::default())?);
//! let archive = Archive::open(store, ArchiveConfig::new(30, 4000, 4000, 31))?;
//!
//! // Ingest
//! let mut msg = DcpMessage::decode_goes(&raw, now, MessageSource::GoesSelfTimed);
//! archive.submit(&mut msg)?;
//!
//! // Retrieve
//! let criteria: SearchCriteria = "DAPS_SINCE: now - 1 hour\nNETWORKLIST: coastal".parse()?;
//! let index = AddressIndex::resolve(&criteria, &*netlists.snapshot(), &names)?;
//! let mut cursor = archive.open_cursor(criteria, index)?;
//! while let PollOutcome::Found(msg) = cursor.poll(deadline)? {
//!     forward(&msg);
//! }
//! ```

#![deny(missing_docs)]

pub mod archive;
pub mod chunk;
pub mod config;
pub mod criteria;
pub mod cursor;
pub mod error;
pub mod lifecycle;
pub mod message;
pub mod netlist;
pub mod store;

pub use archive::Archive;
pub use chunk::{Body, ChunkedBodyStore};
pub use config::ArchiveConfig;
pub use criteria::{ChannelToken, Matcher, SearchCriteria, Spacecraft, TimeSpec, TriState};
pub use cursor::{Cursor, PollOutcome};
pub use error::{ArchiveError, Result};
pub use lifecycle::{
    Allocation, DaysRetentionPolicy, PartitionDirectory, RetentionManager, RetentionPolicy,
};
pub use message::{
    DayNumber, DcpAddress, DcpMessage, FailureCodes, GoesHeader, MessageSource, RecordId,
    Timestamp,
};
pub use netlist::{AddressIndex, NameMapper, NameResolver, NetlistCache, NetworkList};
pub use store::{JournalConfig, JournalStore, MemoryStore, PartitionStore, SyncMode};
