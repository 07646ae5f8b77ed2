//! The archive facade: ingest, direct reads and cursors over one store.
//!
//! # Examples
//! ```rust,ignore
//! use dcp_archive::{Archive, ArchiveConfig, MemoryStore};
//!
//! let archive = Archive::open(Arc::new(MemoryStore::new()), ArchiveConfig::load(path)?)?;
//! let id = archive.submit(&mut msg)?;
//! let _retention = archive.retention_manager().spawn(Duration::from_secs(3600));
//! ```

use crate::chunk::ChunkedBodyStore;
use crate::config::ArchiveConfig;
use crate::criteria::SearchCriteria;
use crate::cursor::Cursor;
use crate::error::{ArchiveError, Result};
use crate::lifecycle::partition::{current_timestamp_millis, day_label};
use crate::lifecycle::{DaysRetentionPolicy, PartitionDirectory, PartitionRef, RetentionManager};
use crate::message::{day_of, DayNumber, DcpAddress, DcpMessage, MessageSource, RecordId, Timestamp};
use crate::netlist::AddressIndex;
use crate::store::{require_record_id, MessageQuery, PartitionStore};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Messages stamped further ahead of the archive clock are refused.
pub const FUTURE_TOLERANCE_MS: i64 = 30 * 60 * 1000;

/// Half-width of the window searched by [`Archive::find_transmission`].
pub const FIND_FUDGE_MS: i64 = 10_000;

/// A day-partitioned message archive.
pub struct Archive<S: PartitionStore> {
    config: ArchiveConfig,
    directory: Arc<PartitionDirectory<S>>,
    bodies: ChunkedBodyStore,
}

impl<S: PartitionStore> Archive<S> {
    /// Opens an archive over `store`, loading its slot bindings.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::InvalidConfig`] if `config` fails validation,
    /// or any error raised while loading the slot table.
    pub fn open(store: Arc<S>, config: ArchiveConfig) -> Result<Self> {
        config.validate()?;
        let directory = Arc::new(PartitionDirectory::open(store, config.max_partitions)?);
        info!(
            "Opened archive with {} of {} partitions bound",
            directory.bound_days().len(),
            config.max_partitions
        );
        Ok(Self {
            bodies: ChunkedBodyStore::from_config(&config),
            config,
            directory,
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    /// The partition directory.
    pub fn directory(&self) -> &Arc<PartitionDirectory<S>> {
        &self.directory
    }

    /// Stores `msg` in the partition for its transmit day.
    ///
    /// A message without a record id is inserted and assigned one; otherwise
    /// the stored row is replaced. On failure a freshly assigned id is
    /// cleared again.
    ///
    /// # Errors
    ///
    /// - [`ArchiveError::FutureMessage`] if the transmit time is more than
    ///   [`FUTURE_TOLERANCE_MS`] ahead of the clock.
    /// - [`ArchiveError::DayRefused`] if the day is older than every bound
    ///   partition and no slot is free.
    pub fn submit(&self, msg: &mut DcpMessage) -> Result<RecordId> {
        self.submit_at(msg, current_timestamp_millis()?)
    }

    /// Like [`Archive::submit`], with the archive clock fixed at `now`.
    pub fn submit_at(&self, msg: &mut DcpMessage, now: Timestamp) -> Result<RecordId> {
        if msg.transmit_time == 0 {
            warn!(
                "Message from {} has no transmit time, filing under receive day",
                msg.address
            );
        } else if msg.transmit_time > now + FUTURE_TOLERANCE_MS {
            warn!(
                "Refusing message from {} stamped {} ms ahead of the clock",
                msg.address,
                msg.transmit_time - now
            );
            return Err(ArchiveError::FutureMessage {
                address: msg.address.to_string(),
                transmit_time: msg.transmit_time,
                now,
            });
        }

        let day = msg.partition_day();
        let is_new = msg.record_id.is_none();
        let result = self.directory.with_allocated(day, |partition, store| {
            if is_new {
                msg.record_id = Some(store.next_record_id(&partition.suffix)?);
            }
            self.bodies.store(store, &partition.suffix, msg, !is_new)
        });

        match result {
            Ok(()) => {
                let record_id = require_record_id(msg)?;
                debug!(
                    "Stored record {} from {} in {}",
                    record_id,
                    msg.address,
                    day_label(day)
                );
                Ok(record_id)
            }
            Err(err) => {
                if is_new {
                    msg.record_id = None;
                }
                Err(err)
            }
        }
    }

    fn read_partition<T>(
        &self,
        day: DayNumber,
        f: impl FnOnce(&PartitionRef, &S) -> Result<T>,
    ) -> Result<Option<T>> {
        self.directory.with_partition(day, f)
    }

    fn with_body(&self, store: &S, partition: &str, mut row: DcpMessage) -> Result<DcpMessage> {
        row.data = self.bodies.reconstruct(store, partition, &row)?.into_bytes();
        Ok(row)
    }

    /// Reads one message with its full body.
    pub fn read_message(&self, day: DayNumber, record_id: RecordId) -> Result<Option<DcpMessage>> {
        let found = self.read_partition(day, |partition, store| {
            store
                .get_message(&partition.suffix, record_id)?
                .map(|row| self.with_body(store, &partition.suffix, row))
                .transpose()
        })?;
        Ok(found.flatten())
    }

    /// Lowest record id stored for `day`.
    pub fn first_record_id(&self, day: DayNumber) -> Result<Option<RecordId>> {
        let first = self.read_partition(day, |partition, store| {
            let rows = store.query_messages(&partition.suffix, &MessageQuery::all().limit(1))?;
            Ok(rows.first().and_then(|m| m.record_id))
        })?;
        Ok(first.flatten())
    }

    /// Highest record id stored for `day`.
    pub fn last_record_id(&self, day: DayNumber) -> Result<Option<RecordId>> {
        let last = self.read_partition(day, |partition, store| {
            let rows = store.query_messages(&partition.suffix, &MessageQuery::all())?;
            Ok(rows.last().and_then(|m| m.record_id))
        })?;
        Ok(last.flatten())
    }

    /// Latest transmit time stored for `day`.
    pub fn latest_transmit_time(&self, day: DayNumber) -> Result<Option<Timestamp>> {
        let latest = self.read_partition(day, |partition, store| {
            let rows = store.query_messages(&partition.suffix, &MessageQuery::all())?;
            Ok(rows.iter().map(|m| m.transmit_time).max())
        })?;
        Ok(latest.flatten())
    }

    fn read_filtered(
        &self,
        day: DayNumber,
        filter: &(dyn Fn(&DcpMessage) -> bool + Sync),
    ) -> Result<Vec<DcpMessage>> {
        let rows = self.read_partition(day, |partition, store| {
            store
                .query_messages(&partition.suffix, &MessageQuery::all().filter(filter))?
                .into_iter()
                .map(|row| self.with_body(store, &partition.suffix, row))
                .collect::<Result<Vec<_>>>()
        })?;
        Ok(rows.unwrap_or_default())
    }

    /// Messages received on `channel` during `day`, with bodies.
    pub fn read_by_channel(&self, day: DayNumber, channel: u16) -> Result<Vec<DcpMessage>> {
        self.read_filtered(day, &|m: &DcpMessage| m.channel == channel)
    }

    /// Messages from any address in `index` during `day`, with bodies.
    pub fn read_by_addresses(&self, day: DayNumber, index: &AddressIndex) -> Result<Vec<DcpMessage>> {
        self.read_filtered(day, &|m: &DcpMessage| index.contains(&m.address))
    }

    /// Finds the stored transmission from `address` closest to `time`.
    ///
    /// Only messages within [`FIND_FUDGE_MS`] of `time` qualify. When the
    /// window straddles midnight the adjacent day is searched too.
    pub fn find_transmission(
        &self,
        source: MessageSource,
        address: &DcpAddress,
        time: Timestamp,
    ) -> Result<Option<DcpMessage>> {
        let mut days = vec![day_of(time - FIND_FUDGE_MS), day_of(time), day_of(time + FIND_FUDGE_MS)];
        days.dedup();

        let mut best: Option<DcpMessage> = None;
        for day in days {
            let candidates = self.read_filtered(day, &|m: &DcpMessage| {
                m.address == *address
                    && m.source.satisfies(source)
                    && (m.transmit_time - time).abs() <= FIND_FUDGE_MS
            })?;
            for candidate in candidates {
                let closer = best.as_ref().map_or(true, |b| {
                    (candidate.transmit_time - time).abs() < (b.transmit_time - time).abs()
                });
                if closer {
                    best = Some(candidate);
                }
            }
        }
        Ok(best)
    }

    /// Opens a retrieval cursor.
    ///
    /// `index` is the address index resolved for `criteria`, usually via
    /// [`AddressIndex::resolve`].
    pub fn open_cursor(&self, criteria: SearchCriteria, index: AddressIndex) -> Result<Cursor<S>> {
        Ok(self.open_cursor_at(criteria, index, current_timestamp_millis()?))
    }

    /// Like [`Archive::open_cursor`], resolving relative bounds against `now`.
    pub fn open_cursor_at(
        &self,
        criteria: SearchCriteria,
        index: AddressIndex,
        now: Timestamp,
    ) -> Cursor<S> {
        Cursor::open(
            Arc::clone(&self.directory),
            self.bodies,
            Arc::new(criteria),
            index,
            now,
        )
    }

    /// Evicts partitions older than the configured retention as of `today`.
    pub fn sweep_retention(&self, today: DayNumber) -> Result<usize> {
        self.directory
            .sweep_retention(today, self.config.retention_days)
    }
}

impl<S: PartitionStore + 'static> Archive<S> {
    /// Retention manager enforcing the configured retention window.
    pub fn retention_manager(&self) -> RetentionManager<DaysRetentionPolicy, S> {
        RetentionManager::new(
            DaysRetentionPolicy::new(self.config.retention_days),
            Arc::clone(&self.directory),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MS_PER_DAY;
    use crate::store::MemoryStore;

    const DAY: DayNumber = 19_767;
    const NOON: Timestamp = DAY as i64 * MS_PER_DAY + MS_PER_DAY / 2;

    fn archive(max: usize) -> Archive<MemoryStore> {
        Archive::open(
            Arc::new(MemoryStore::new()),
            ArchiveConfig::new(10, 4, 4, max),
        )
        .unwrap()
    }

    fn msg(address: &str, transmit_time: Timestamp, body: &[u8]) -> DcpMessage {
        DcpMessage::new(
            MessageSource::GoesSelfTimed,
            DcpAddress::new(address),
            transmit_time,
            body.to_vec(),
        )
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        let result = Archive::open(Arc::new(MemoryStore::new()), ArchiveConfig::new(10, 4, 0, 4));
        assert!(matches!(result, Err(ArchiveError::InvalidConfig(_))));
    }

    #[test]
    fn test_submit_assigns_and_updates() {
        let archive = archive(4);
        let mut m = msg("A1", NOON, b"first body");
        let id = archive.submit_at(&mut m, NOON).unwrap();
        assert_eq!(m.record_id, Some(id));

        m.data = b"second".to_vec();
        m.msg_length = 6;
        assert_eq!(archive.submit_at(&mut m, NOON).unwrap(), id);
        let stored = archive.read_message(DAY, id).unwrap().unwrap();
        assert_eq!(stored.data, b"second");
        assert_eq!(archive.last_record_id(DAY).unwrap(), Some(id));
    }

    #[test]
    fn test_future_message_refused() {
        let archive = archive(4);
        let mut m = msg("A1", NOON + FUTURE_TOLERANCE_MS + 1, b"x");
        assert!(matches!(
            archive.submit_at(&mut m, NOON),
            Err(ArchiveError::FutureMessage { .. })
        ));
        assert!(m.record_id.is_none());

        let mut m = msg("A1", NOON + FUTURE_TOLERANCE_MS, b"x");
        assert!(archive.submit_at(&mut m, NOON).is_ok());
    }

    #[test]
    fn test_refused_day_clears_new_id() {
        let archive = archive(1);
        archive.submit_at(&mut msg("A1", NOON, b"x"), NOON).unwrap();
        let mut old = msg("A1", NOON - MS_PER_DAY, b"y");
        assert!(matches!(
            archive.submit_at(&mut old, NOON),
            Err(ArchiveError::DayRefused { .. })
        ));
        assert!(old.record_id.is_none());
    }

    #[test]
    fn test_unparseable_time_files_under_receive_day() {
        let archive = archive(2);
        archive.submit_at(&mut msg("A1", NOON - MS_PER_DAY, b"x"), NOON).unwrap();
        archive.submit_at(&mut msg("A1", NOON, b"y"), NOON).unwrap();

        let mut raw = b"CE31A2B424045143000G44+0NN031EFF00012HELLO WORLD!".to_vec();
        raw[10..13].copy_from_slice(b"9X9");
        let mut bad = DcpMessage::decode_goes(&raw, NOON, MessageSource::GoesSelfTimed);
        assert_eq!(bad.transmit_time, 0);

        let id = archive.submit_at(&mut bad, NOON).unwrap();
        let stored = archive.read_message(DAY, id).unwrap().unwrap();
        assert_eq!(stored.address.as_str(), "CE31A2B4");
        assert_eq!(archive.directory().bound_days(), vec![DAY - 1, DAY]);
    }

    #[test]
    fn test_read_helpers() {
        let archive = archive(4);
        assert_eq!(archive.first_record_id(DAY).unwrap(), None);
        for (i, ch) in [(0, 7), (1, 8), (2, 7)] {
            let mut m = msg("A1", NOON + i * 1000, b"body bytes").with_channel(ch);
            archive.submit_at(&mut m, NOON).unwrap();
        }
        let mut other = msg("B2", NOON + 5000, b"z");
        archive.submit_at(&mut other, NOON).unwrap();

        assert_eq!(archive.first_record_id(DAY).unwrap(), Some(1));
        assert_eq!(archive.last_record_id(DAY).unwrap(), Some(4));
        assert_eq!(archive.latest_transmit_time(DAY).unwrap(), Some(NOON + 5000));

        let on_seven = archive.read_by_channel(DAY, 7).unwrap();
        assert_eq!(on_seven.len(), 2);
        assert!(on_seven.iter().all(|m| m.data == b"body bytes"));

        let index = AddressIndex::from_addresses([DcpAddress::new("B2")]);
        let from_b2 = archive.read_by_addresses(DAY, &index).unwrap();
        assert_eq!(from_b2.len(), 1);
        assert_eq!(from_b2[0].data, b"z");
        assert!(archive.read_by_channel(DAY + 1, 7).unwrap().is_empty());
    }

    #[test]
    fn test_find_transmission_spans_midnight() {
        let archive = archive(4);
        let midnight = (DAY + 1) as i64 * MS_PER_DAY;
        let now = midnight + MS_PER_DAY;
        for t in [midnight - 4_000, midnight + 3_000, midnight + 30_000] {
            archive.submit_at(&mut msg("A1", t, b"x"), now).unwrap();
        }

        let hit = archive
            .find_transmission(MessageSource::Goes, &DcpAddress::new("A1"), midnight + 1_000)
            .unwrap()
            .unwrap();
        assert_eq!(hit.transmit_time, midnight + 3_000);

        let hit = archive
            .find_transmission(MessageSource::Goes, &DcpAddress::new("A1"), midnight - 2_000)
            .unwrap()
            .unwrap();
        assert_eq!(hit.transmit_time, midnight - 4_000);

        assert!(archive
            .find_transmission(MessageSource::Iridium, &DcpAddress::new("A1"), midnight)
            .unwrap()
            .is_none());
        assert!(archive
            .find_transmission(MessageSource::Goes, &DcpAddress::new("A1"), midnight + 15_000)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_sweep_retention_uses_config() {
        let archive = archive(4);
        archive.submit_at(&mut msg("A1", NOON, b"x"), NOON).unwrap();
        assert_eq!(archive.sweep_retention(DAY + 10).unwrap(), 0);
        assert_eq!(archive.sweep_retention(DAY + 11).unwrap(), 1);
        assert!(archive.read_message(DAY, 1).unwrap().is_none());
        assert_eq!(
            archive.retention_manager().run_retention_check_at(DAY + 11).unwrap(),
            0
        );
    }
}
