//! Incremental retrieval over the partitioned archive.
//!
//! A [`Cursor`] walks bound days in ascending order and, within a partition,
//! record ids in ascending order. Each [`Cursor::poll`] examines a bounded
//! number of candidates and reports exactly one [`PollOutcome`].
//!
//! # Examples
//! ```rust,ignore
//! let mut cursor = archive.open_cursor(criteria, index)?;
//! loop {
//!     match cursor.poll(Instant::now() + Duration::from_secs(1))? {
//!         PollOutcome::Found(msg) => forward(&msg),
//!         PollOutcome::RetryLater => thread::sleep(Duration::from_secs(1)),
//!         PollOutcome::UntilReached | PollOutcome::EndOfArchive => break,
//!     }
//! }
//! cursor.close();
//! ```

use crate::chunk::ChunkedBodyStore;
use crate::criteria::{Matcher, SearchCriteria};
use crate::error::{ArchiveError, Result};
use crate::lifecycle::partition::{current_timestamp_millis, day_label};
use crate::lifecycle::{PartitionDirectory, PartitionRef};
use crate::message::{day_of, DayNumber, DcpMessage, RecordId, Timestamp};
use crate::netlist::AddressIndex;
use crate::store::{MessageQuery, PartitionStore};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Default number of candidates examined per poll.
pub const DEFAULT_SCAN_BUDGET: usize = 10_000;

/// Messages received more recently than this are held back when the
/// real-time settle delay is requested.
pub const SETTLE_DELAY_MS: i64 = 30_000;

/// Rows fetched per read of a partition.
const SCAN_BATCH: usize = 256;

/// Result of one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// A matching message, with its body reassembled.
    Found(Box<DcpMessage>),
    /// Nothing new yet; poll again after a pause.
    RetryLater,
    /// A message past the until bound was reached. Terminal.
    UntilReached,
    /// No retained or future partition can satisfy the criteria. Terminal.
    EndOfArchive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Terminal {
    UntilReached,
    EndOfArchive,
}

impl From<Terminal> for PollOutcome {
    fn from(terminal: Terminal) -> Self {
        match terminal {
            Terminal::UntilReached => PollOutcome::UntilReached,
            Terminal::EndOfArchive => PollOutcome::EndOfArchive,
        }
    }
}

/// Where the cursor stands: the day being scanned, the last record id
/// consumed there, and the slot epoch observed on first read.
#[derive(Debug, Clone, Copy)]
struct Position {
    day: DayNumber,
    after: Option<RecordId>,
    epoch: Option<u64>,
}

impl Position {
    fn start_of(day: DayNumber) -> Self {
        Self {
            day,
            after: None,
            epoch: None,
        }
    }
}

enum Step {
    Found(Box<DcpMessage>),
    Settling,
    UntilReached,
    /// Batch consumed without a result; more rows may follow.
    Continue,
    /// No rows remain after the position.
    Exhausted,
    OutOfBudget,
}

/// A consumer's position plus its bound criteria.
///
/// Owned and advanced by one consumer at a time. Many cursors may run
/// against the same directory concurrently.
pub struct Cursor<S: PartitionStore> {
    directory: Arc<PartitionDirectory<S>>,
    bodies: ChunkedBodyStore,
    matcher: Matcher,
    lrgs_since: Option<Timestamp>,
    lrgs_until: Option<Timestamp>,
    position: Position,
    scan_budget: usize,
    terminal: Option<Terminal>,
}

impl<S: PartitionStore> Cursor<S> {
    /// Opens a cursor, resolving relative time bounds against `now`.
    ///
    /// The scan starts at the day of the transmit-time lower bound, or at the
    /// oldest retained day. Receipt-time bounds never narrow the days
    /// scanned: a late relay can land long after its transmit day.
    pub fn open(
        directory: Arc<PartitionDirectory<S>>,
        bodies: ChunkedBodyStore,
        criteria: Arc<SearchCriteria>,
        index: AddressIndex,
        now: Timestamp,
    ) -> Self {
        let lrgs_since = criteria.lrgs_since.map(|t| t.evaluate(now));
        let lrgs_until = criteria.lrgs_until.map(|t| t.evaluate(now));
        let matcher = Matcher::new(criteria, index, now);

        let start_day = matcher.daps_since().map_or(DayNumber::MIN, day_of);
        debug!("Opened cursor starting at day {}", start_day);

        Self {
            directory,
            bodies,
            matcher,
            lrgs_since,
            lrgs_until,
            position: Position::start_of(start_day),
            scan_budget: DEFAULT_SCAN_BUDGET,
            terminal: None,
        }
    }

    /// Sets the number of candidates examined per poll (at least 1).
    pub fn with_scan_budget(mut self, budget: usize) -> Self {
        self.scan_budget = budget.max(1);
        self
    }

    /// The compiled criteria.
    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    /// Advances to the next matching message, returning before `deadline`
    /// or once the scan budget is spent.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::ArchiveUnavailable`] if the partition being
    /// scanned was reclaimed. The cursor should be closed and reopened.
    pub fn poll(&mut self, deadline: Instant) -> Result<PollOutcome> {
        self.poll_at(deadline, current_timestamp_millis()?)
    }

    /// Like [`Cursor::poll`], with the wall clock fixed at `now`.
    pub fn poll_at(&mut self, deadline: Instant, now: Timestamp) -> Result<PollOutcome> {
        if let Some(terminal) = self.terminal {
            return Ok(terminal.into());
        }

        let directory = Arc::clone(&self.directory);
        let mut examined = 0;
        loop {
            let Some(day) = self.current_day(&directory)? else {
                return Ok(self.end_of_scan(now));
            };

            let step = directory
                .with_partition(day, |partition, store| {
                    self.scan(partition, store, now, deadline, &mut examined)
                })?
                .ok_or_else(|| self.reclaimed(day))?;

            match step {
                Step::Found(msg) => return Ok(PollOutcome::Found(msg)),
                Step::Settling | Step::OutOfBudget => return Ok(PollOutcome::RetryLater),
                Step::UntilReached => {
                    debug!("Cursor reached its until bound in {}", day_label(day));
                    self.terminal = Some(Terminal::UntilReached);
                    return Ok(PollOutcome::UntilReached);
                }
                Step::Continue => {}
                Step::Exhausted => {
                    let next = directory.bound_days().into_iter().find(|&d| d > day);
                    match next {
                        Some(next) => self.position = Position::start_of(next),
                        None => return Ok(self.end_of_scan(now)),
                    }
                }
            }
        }
    }

    /// Closes the cursor.
    pub fn close(self) {
        debug!(
            "Closed cursor at day {} after record {:?}",
            self.position.day, self.position.after
        );
    }

    /// Picks the day to scan, checking that a slot already read from is
    /// still bound with the same epoch.
    fn current_day(&mut self, directory: &PartitionDirectory<S>) -> Result<Option<DayNumber>> {
        if let Some(epoch) = self.position.epoch {
            return match directory.lookup(self.position.day) {
                Some(partition) if partition.epoch == epoch => Ok(Some(self.position.day)),
                _ => Err(self.reclaimed(self.position.day)),
            };
        }

        let day = self.position.day;
        let next = directory.bound_days().into_iter().find(|&d| d >= day);
        if let Some(next) = next {
            if next != day {
                self.position = Position::start_of(next);
            }
        }
        Ok(next)
    }

    fn scan(
        &mut self,
        partition: &PartitionRef,
        store: &S,
        now: Timestamp,
        deadline: Instant,
        examined: &mut usize,
    ) -> Result<Step> {
        match self.position.epoch {
            Some(epoch) if epoch != partition.epoch => return Err(self.reclaimed(partition.day)),
            Some(_) => {}
            None => self.position.epoch = Some(partition.epoch),
        }

        let mut query = MessageQuery::all().limit(SCAN_BATCH);
        if let Some(after) = self.position.after {
            query = query.after(after);
        }
        let rows = store.query_messages(&partition.suffix, &query)?;
        if rows.is_empty() {
            return Ok(Step::Exhausted);
        }
        let full_batch = rows.len() == SCAN_BATCH;

        let criteria = self.matcher.criteria();
        let settle = criteria.realtime_settle && !criteria.has_until();
        let daps_until = self.matcher.daps_until();

        for row in rows {
            if settle && row.local_recv_time > now - SETTLE_DELAY_MS {
                return Ok(Step::Settling);
            }
            if daps_until.is_some_and(|until| row.transmit_time > until) {
                return Ok(Step::UntilReached);
            }

            self.position.after = row.record_id;
            *examined += 1;

            let received_in_window = self
                .lrgs_since
                .map_or(true, |since| row.local_recv_time >= since)
                && self
                    .lrgs_until
                    .map_or(true, |until| row.local_recv_time <= until);
            if received_in_window && self.matcher.test(&row) {
                let body = self.bodies.reconstruct(store, &partition.suffix, &row)?;
                let mut msg = row;
                msg.data = body.into_bytes();
                return Ok(Step::Found(Box::new(msg)));
            }

            if *examined >= self.scan_budget || Instant::now() >= deadline {
                return Ok(Step::OutOfBudget);
            }
        }

        Ok(if full_batch {
            Step::Continue
        } else {
            Step::Exhausted
        })
    }

    /// Outcome when no rows remain anywhere: the archive is finished for
    /// this cursor once an until bound has passed, otherwise try later.
    fn end_of_scan(&mut self, now: Timestamp) -> PollOutcome {
        let until = self.matcher.daps_until().or(self.lrgs_until);
        match until {
            Some(until) if until < now => {
                debug!("Cursor reached end of archive (until {} < now {})", until, now);
                self.terminal = Some(Terminal::EndOfArchive);
                PollOutcome::EndOfArchive
            }
            _ => PollOutcome::RetryLater,
        }
    }

    fn reclaimed(&self, day: DayNumber) -> ArchiveError {
        warn!("Partition for {} was reclaimed under a cursor", day_label(day));
        ArchiveError::ArchiveUnavailable(format!(
            "partition for {} was reclaimed during retrieval",
            day_label(day)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criteria::TimeSpec;
    use crate::message::{DcpAddress, MessageSource, MS_PER_DAY};
    use crate::store::MemoryStore;
    use std::time::Duration;

    const DAY: DayNumber = 19_767;
    const NOON: Timestamp = DAY as i64 * MS_PER_DAY + MS_PER_DAY / 2;

    struct Fixture {
        directory: Arc<PartitionDirectory<MemoryStore>>,
        bodies: ChunkedBodyStore,
    }

    impl Fixture {
        fn new(max: usize) -> Self {
            Self {
                directory: Arc::new(PartitionDirectory::open(Arc::new(MemoryStore::new()), max).unwrap()),
                bodies: ChunkedBodyStore::new(4, 4),
            }
        }

        fn put(&self, address: &str, transmit_time: Timestamp, recv: Timestamp, body: &[u8]) {
            let mut msg = DcpMessage::new(
                MessageSource::Goes,
                DcpAddress::new(address),
                transmit_time,
                body.to_vec(),
            )
            .with_local_recv_time(recv);
            self.directory
                .with_allocated(day_of(transmit_time), |partition, store| {
                    msg.record_id = Some(store.next_record_id(&partition.suffix)?);
                    self.bodies.store(store, &partition.suffix, &msg, false)
                })
                .unwrap();
        }

        fn cursor(&self, criteria: SearchCriteria, now: Timestamp) -> Cursor<MemoryStore> {
            Cursor::open(
                Arc::clone(&self.directory),
                self.bodies,
                Arc::new(criteria),
                AddressIndex::unrestricted(),
                now,
            )
        }
    }

    fn later() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    fn found_time(outcome: PollOutcome) -> Timestamp {
        match outcome {
            PollOutcome::Found(msg) => msg.transmit_time,
            other => panic!("expected Found, got {:?}", other),
        }
    }

    #[test]
    fn test_found_reassembles_body() {
        let fx = Fixture::new(4);
        fx.put("A1", NOON, NOON, b"a long body spanning chunks");
        let mut cursor = fx.cursor(SearchCriteria::default(), NOON + MS_PER_DAY);
        match cursor.poll_at(later(), NOON + MS_PER_DAY).unwrap() {
            PollOutcome::Found(msg) => assert_eq!(msg.data, b"a long body spanning chunks"),
            other => panic!("expected Found, got {:?}", other),
        }
        assert_eq!(
            cursor.poll_at(later(), NOON + MS_PER_DAY).unwrap(),
            PollOutcome::RetryLater
        );
    }

    #[test]
    fn test_walks_days_in_order() {
        let fx = Fixture::new(4);
        fx.put("A1", NOON + MS_PER_DAY, NOON + MS_PER_DAY, b"b");
        fx.put("A1", NOON, NOON, b"a");
        let now = NOON + 3 * MS_PER_DAY;
        let mut cursor = fx.cursor(SearchCriteria::default(), now);
        assert_eq!(found_time(cursor.poll_at(later(), now).unwrap()), NOON);
        assert_eq!(
            found_time(cursor.poll_at(later(), now).unwrap()),
            NOON + MS_PER_DAY
        );
        assert_eq!(cursor.poll_at(later(), now).unwrap(), PollOutcome::RetryLater);
    }

    #[test]
    fn test_settle_delay_holds_position() {
        let fx = Fixture::new(4);
        fx.put("A1", NOON, NOON, b"a");
        let criteria = SearchCriteria {
            realtime_settle: true,
            ..SearchCriteria::default()
        };
        let mut cursor = fx.cursor(criteria, NOON);
        assert_eq!(
            cursor.poll_at(later(), NOON + 1_000).unwrap(),
            PollOutcome::RetryLater
        );
        assert_eq!(
            found_time(cursor.poll_at(later(), NOON + SETTLE_DELAY_MS + 1).unwrap()),
            NOON
        );
    }

    #[test]
    fn test_scan_budget_yields_retry() {
        let fx = Fixture::new(4);
        for i in 0..5 {
            fx.put("A1", NOON + i, NOON + i, b"x");
        }
        fx.put("B2", NOON + 10, NOON + 10, b"y");
        let criteria = SearchCriteria::default().with_address("B2");
        let mut cursor = Cursor::open(
            Arc::clone(&fx.directory),
            fx.bodies,
            Arc::new(criteria),
            AddressIndex::from_addresses([DcpAddress::new("B2")]),
            NOON,
        )
        .with_scan_budget(2);

        let now = NOON + MS_PER_DAY;
        assert_eq!(cursor.poll_at(later(), now).unwrap(), PollOutcome::RetryLater);
        assert_eq!(cursor.poll_at(later(), now).unwrap(), PollOutcome::RetryLater);
        assert_eq!(found_time(cursor.poll_at(later(), now).unwrap()), NOON + 10);
    }

    #[test]
    fn test_lrgs_since_filters_by_receipt() {
        let fx = Fixture::new(4);
        fx.put("A1", NOON, NOON, b"old");
        fx.put("A1", NOON + 1, NOON + 60_000, b"new");
        let criteria = SearchCriteria::default()
            .with_lrgs_window(Some(TimeSpec::Absolute(NOON + 30_000)), None);
        let now = NOON + MS_PER_DAY;
        let mut cursor = fx.cursor(criteria, now);
        assert_eq!(found_time(cursor.poll_at(later(), now).unwrap()), NOON + 1);
    }

    #[test]
    fn test_late_relay_found_by_receipt_window() {
        let fx = Fixture::new(8);
        let now = NOON + 3 * MS_PER_DAY;
        fx.put("A1", NOON, now - 1_000, b"late");
        fx.put("A1", now - 2_000, now - 2_000, b"fresh");
        let criteria =
            SearchCriteria::default().with_lrgs_window(Some(TimeSpec::Absolute(now - 60_000)), None);
        let mut cursor = fx.cursor(criteria, now);
        assert_eq!(found_time(cursor.poll_at(later(), now).unwrap()), NOON);
        assert_eq!(found_time(cursor.poll_at(later(), now).unwrap()), now - 2_000);
        assert_eq!(cursor.poll_at(later(), now).unwrap(), PollOutcome::RetryLater);
    }

    #[test]
    fn test_receipt_until_filters_without_terminating() {
        let fx = Fixture::new(8);
        fx.put("A1", NOON, NOON + MS_PER_DAY, b"relayed after bound");
        fx.put("A1", NOON + MS_PER_DAY, NOON + MS_PER_DAY, b"also after");
        fx.put("A1", NOON + MS_PER_DAY + 1, NOON + 1_000, b"within");
        let criteria =
            SearchCriteria::default().with_lrgs_window(None, Some(TimeSpec::Absolute(NOON + 10_000)));
        let now = NOON + 2 * MS_PER_DAY;
        let mut cursor = fx.cursor(criteria, now);
        assert_eq!(found_time(cursor.poll_at(later(), now).unwrap()), NOON + MS_PER_DAY + 1);
        assert_eq!(cursor.poll_at(later(), now).unwrap(), PollOutcome::EndOfArchive);
    }

    #[test]
    fn test_terminal_outcomes_stick() {
        let fx = Fixture::new(4);
        fx.put("A1", NOON, NOON, b"a");
        let criteria = SearchCriteria::default()
            .with_daps_window(None, Some(TimeSpec::Absolute(NOON + 1_000)));
        let now = NOON + MS_PER_DAY;
        let mut cursor = fx.cursor(criteria, now);
        assert_eq!(found_time(cursor.poll_at(later(), now).unwrap()), NOON);
        assert_eq!(cursor.poll_at(later(), now).unwrap(), PollOutcome::EndOfArchive);

        fx.put("A1", NOON + 500, NOON + 500, b"late");
        assert_eq!(cursor.poll_at(later(), now).unwrap(), PollOutcome::EndOfArchive);
    }

    #[test]
    fn test_reclaimed_partition_is_unavailable() {
        let fx = Fixture::new(1);
        fx.put("A1", NOON, NOON, b"a");
        fx.put("A1", NOON + 1, NOON + 1, b"b");
        let now = NOON + 5 * MS_PER_DAY;
        let mut cursor = fx.cursor(SearchCriteria::default(), now);
        assert_eq!(found_time(cursor.poll_at(later(), now).unwrap()), NOON);

        fx.put("A1", NOON + MS_PER_DAY, NOON + MS_PER_DAY, b"c");
        assert!(matches!(
            cursor.poll_at(later(), now),
            Err(ArchiveError::ArchiveUnavailable(_))
        ));
    }
}
