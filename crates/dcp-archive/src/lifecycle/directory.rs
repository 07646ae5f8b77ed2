//! Partition directory: binds day numbers to a fixed pool of storage slots.
//!
//! The directory owns every slot binding behind one `RwLock`. Allocation and
//! eviction take the write lock, so picking the oldest slot, clearing it and
//! rebinding it happen as one unit. Code that reads or writes a slot's rows
//! runs under the read lock through [`PartitionDirectory::with_partition`],
//! which keeps evictions from interleaving with it.
//!
//! Each slot carries an epoch that is bumped whenever its rows are cleared.
//! Cursors remember the epoch of the slot they are scanning and treat a
//! change as the partition having been reclaimed underneath them.
//!
//! # Examples
//! ```rust,ignore
//! use dcp_archive::lifecycle::{Allocation, PartitionDirectory};
//!
//! let directory = PartitionDirectory::open(store, 31)?;
//! match directory.get_or_allocate(day)? {
//!     Allocation::Bound(partition) => println!("day {} -> {}", day, partition.suffix),
//!     Allocation::Refused { oldest } => println!("day {} older than {}", day, oldest),
//! }
//! ```

use crate::error::{ArchiveError, Result};
use crate::lifecycle::partition::day_label;
use crate::message::DayNumber;
use crate::store::{PartitionStore, SlotRecord, WriteOp};
use std::collections::HashSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info, warn};

/// Attempts to pin a freshly allocated slot before giving up.
const MAX_ALLOCATION_ATTEMPTS: usize = 4;

/// A bound partition as seen at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionRef {
    /// Stable partition key passed to the store.
    pub suffix: String,
    /// Day the slot is bound to.
    pub day: DayNumber,
    /// Clear generation of the slot.
    pub epoch: u64,
}

/// Result of [`PartitionDirectory::get_or_allocate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Allocation {
    /// The day is bound to this partition.
    Bound(PartitionRef),
    /// Every slot is bound to a newer day; the requested day cannot be stored.
    Refused {
        /// Oldest day currently bound.
        oldest: DayNumber,
    },
}

#[derive(Debug)]
struct Slot {
    suffix: String,
    day: Option<DayNumber>,
    epoch: u64,
}

impl Slot {
    fn to_ref(&self) -> Option<PartitionRef> {
        self.day.map(|day| PartitionRef {
            suffix: self.suffix.clone(),
            day,
            epoch: self.epoch,
        })
    }
}

/// Maps day numbers onto a bounded pool of partition slots.
pub struct PartitionDirectory<S: PartitionStore> {
    store: Arc<S>,
    slots: RwLock<Vec<Slot>>,
}

impl<S: PartitionStore> PartitionDirectory<S> {
    /// Loads slot bindings from `store`, creating free slots up to
    /// `max_partitions`.
    ///
    /// # Errors
    ///
    /// Fails if the store already holds more slots than `max_partitions`, or
    /// if two slots claim the same day.
    pub fn open(store: Arc<S>, max_partitions: usize) -> Result<Self> {
        if max_partitions == 0 {
            return Err(ArchiveError::InvalidConfig(
                "max_partitions must be at least 1".to_string(),
            ));
        }

        let mut records = store.load_slots()?;
        records.sort_by(|a, b| a.suffix.cmp(&b.suffix));
        if records.len() > max_partitions {
            return Err(ArchiveError::InvalidConfig(format!(
                "store holds {} partitions but max_partitions is {}",
                records.len(),
                max_partitions
            )));
        }

        let mut seen_days = HashSet::new();
        for record in &records {
            if let Some(day) = record.day {
                if !seen_days.insert(day) {
                    return Err(ArchiveError::ArchiveUnavailable(format!(
                        "day {} is bound to more than one partition",
                        day
                    )));
                }
            }
        }

        let mut slots: Vec<Slot> = records
            .into_iter()
            .map(|r| Slot {
                suffix: r.suffix,
                day: r.day,
                epoch: 0,
            })
            .collect();

        let mut next = 0;
        while slots.len() < max_partitions {
            let suffix = format!("{:04}", next);
            next += 1;
            if slots.iter().any(|s| s.suffix == suffix) {
                continue;
            }
            store.save_slot(&SlotRecord {
                suffix: suffix.clone(),
                day: None,
            })?;
            slots.push(Slot {
                suffix,
                day: None,
                epoch: 0,
            });
        }

        debug!(
            "Opened partition directory with {} slots ({} bound)",
            slots.len(),
            seen_days.len()
        );

        Ok(Self {
            store,
            slots: RwLock::new(slots),
        })
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Number of slots in the pool.
    pub fn max_partitions(&self) -> usize {
        self.read_slots().len()
    }

    fn read_slots(&self) -> RwLockReadGuard<'_, Vec<Slot>> {
        self.slots.read().unwrap_or_else(|err| err.into_inner())
    }

    fn write_slots(&self) -> RwLockWriteGuard<'_, Vec<Slot>> {
        self.slots.write().unwrap_or_else(|err| err.into_inner())
    }

    /// Returns the partition bound to `day`, allocating or evicting if needed.
    ///
    /// 1. An existing binding is returned as is.
    /// 2. Otherwise the first free slot is bound and persisted.
    /// 3. Otherwise the slot bound to the oldest day is reclaimed: its rows
    ///    are deleted, its identifier generator restarts at 1 and it is
    ///    rebound. A day older than the oldest bound day is refused.
    pub fn get_or_allocate(&self, day: DayNumber) -> Result<Allocation> {
        let mut slots = self.write_slots();

        if let Some(existing) = slots.iter().find_map(|s| s.to_ref().filter(|r| r.day == day)) {
            return Ok(Allocation::Bound(existing));
        }

        if let Some(slot) = slots.iter_mut().find(|s| s.day.is_none()) {
            self.store.save_slot(&SlotRecord {
                suffix: slot.suffix.clone(),
                day: Some(day),
            })?;
            slot.day = Some(day);
            debug!("Bound free partition {} to {}", slot.suffix, day_label(day));
            return Ok(Allocation::Bound(PartitionRef {
                suffix: slot.suffix.clone(),
                day,
                epoch: slot.epoch,
            }));
        }

        let Some(oldest) = slots.iter_mut().filter(|s| s.day.is_some()).min_by_key(|s| s.day)
        else {
            return Err(ArchiveError::ArchiveUnavailable(
                "partition pool is empty".to_string(),
            ));
        };
        let oldest_day = oldest.day.unwrap_or(day);
        if day < oldest_day {
            warn!(
                "Refusing day {}: older than oldest retained day {}",
                day_label(day),
                day_label(oldest_day)
            );
            return Ok(Allocation::Refused { oldest: oldest_day });
        }

        info!(
            "Evicting partition {} ({}) to make room for {}",
            oldest.suffix,
            day_label(oldest_day),
            day_label(day)
        );
        self.clear_slot(oldest, Some(day))?;
        Ok(Allocation::Bound(PartitionRef {
            suffix: oldest.suffix.clone(),
            day,
            epoch: oldest.epoch,
        }))
    }

    /// Returns the partition bound to `day` without allocating.
    pub fn lookup(&self, day: DayNumber) -> Option<PartitionRef> {
        self.read_slots()
            .iter()
            .find_map(|s| s.to_ref().filter(|r| r.day == day))
    }

    /// Bound day numbers in ascending order.
    pub fn bound_days(&self) -> Vec<DayNumber> {
        let mut days: Vec<_> = self.read_slots().iter().filter_map(|s| s.day).collect();
        days.sort_unstable();
        days
    }

    /// Oldest bound day.
    pub fn oldest_bound(&self) -> Option<DayNumber> {
        self.read_slots().iter().filter_map(|s| s.day).min()
    }

    /// Current epoch of the slot with `suffix`.
    pub fn epoch_of(&self, suffix: &str) -> Option<u64> {
        self.read_slots()
            .iter()
            .find(|s| s.suffix == suffix)
            .map(|s| s.epoch)
    }

    /// Evicts every slot more than `retention_days` behind `today`.
    ///
    /// A slot that fails to clear is logged and skipped. Returns the number of
    /// slots evicted.
    pub fn sweep_retention(&self, today: DayNumber, retention_days: u32) -> Result<usize> {
        self.sweep_where(|day| i64::from(today) - i64::from(day) > i64::from(retention_days))
    }

    /// Evicts every bound slot whose day satisfies `expired`.
    pub fn sweep_where(&self, expired: impl Fn(DayNumber) -> bool) -> Result<usize> {
        let mut slots = self.write_slots();
        let mut evicted = 0;

        for slot in slots.iter_mut() {
            let Some(day) = slot.day else {
                continue;
            };
            if !expired(day) {
                continue;
            }
            match self.clear_slot(slot, None) {
                Ok(()) => {
                    info!("Retention dropped partition {} ({})", slot.suffix, day_label(day));
                    evicted += 1;
                }
                Err(err) => {
                    error!(
                        "Retention drop failed for partition {} ({}): {:?}",
                        slot.suffix,
                        day_label(day),
                        err
                    );
                }
            }
        }

        Ok(evicted)
    }

    /// Deletes a slot's rows, restarts its generator and rebinds it.
    ///
    /// The epoch is bumped as soon as rows are gone, even if a later step
    /// fails.
    fn clear_slot(&self, slot: &mut Slot, new_day: Option<DayNumber>) -> Result<()> {
        self.store.apply(&slot.suffix, vec![WriteOp::Clear])?;
        slot.epoch += 1;
        self.store.reset_identifier_generator(&slot.suffix)?;
        self.store.save_slot(&SlotRecord {
            suffix: slot.suffix.clone(),
            day: new_day,
        })?;
        slot.day = new_day;
        Ok(())
    }

    /// Runs `f` against the partition bound to `day` while holding the
    /// directory read lock. Returns `None` if the day is not bound.
    pub fn with_partition<T>(
        &self,
        day: DayNumber,
        f: impl FnOnce(&PartitionRef, &S) -> Result<T>,
    ) -> Result<Option<T>> {
        let slots = self.read_slots();
        match slots.iter().find_map(|s| s.to_ref().filter(|r| r.day == day)) {
            Some(partition) => f(&partition, &self.store).map(Some),
            None => Ok(None),
        }
    }

    /// Like [`PartitionDirectory::with_partition`], allocating the day first
    /// if needed.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::DayRefused`] if the day cannot be allocated.
    pub fn with_allocated<T>(
        &self,
        day: DayNumber,
        f: impl FnOnce(&PartitionRef, &S) -> Result<T>,
    ) -> Result<T> {
        for _ in 0..MAX_ALLOCATION_ATTEMPTS {
            {
                let slots = self.read_slots();
                if let Some(partition) =
                    slots.iter().find_map(|s| s.to_ref().filter(|r| r.day == day))
                {
                    return f(&partition, &self.store);
                }
            }
            if let Allocation::Refused { oldest } = self.get_or_allocate(day)? {
                return Err(ArchiveError::DayRefused { day, oldest });
            }
        }
        Err(ArchiveError::ArchiveUnavailable(format!(
            "partition for {} was reclaimed before it could be written",
            day_label(day)
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{DcpAddress, DcpMessage, MessageSource};
    use crate::store::{MemoryStore, MessageQuery};

    fn directory(max: usize) -> PartitionDirectory<MemoryStore> {
        PartitionDirectory::open(Arc::new(MemoryStore::new()), max).unwrap()
    }

    fn bound(allocation: Allocation) -> PartitionRef {
        match allocation {
            Allocation::Bound(partition) => partition,
            Allocation::Refused { oldest } => panic!("refused, oldest {oldest}"),
        }
    }

    fn put(directory: &PartitionDirectory<MemoryStore>, day: DayNumber) {
        directory
            .with_allocated(day, |partition, store| {
                let mut msg = DcpMessage::new(
                    MessageSource::Other,
                    DcpAddress::new("CE31A2B4"),
                    crate::lifecycle::day_start(day),
                    b"x".to_vec(),
                );
                msg.record_id = Some(store.next_record_id(&partition.suffix)?);
                store.insert(&partition.suffix, msg)
            })
            .unwrap();
    }

    #[test]
    fn test_open_creates_free_slots() {
        let store = Arc::new(MemoryStore::new());
        let directory = PartitionDirectory::open(Arc::clone(&store), 3).unwrap();
        assert_eq!(directory.max_partitions(), 3);
        assert!(directory.bound_days().is_empty());
        let suffixes: Vec<_> = store.load_slots().unwrap().into_iter().map(|s| s.suffix).collect();
        assert_eq!(suffixes, vec!["0000", "0001", "0002"]);
    }

    #[test]
    fn test_existing_binding_reused() {
        let directory = directory(2);
        let first = bound(directory.get_or_allocate(100).unwrap());
        let again = bound(directory.get_or_allocate(100).unwrap());
        assert_eq!(first, again);
    }

    #[test]
    fn test_evicts_oldest_and_resets_ids() {
        let directory = directory(2);
        put(&directory, 100);
        put(&directory, 100);
        put(&directory, 101);
        let old = directory.lookup(100).unwrap();

        let new = bound(directory.get_or_allocate(102).unwrap());
        assert_eq!(new.suffix, old.suffix);
        assert_eq!(new.epoch, old.epoch + 1);
        assert_eq!(directory.bound_days(), vec![101, 102]);
        assert!(directory.lookup(100).is_none());

        let store = directory.store();
        assert!(store
            .query_messages(&new.suffix, &MessageQuery::all())
            .unwrap()
            .is_empty());
        assert_eq!(store.next_record_id(&new.suffix).unwrap(), 1);
        assert_eq!(
            store.load_slots().unwrap().iter().find(|s| s.suffix == new.suffix).unwrap().day,
            Some(102)
        );
    }

    #[test]
    fn test_refuses_day_older_than_oldest() {
        let directory = directory(2);
        bound(directory.get_or_allocate(50).unwrap());
        bound(directory.get_or_allocate(60).unwrap());
        assert_eq!(
            directory.get_or_allocate(49).unwrap(),
            Allocation::Refused { oldest: 50 }
        );
        assert_eq!(directory.bound_days(), vec![50, 60]);

        let err = directory.with_allocated(10, |_, _| Ok(())).unwrap_err();
        assert!(matches!(err, ArchiveError::DayRefused { day: 10, oldest: 50 }));
    }

    #[test]
    fn test_sweep_retention_frees_slots() {
        let directory = directory(4);
        for day in [10, 15, 19, 20] {
            put(&directory, day);
        }
        let evicted = directory.sweep_retention(20, 5).unwrap();
        assert_eq!(evicted, 1);
        assert_eq!(directory.bound_days(), vec![15, 19, 20]);

        // The freed slot takes the next new day without evicting anything.
        bound(directory.get_or_allocate(21).unwrap());
        assert_eq!(directory.bound_days(), vec![15, 19, 20, 21]);
    }

    #[test]
    fn test_reopen_restores_bindings() {
        let store = Arc::new(MemoryStore::new());
        {
            let directory = PartitionDirectory::open(Arc::clone(&store), 3).unwrap();
            bound(directory.get_or_allocate(7).unwrap());
        }
        let directory = PartitionDirectory::open(Arc::clone(&store), 3).unwrap();
        assert_eq!(directory.bound_days(), vec![7]);
        assert!(PartitionDirectory::open(store, 2).is_err());
    }

    #[test]
    fn test_with_partition_unbound_is_none() {
        let directory = directory(1);
        assert_eq!(directory.with_partition(5, |_, _| Ok(1)).unwrap(), None);
        bound(directory.get_or_allocate(5).unwrap());
        assert_eq!(directory.with_partition(5, |_, _| Ok(1)).unwrap(), Some(1));
    }
}
