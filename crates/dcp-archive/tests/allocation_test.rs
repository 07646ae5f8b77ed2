//! Property tests for partition allocation and eviction.

use dcp_archive::lifecycle::{Allocation, PartitionDirectory};
use dcp_archive::store::MemoryStore;
use dcp_archive::DayNumber;
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;

proptest! {
    #[test]
    fn test_allocation_matches_oldest_first_model(
        max in 1usize..6,
        days in proptest::collection::vec(0i32..40, 1..80),
    ) {
        let directory = PartitionDirectory::open(Arc::new(MemoryStore::new()), max).unwrap();
        let mut model: BTreeSet<DayNumber> = BTreeSet::new();

        for day in days {
            let expected_refusal = !model.contains(&day)
                && model.len() == max
                && model.first().is_some_and(|&oldest| day < oldest);

            match directory.get_or_allocate(day).unwrap() {
                Allocation::Bound(partition) => {
                    prop_assert!(!expected_refusal);
                    prop_assert_eq!(partition.day, day);
                    if !model.contains(&day) && model.len() == max {
                        model.pop_first();
                    }
                    model.insert(day);
                }
                Allocation::Refused { oldest } => {
                    prop_assert!(expected_refusal);
                    prop_assert_eq!(Some(&oldest), model.first());
                }
            }

            let bound = directory.bound_days();
            prop_assert!(bound.len() <= max);
            prop_assert_eq!(bound, model.iter().copied().collect::<Vec<_>>());
        }
    }
}

#[test]
fn test_allocation_is_idempotent_per_day() {
    let directory = PartitionDirectory::open(Arc::new(MemoryStore::new()), 3).unwrap();
    let first = directory.get_or_allocate(100).unwrap();
    let second = directory.get_or_allocate(100).unwrap();
    assert_eq!(first, second);
    assert_eq!(directory.bound_days(), vec![100]);
}

#[test]
fn test_concurrent_allocation_respects_bound() {
    let directory = Arc::new(PartitionDirectory::open(Arc::new(MemoryStore::new()), 4).unwrap());
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let directory = Arc::clone(&directory);
            std::thread::spawn(move || {
                for day in 0..20 {
                    directory.get_or_allocate(day * 8 + t).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let bound = directory.bound_days();
    assert_eq!(bound.len(), 4);
    let unique: BTreeSet<_> = bound.iter().collect();
    assert_eq!(unique.len(), 4);
}
