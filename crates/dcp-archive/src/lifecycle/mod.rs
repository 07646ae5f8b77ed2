//! Partition lifecycle: day numbering, slot allocation and retention.

pub mod directory;
pub mod partition;
pub mod retention;

pub use directory::{Allocation, PartitionDirectory, PartitionRef};
pub use partition::{current_timestamp_millis, day_label, day_start, today};
pub use retention::{DaysRetentionPolicy, RetentionHandle, RetentionManager, RetentionPolicy};
