//! Retention policy and manager for day-based partition eviction.

use crate::error::Result;
use crate::lifecycle::directory::PartitionDirectory;
use crate::lifecycle::partition::today;
use crate::message::DayNumber;
use crate::store::PartitionStore;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error};

/// Retention policy for determining expired partitions.
pub trait RetentionPolicy: Send + Sync {
    /// Returns the retention window in days.
    fn retention_days(&self) -> u32;

    /// Returns true if a partition for `day` is expired on `today`.
    fn is_expired(&self, day: DayNumber, today: DayNumber) -> bool {
        i64::from(today) - i64::from(day) > i64::from(self.retention_days())
    }
}

/// Keeps a fixed number of days.
#[derive(Debug, Clone)]
pub struct DaysRetentionPolicy {
    days: u32,
}

impl DaysRetentionPolicy {
    /// Creates a policy keeping `days` days behind today.
    pub fn new(days: u32) -> Self {
        Self { days }
    }
}

impl RetentionPolicy for DaysRetentionPolicy {
    fn retention_days(&self) -> u32 {
        self.days
    }
}

/// Retention manager for proactive partition eviction.
///
/// Runs independently of allocation pressure: an expired partition is
/// dropped even when free slots remain.
pub struct RetentionManager<P: RetentionPolicy, S: PartitionStore> {
    policy: P,
    directory: Arc<PartitionDirectory<S>>,
}

impl<P: RetentionPolicy + 'static, S: PartitionStore + 'static> RetentionManager<P, S> {
    /// Creates a new retention manager.
    pub fn new(policy: P, directory: Arc<PartitionDirectory<S>>) -> Self {
        Self { policy, directory }
    }

    /// Runs a retention check against today's date.
    pub fn run_retention_check(&self) -> Result<usize> {
        self.run_retention_check_at(today()?)
    }

    /// Runs a retention check as of `today` and returns the number of
    /// partitions dropped.
    pub fn run_retention_check_at(&self, today: DayNumber) -> Result<usize> {
        let dropped = self
            .directory
            .sweep_where(|day| self.policy.is_expired(day, today))?;
        debug!("Retention check for day {} dropped {} partitions", today, dropped);
        Ok(dropped)
    }

    /// Runs retention checks every `interval` on a background thread.
    ///
    /// The thread stops when the returned handle is dropped or stopped.
    pub fn spawn(self, interval: Duration) -> RetentionHandle {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let thread = thread::spawn(move || loop {
            if let Err(err) = self.run_retention_check() {
                error!("Retention check failed: {:?}", err);
            }
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });
        RetentionHandle {
            stop: Some(stop_tx),
            thread: Some(thread),
        }
    }
}

/// Handle to a background retention thread.
#[derive(Debug)]
pub struct RetentionHandle {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl RetentionHandle {
    /// Stops the thread and waits for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the sender wakes the thread.
        self.stop.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Retention thread panicked");
            }
        }
    }
}

impl Drop for RetentionHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
