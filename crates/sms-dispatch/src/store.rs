//! Record Store
//!
//! Ordered, shared collection of dispatch records. The dispatch engine and
//! the acknowledgement listener write to it; presentation code reads
//! snapshots and watches the change counter.
//!
//! Every status change is a read-check-write under a single write lock, so
//! a record's status and timestamp are always observed together and the
//! lifecycle guard in [`DispatchStatus::can_transition_to`] cannot be
//! bypassed by two acknowledgements racing each other.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::NaiveDateTime;
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::debug;

use sms_common::{
    DeliveredResult, DispatchRecord, DispatchStatus, DispatchSummary, ErrorReason, SentResult,
};

use crate::{DispatchError, Result};

/// Cheaply cloneable handle to a shared record collection
#[derive(Clone)]
pub struct RecordStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    records: RwLock<Vec<DispatchRecord>>,
    run_active: AtomicBool,
    version: watch::Sender<u64>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::with_records(Vec::new())
    }

    pub fn with_records(records: Vec<DispatchRecord>) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            inner: Arc::new(StoreInner {
                records: RwLock::new(records),
                run_active: AtomicBool::new(false),
                version,
            }),
        }
    }

    /// Replace the whole collection. Refused while a run holds the store.
    pub fn replace_all(&self, records: Vec<DispatchRecord>) -> Result<()> {
        if self.is_run_active() {
            return Err(DispatchError::RunInProgress);
        }
        *self.inner.records.write() = records;
        self.inner.notify();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.inner.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.records.read().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<DispatchRecord> {
        self.inner.records.read().get(index).cloned()
    }

    /// Consistent point-in-time copy of every record
    pub fn snapshot(&self) -> Vec<DispatchRecord> {
        self.inner.records.read().clone()
    }

    pub fn summary(&self) -> DispatchSummary {
        DispatchSummary::from_records(&self.inner.records.read())
    }

    /// Whether every record in `range` has reached a terminal status
    pub fn all_terminal(&self, range: Range<usize>) -> bool {
        let records = self.inner.records.read();
        records
            .get(range)
            .map(|slice| slice.iter().all(|r| r.status.is_terminal()))
            .unwrap_or(false)
    }

    /// Move the record at `index` to `status` if the lifecycle allows it.
    ///
    /// `timestamp`, when given, is written in the same critical section.
    /// Returns `Ok(false)` when the transition is not allowed; the record
    /// is left untouched in that case.
    pub fn set_status(
        &self,
        index: usize,
        status: DispatchStatus,
        timestamp: Option<NaiveDateTime>,
    ) -> Result<bool> {
        let applied = {
            let mut records = self.inner.records.write();
            let record = records
                .get_mut(index)
                .ok_or(DispatchError::IndexOutOfRange(index))?;

            if record.status.can_transition_to(&status) {
                record.status = status;
                if timestamp.is_some() {
                    record.sent_at = timestamp;
                }
                true
            } else {
                debug!(
                    index,
                    current = %record.status,
                    rejected = %status,
                    "Ignoring disallowed status transition"
                );
                false
            }
        };

        if applied {
            self.inner.notify();
        }
        Ok(applied)
    }

    pub fn mark_sending(&self, index: usize, at: NaiveDateTime) -> Result<bool> {
        self.set_status(index, DispatchStatus::Sending, Some(at))
    }

    pub fn mark_failed(&self, index: usize, reason: ErrorReason, at: NaiveDateTime) -> Result<bool> {
        self.set_status(index, DispatchStatus::Error(reason), Some(at))
    }

    pub fn apply_sent(&self, index: usize, result: SentResult, at: NaiveDateTime) -> Result<bool> {
        self.set_status(index, result.into_status(), Some(at))
    }

    /// Delivery reports keep the sent timestamp
    pub fn apply_delivered(&self, index: usize, result: DeliveredResult) -> Result<bool> {
        self.set_status(index, result.into_status(), None)
    }

    /// Change counter, bumped after every mutation
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.version.subscribe()
    }

    pub fn is_run_active(&self) -> bool {
        self.inner.run_active.load(Ordering::SeqCst)
    }

    /// Claim the store for a dispatch run. The collection cannot be replaced
    /// until the returned guard is dropped.
    pub fn begin_run(&self) -> Result<RunGuard> {
        self.inner
            .run_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| DispatchError::RunInProgress)?;
        Ok(RunGuard { inner: Arc::clone(&self.inner) })
    }
}

impl StoreInner {
    fn notify(&self) {
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("len", &self.len())
            .field("run_active", &self.is_run_active())
            .finish()
    }
}

/// Exclusive claim on a store for the duration of a run
pub struct RunGuard {
    inner: Arc<StoreInner>,
}

impl RunGuard {
    /// Load a new record set on behalf of the run that holds the store
    pub fn replace_all(&self, records: Vec<DispatchRecord>) {
        *self.inner.records.write() = records;
        self.inner.notify();
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.inner.run_active.store(false, Ordering::SeqCst);
    }
}
