//! Correlation Table
//!
//! Maps the opaque token handed to a gateway back to the record index it
//! was issued for. Tokens come from a monotonic counter that is never reset,
//! so an acknowledgement left over from an earlier run can never resolve to
//! a record of the current one once the table has been cleared.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use sms_common::CorrelationToken;

#[derive(Debug, Default)]
pub struct CorrelationTable {
    next_token: AtomicU64,
    entries: DashMap<CorrelationToken, usize>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh token for `record_index`
    pub fn issue(&self, record_index: usize) -> CorrelationToken {
        let token = CorrelationToken(self.next_token.fetch_add(1, Ordering::SeqCst) + 1);
        self.entries.insert(token, record_index);
        token
    }

    pub fn resolve(&self, token: CorrelationToken) -> Option<usize> {
        self.entries.get(&token).map(|entry| *entry)
    }

    /// Forget every issued token. Called when a new run starts.
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
