//! Chunk planning and per-run batch settings

use std::ops::Range;
use std::time::Duration;

use sms_config::{DispatchConfig, BATCH_SIZE_RANGE, INTER_MESSAGE_DELAY_MS_RANGE};

use crate::{DispatchError, Result};

/// Pacing parameters for one `start`/`resume` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSettings {
    /// Records per chunk
    pub batch_size: usize,
    /// Pause after every send attempt, successful or not
    pub inter_message_delay: Duration,
    /// Interval between completion checks
    pub poll_interval: Duration,
    /// Completion checks before a chunk is declared complete regardless
    pub max_polls: u32,
    /// Keep going after each chunk instead of returning control
    pub auto_continue: bool,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self::from(&DispatchConfig::default())
    }
}

impl From<&DispatchConfig> for BatchSettings {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            inter_message_delay: config.inter_message_delay(),
            poll_interval: config.poll_interval(),
            max_polls: config.max_polls,
            auto_continue: config.auto_continue,
        }
    }
}

impl BatchSettings {
    pub fn new(batch_size: usize, inter_message_delay: Duration) -> Self {
        Self {
            batch_size,
            inter_message_delay,
            ..Default::default()
        }
    }

    pub fn with_auto_continue(mut self, auto_continue: bool) -> Self {
        self.auto_continue = auto_continue;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !BATCH_SIZE_RANGE.contains(&self.batch_size) {
            return Err(DispatchError::Config(format!(
                "batch size must be between {} and {}, got {}",
                BATCH_SIZE_RANGE.start(),
                BATCH_SIZE_RANGE.end(),
                self.batch_size
            )));
        }
        let delay_ms = self.inter_message_delay.as_millis();
        let in_range = u64::try_from(delay_ms)
            .map(|ms| INTER_MESSAGE_DELAY_MS_RANGE.contains(&ms))
            .unwrap_or(false);
        if !in_range {
            return Err(DispatchError::Config(format!(
                "inter-message delay must be between {}ms and {}ms, got {}ms",
                INTER_MESSAGE_DELAY_MS_RANGE.start(),
                INTER_MESSAGE_DELAY_MS_RANGE.end(),
                delay_ms
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(DispatchError::Config("poll interval must be positive".to_string()));
        }
        if self.max_polls == 0 {
            return Err(DispatchError::Config("max polls must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Upper bound on the time spent waiting for one chunk's acknowledgements
    pub fn poll_budget(&self) -> Duration {
        self.poll_interval * self.max_polls
    }
}

/// Partition of `record_count` records into 1-based chunks of `batch_size`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    pub record_count: usize,
    pub batch_size: usize,
}

impl BatchPlan {
    pub fn new(record_count: usize, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(DispatchError::Config("batch size must be at least 1".to_string()));
        }
        Ok(Self { record_count, batch_size })
    }

    pub fn total_chunks(&self) -> usize {
        self.record_count.div_ceil(self.batch_size)
    }

    /// Index range `[start, end)` covered by `chunk`, or `None` if out of range
    pub fn range(&self, chunk: usize) -> Option<Range<usize>> {
        if chunk == 0 || chunk > self.total_chunks() {
            return None;
        }
        let start = (chunk - 1) * self.batch_size;
        let end = (start + self.batch_size).min(self.record_count);
        Some(start..end)
    }

    pub fn ranges(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        (1..=self.total_chunks()).filter_map(move |chunk| self.range(chunk))
    }

    pub(crate) fn check_chunk(&self, chunk: usize) -> Result<Range<usize>> {
        self.range(chunk).ok_or(DispatchError::ChunkOutOfRange {
            chunk,
            total_chunks: self.total_chunks(),
        })
    }
}
