//! Batch Dispatch Engine
//!
//! Sends records one at a time, chunk by chunk:
//! 1. every record of the chunk is handed to the gateway in index order,
//!    with `inter_message_delay` after each attempt
//! 2. the chunk is polled until every record is terminal or the poll budget
//!    runs out (late acknowledgements still land afterwards)
//! 3. completion is reported, and unless `auto_continue` is set the run stops
//!    there; the caller resumes with the next chunk when ready
//!
//! Both waits are abortable. An aborted run leaves every record in its last
//! observed status and the store stays reportable.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use sms_common::{now_timestamp, ChunkProgress, DispatchRecord, DispatchStatus, ErrorReason};

use crate::batch::{BatchPlan, BatchSettings};
use crate::correlation::CorrelationTable;
use crate::gateway::{GatewayEvents, TransmissionAdapter};
use crate::listener::AckListener;
use crate::store::{RecordStore, RunGuard};
use crate::{DispatchError, Result};

/// How a `start`/`resume` call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub total_chunks: usize,
    /// Chunks completed by this call
    pub chunks_completed: usize,
    pub last_chunk: Option<usize>,
    /// Chunk to pass to `resume`, if any work remains
    pub next_chunk: Option<usize>,
    pub aborted: bool,
}

impl RunOutcome {
    pub fn is_finished(&self) -> bool {
        self.next_chunk.is_none() && !self.aborted
    }
}

/// Owns the record store handle, the correlation table and the gateway for
/// one dispatch session.
pub struct BatchDispatcher {
    store: RecordStore,
    correlation: Arc<CorrelationTable>,
    adapter: Arc<dyn TransmissionAdapter>,
    listener: JoinHandle<()>,
}

impl BatchDispatcher {
    /// Must be called inside a Tokio runtime: the acknowledgement listener
    /// is spawned immediately.
    pub fn new(
        store: RecordStore,
        adapter: Arc<dyn TransmissionAdapter>,
        events: GatewayEvents,
    ) -> Self {
        let correlation = Arc::new(CorrelationTable::new());
        let listener = AckListener::new(store.clone(), Arc::clone(&correlation)).spawn(events);
        info!(gateway = adapter.name(), "Batch dispatcher ready");

        Self {
            store,
            correlation,
            adapter,
            listener,
        }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Load `records` and dispatch from the first chunk.
    ///
    /// Invalid settings, an empty record set, or a run already in progress
    /// are reported here; everything per-record is recorded on the record.
    pub fn start(&self, records: Vec<DispatchRecord>, settings: BatchSettings) -> Result<DispatchRun> {
        settings.validate()?;
        if records.is_empty() {
            return Err(DispatchError::EmptyRun);
        }
        let plan = BatchPlan::new(records.len(), settings.batch_size)?;

        let guard = self.store.begin_run()?;
        guard.replace_all(records);
        self.correlation.clear();

        Ok(self.launch(guard, plan, settings, 1))
    }

    /// Continue the current record set from `from_chunk` (1-based).
    ///
    /// Operates on the records loaded by the last `start`; no record set is
    /// passed here. Records that already left `Pending` are not sent again,
    /// so resuming an aborted chunk only picks up what was never attempted.
    pub fn resume(&self, settings: BatchSettings, from_chunk: usize) -> Result<DispatchRun> {
        settings.validate()?;
        if self.store.is_empty() {
            return Err(DispatchError::EmptyRun);
        }

        let guard = self.store.begin_run()?;
        let plan = BatchPlan::new(self.store.len(), settings.batch_size)?;
        plan.check_chunk(from_chunk)?;

        Ok(self.launch(guard, plan, settings, from_chunk))
    }

    fn launch(
        &self,
        guard: RunGuard,
        plan: BatchPlan,
        settings: BatchSettings,
        start_chunk: usize,
    ) -> DispatchRun {
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let (abort_tx, abort_rx) = watch::channel(false);

        let runner = ChunkRunner {
            _guard: guard,
            store: self.store.clone(),
            correlation: Arc::clone(&self.correlation),
            adapter: Arc::clone(&self.adapter),
            settings,
            plan,
            progress: progress_tx,
            abort: abort_rx,
        };

        let span = info_span!(
            "dispatch_run",
            start_chunk,
            total_chunks = plan.total_chunks(),
            records = plan.record_count
        );
        let handle = tokio::spawn(
            async move { runner.run(start_chunk).await }.instrument(span),
        );

        DispatchRun {
            progress: progress_rx,
            abort: RunAbort(Arc::new(abort_tx)),
            handle,
        }
    }
}

impl Drop for BatchDispatcher {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

/// Handle to a running dispatch.
///
/// Yields one [`ChunkProgress`] per completed chunk and ends when the run
/// stops, whether finished, paused between chunks, or aborted.
pub struct DispatchRun {
    progress: mpsc::UnboundedReceiver<ChunkProgress>,
    abort: RunAbort,
    handle: JoinHandle<Result<RunOutcome>>,
}

impl DispatchRun {
    pub async fn next_progress(&mut self) -> Option<ChunkProgress> {
        self.progress.recv().await
    }

    /// Stop at the next suspension point
    pub fn abort(&self) {
        self.abort.abort();
    }

    /// Cloneable abort trigger, for use from another task
    pub fn abort_handle(&self) -> RunAbort {
        self.abort.clone()
    }

    pub async fn wait(self) -> Result<RunOutcome> {
        self.handle
            .await
            .map_err(|e| DispatchError::Task(e.to_string()))?
    }
}

impl Stream for DispatchRun {
    type Item = ChunkProgress;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.progress.poll_recv(cx)
    }
}

#[derive(Clone)]
pub struct RunAbort(Arc<watch::Sender<bool>>);

impl RunAbort {
    pub fn abort(&self) {
        self.0.send_replace(true);
    }
}

struct Aborted;

struct ChunkRunner {
    // Declared first: the run is released before `progress` closes.
    _guard: RunGuard,
    store: RecordStore,
    correlation: Arc<CorrelationTable>,
    adapter: Arc<dyn TransmissionAdapter>,
    settings: BatchSettings,
    plan: BatchPlan,
    progress: mpsc::UnboundedSender<ChunkProgress>,
    abort: watch::Receiver<bool>,
}

impl ChunkRunner {
    async fn run(mut self, start_chunk: usize) -> Result<RunOutcome> {
        let total_chunks = self.plan.total_chunks();
        let mut outcome = RunOutcome {
            total_chunks,
            chunks_completed: 0,
            last_chunk: None,
            next_chunk: None,
            aborted: false,
        };

        for chunk in start_chunk..=total_chunks {
            let range = self.plan.check_chunk(chunk)?;
            info!(chunk, total_chunks, start = range.start, end = range.end, "Dispatching chunk");

            let timed_out = match self.send_range(range.clone()).await {
                Ok(()) => self.await_range(range).await,
                Err(Aborted) => Err(Aborted),
            };
            let timed_out = match timed_out {
                Ok(timed_out) => timed_out,
                Err(Aborted) => {
                    warn!(chunk, "Dispatch aborted");
                    outcome.aborted = true;
                    outcome.next_chunk = Some(chunk);
                    return Ok(outcome);
                }
            };

            let progress = ChunkProgress {
                chunk,
                total_chunks,
                completed: true,
                timed_out,
            };
            let summary = self.store.summary();
            info!(chunk, total_chunks, timed_out, %summary, "Chunk complete");
            if self.progress.send(progress).is_err() {
                debug!(chunk, "Progress receiver dropped");
            }

            outcome.chunks_completed += 1;
            outcome.last_chunk = Some(chunk);

            if progress.has_more() && !self.settings.auto_continue {
                outcome.next_chunk = Some(chunk + 1);
                break;
            }
        }

        Ok(outcome)
    }

    /// Hand every pending record in `range` to the gateway, one at a time.
    async fn send_range(&mut self, range: std::ops::Range<usize>) -> std::result::Result<(), Aborted> {
        for index in range {
            if *self.abort.borrow() {
                return Err(Aborted);
            }

            let Some(record) = self.store.get(index) else {
                continue;
            };
            if record.status != DispatchStatus::Pending {
                debug!(index, status = %record.status, "Skipping record already attempted");
                continue;
            }

            self.send_record(index, &record).await;
            self.pause(self.settings.inter_message_delay).await?;
        }
        Ok(())
    }

    async fn send_record(&self, index: usize, record: &DispatchRecord) {
        let segments = self.adapter.segment(&record.body);
        let token = self.correlation.issue(index);

        if let Err(e) = self.store.mark_sending(index, now_timestamp()) {
            warn!(index, error = %e, "Could not mark record as sending");
            return;
        }

        let result = if segments.len() == 1 {
            self.adapter.send_text(&record.recipient, &record.body, token).await
        } else {
            self.adapter.send_multipart(&record.recipient, &segments, token).await
        };

        match result {
            Ok(()) => {
                debug!(index, %token, segments = segments.len(), "Message handed to gateway");
            }
            Err(e) => {
                warn!(index, recipient = %record.recipient, error = %e, "Send failed");
                let reason = ErrorReason::Adapter(e.to_string());
                if let Err(e) = self.store.mark_failed(index, reason, now_timestamp()) {
                    warn!(index, error = %e, "Could not record send failure");
                }
            }
        }
    }

    /// Poll until the range is terminal. Returns whether the budget ran out.
    async fn await_range(&mut self, range: std::ops::Range<usize>) -> std::result::Result<bool, Aborted> {
        let mut polls = 0;
        loop {
            if self.store.all_terminal(range.clone()) {
                return Ok(false);
            }
            if polls >= self.settings.max_polls {
                let waiting = range
                    .clone()
                    .filter(|&i| {
                        self.store
                            .get(i)
                            .map(|r| !r.status.is_terminal())
                            .unwrap_or(false)
                    })
                    .count();
                warn!(
                    waiting,
                    budget = ?self.settings.poll_budget(),
                    "Poll budget exhausted, continuing without acknowledgements"
                );
                return Ok(true);
            }
            self.pause(self.settings.poll_interval).await?;
            polls += 1;
        }
    }

    async fn pause(&mut self, duration: Duration) -> std::result::Result<(), Aborted> {
        if *self.abort.borrow() {
            return Err(Aborted);
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = abort_requested(&mut self.abort) => Err(Aborted),
        }
    }
}

/// Resolves once an abort is requested; never resolves if the run handle
/// (and with it every way to abort) has been dropped.
async fn abort_requested(abort: &mut watch::Receiver<bool>) {
    if abort.wait_for(|aborted| *aborted).await.is_err() {
        std::future::pending::<()>().await;
    }
}
