//! BatchDispatcher Tests
//!
//! Tests for:
//! - Chunk partitioning and cooperative continuation
//! - Synchronous send failures
//! - Acknowledgement ordering and the status lifecycle
//! - Poll budget exhaustion
//! - Pacing and send order
//! - Abort and resume
//! - Structural errors
//!
//! Tests run on paused time, so pacing delays and poll budgets elapse
//! instantly. The run-release test uses a multi-threaded runtime and real
//! time, since it checks ordering between the run task and the caller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::time::Instant;

use sms_common::{
    ChunkProgress, CorrelationToken, DeliveredResult, DispatchRecord, DispatchStatus, ErrorReason,
    GatewayEventKind, SentResult,
};
use sms_dispatch::{
    gateway_channel, BatchDispatcher, BatchSettings, DispatchError, EventSink, LoopbackConfig,
    LoopbackGateway, LoopbackOutcome, RecordStore, SendError, TransmissionAdapter,
};

// ============================================================================
// Test doubles
// ============================================================================

#[derive(Debug, Clone)]
struct Call {
    recipient: String,
    segments: Vec<String>,
    token: CorrelationToken,
    at: Instant,
}

/// Records every call and replays the same acknowledgement script for each
/// accepted message, 100ms apart.
struct MockAdapter {
    sink: EventSink,
    acks: Vec<GatewayEventKind>,
    reject: Option<String>,
    calls: Mutex<Vec<Call>>,
}

impl MockAdapter {
    fn new(sink: EventSink, acks: Vec<GatewayEventKind>) -> Self {
        Self {
            sink,
            acks,
            reject: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn rejecting(mut self, recipient: &str) -> Self {
        self.reject = Some(recipient.to_string());
        self
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    fn accept(&self, recipient: &str, segments: Vec<String>, token: CorrelationToken) -> Result<(), SendError> {
        if self.reject.as_deref() == Some(recipient) {
            return Err(SendError::Rejected("blocked".to_string()));
        }
        self.calls.lock().push(Call {
            recipient: recipient.to_string(),
            segments,
            token,
            at: Instant::now(),
        });

        let sink = self.sink.clone();
        let acks = self.acks.clone();
        tokio::spawn(async move {
            for kind in acks {
                tokio::time::sleep(Duration::from_millis(100)).await;
                match kind {
                    GatewayEventKind::Sent(result) => sink.sent(token, result),
                    GatewayEventKind::Delivered(result) => sink.delivered(token, result),
                };
            }
        });
        Ok(())
    }
}

#[async_trait]
impl TransmissionAdapter for MockAdapter {
    fn name(&self) -> &str {
        "mock"
    }

    async fn send_text(&self, recipient: &str, body: &str, token: CorrelationToken) -> Result<(), SendError> {
        self.accept(recipient, vec![body.to_string()], token)
    }

    async fn send_multipart(
        &self,
        recipient: &str,
        segments: &[String],
        token: CorrelationToken,
    ) -> Result<(), SendError> {
        self.accept(recipient, segments.to_vec(), token)
    }
}

fn records(count: usize) -> Vec<DispatchRecord> {
    (0..count)
        .map(|i| DispatchRecord::new(format!("+55119000{:05}", i), format!("Mensaje {}", i)))
        .collect()
}

fn settings(batch_size: usize) -> BatchSettings {
    BatchSettings::new(batch_size, Duration::from_secs(1))
}

fn loopback_dispatcher() -> (BatchDispatcher, Arc<LoopbackGateway>) {
    let (sink, events) = gateway_channel();
    let config = LoopbackConfig {
        sent_delay: Duration::from_millis(200),
        delivered_delay: Duration::from_millis(800),
        report_delivery: true,
        segment_limit: 160,
    };
    let gateway = Arc::new(LoopbackGateway::new(config, sink));
    let dispatcher = BatchDispatcher::new(RecordStore::new(), gateway.clone(), events);
    (dispatcher, gateway)
}

fn mock_dispatcher(acks: Vec<GatewayEventKind>) -> (BatchDispatcher, Arc<MockAdapter>) {
    let (sink, events) = gateway_channel();
    let adapter = Arc::new(MockAdapter::new(sink, acks));
    let dispatcher = BatchDispatcher::new(RecordStore::new(), adapter.clone(), events);
    (dispatcher, adapter)
}

fn statuses(store: &RecordStore) -> Vec<DispatchStatus> {
    store.snapshot().into_iter().map(|r| r.status).collect()
}

// ============================================================================
// Chunking and continuation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_first_chunk_returns_control() {
    let (dispatcher, gateway) = loopback_dispatcher();

    let mut run = dispatcher.start(records(25), settings(10)).unwrap();
    let first = run.next_progress().await;
    assert_eq!(
        first,
        Some(ChunkProgress { chunk: 1, total_chunks: 3, completed: true, timed_out: false })
    );
    assert_eq!(run.next_progress().await, None);

    let outcome = run.wait().await.unwrap();
    assert_eq!(outcome.chunks_completed, 1);
    assert_eq!(outcome.last_chunk, Some(1));
    assert_eq!(outcome.next_chunk, Some(2));
    assert!(!outcome.aborted);
    assert!(!outcome.is_finished());

    // Only [0, 10) was attempted
    assert_eq!(gateway.transmissions().len(), 10);
    let store = dispatcher.store();
    for (i, record) in store.snapshot().iter().enumerate() {
        if i < 10 {
            assert!(record.status.is_terminal(), "record {} is {}", i, record.status);
            assert!(record.sent_at.is_some());
        } else {
            assert_eq!(record.status, DispatchStatus::Pending);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_resume_walks_remaining_chunks() {
    let (dispatcher, gateway) = loopback_dispatcher();

    let outcome = dispatcher.start(records(25), settings(10)).unwrap().wait().await.unwrap();
    assert_eq!(outcome.next_chunk, Some(2));

    let outcome = dispatcher.resume(settings(10), 2).unwrap().wait().await.unwrap();
    assert_eq!(outcome.last_chunk, Some(2));
    assert_eq!(outcome.next_chunk, Some(3));
    assert_eq!(gateway.transmissions().len(), 20);

    let outcome = dispatcher.resume(settings(10), 3).unwrap().wait().await.unwrap();
    assert_eq!(outcome.last_chunk, Some(3));
    assert!(outcome.is_finished());

    let sent: Vec<String> = gateway.transmissions().into_iter().map(|t| t.recipient).collect();
    let expected: Vec<String> = records(25).into_iter().map(|r| r.recipient).collect();
    assert_eq!(sent, expected);

    // Give the trailing delivery reports time to land
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(statuses(dispatcher.store()).iter().all(|s| *s == DispatchStatus::Delivered));
}

#[tokio::test(start_paused = true)]
async fn test_auto_continue_runs_every_chunk() {
    let (dispatcher, gateway) = loopback_dispatcher();

    let mut run = dispatcher
        .start(records(25), settings(10).with_auto_continue(true))
        .unwrap();
    let mut chunks = Vec::new();
    while let Some(progress) = run.next().await {
        chunks.push(progress.chunk);
    }

    assert_eq!(chunks, vec![1, 2, 3]);
    let outcome = run.wait().await.unwrap();
    assert_eq!(outcome.chunks_completed, 3);
    assert!(outcome.is_finished());
    assert_eq!(gateway.transmissions().len(), 25);
}

// ============================================================================
// Failures and acknowledgements
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_synchronous_failure_does_not_stall_chunk() {
    let (sink, events) = gateway_channel();
    let adapter = Arc::new(
        MockAdapter::new(sink, vec![GatewayEventKind::Sent(SentResult::Ok)]).rejecting("+5511900000001"),
    );
    let dispatcher = BatchDispatcher::new(RecordStore::new(), adapter.clone(), events);

    let started = Instant::now();
    let mut run = dispatcher.start(records(3), settings(10)).unwrap();
    let progress = run.next_progress().await.unwrap();
    let outcome = run.wait().await.unwrap();

    assert!(!progress.timed_out);
    assert!(outcome.is_finished());
    assert!(started.elapsed() < Duration::from_secs(10));

    let store = dispatcher.store();
    let failed = store.get(1).unwrap();
    assert_eq!(
        failed.status,
        DispatchStatus::Error(ErrorReason::Adapter("rejected by gateway: blocked".to_string()))
    );
    assert_eq!(failed.status.to_string(), "Error: rejected by gateway: blocked");
    assert!(failed.sent_at.is_some());

    assert_eq!(store.get(0).unwrap().status, DispatchStatus::Sent);
    assert_eq!(store.get(2).unwrap().status, DispatchStatus::Sent);
    assert_eq!(adapter.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_delivery_after_no_service_is_ignored() {
    let (dispatcher, _adapter) = mock_dispatcher(vec![
        GatewayEventKind::Sent(SentResult::NoService),
        GatewayEventKind::Delivered(DeliveredResult::Delivered),
    ]);

    dispatcher.start(records(1), settings(10)).unwrap().wait().await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(
        dispatcher.store().get(0).unwrap().status,
        DispatchStatus::Error(ErrorReason::NoService)
    );
}

#[tokio::test(start_paused = true)]
async fn test_not_delivered_after_sent() {
    let (dispatcher, gateway) = loopback_dispatcher();
    let recipients = records(2);
    gateway.script(recipients[1].recipient.clone(), LoopbackOutcome::not_delivered());
    gateway.script(recipients[0].recipient.clone(), LoopbackOutcome::sent(SentResult::RadioOff));

    dispatcher.start(recipients, settings(10)).unwrap().wait().await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(
        statuses(dispatcher.store()),
        vec![DispatchStatus::Error(ErrorReason::RadioOff), DispatchStatus::NotDelivered]
    );
    let summary = dispatcher.store().summary();
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.succeeded, 0);
}

#[tokio::test(start_paused = true)]
async fn test_silent_gateway_times_out_after_poll_budget() {
    let (dispatcher, gateway) = loopback_dispatcher();
    let input = records(3);
    for record in &input {
        gateway.script(record.recipient.clone(), LoopbackOutcome::silent());
    }

    let started = Instant::now();
    let mut run = dispatcher.start(input, settings(10)).unwrap();
    let progress = run.next_progress().await.unwrap();
    let outcome = run.wait().await.unwrap();

    assert!(progress.completed);
    assert!(progress.timed_out);
    assert!(outcome.is_finished());

    // Three 1s send pauses plus the 30 x 1s poll budget
    assert!(started.elapsed() >= Duration::from_secs(33));
    assert!(statuses(dispatcher.store()).iter().all(|s| *s == DispatchStatus::Sending));
}

#[tokio::test(start_paused = true)]
async fn test_late_acknowledgement_lands_after_timeout() {
    let (dispatcher, gateway) = loopback_dispatcher();
    let input = records(1);
    gateway.script(
        input[0].recipient.clone(),
        LoopbackOutcome::accept().delayed(Duration::from_secs(45)),
    );

    let mut run = dispatcher.start(input, settings(10)).unwrap();
    assert!(run.next_progress().await.unwrap().timed_out);
    assert_eq!(dispatcher.store().get(0).unwrap().status, DispatchStatus::Sending);

    run.wait().await.unwrap();
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(dispatcher.store().get(0).unwrap().status, DispatchStatus::Delivered);
}

// ============================================================================
// Pacing and segmentation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_sends_are_sequential_and_paced() {
    let (dispatcher, adapter) = mock_dispatcher(vec![GatewayEventKind::Sent(SentResult::Ok)]);
    let delay = Duration::from_secs(3);

    dispatcher
        .start(records(4), BatchSettings::new(10, delay))
        .unwrap()
        .wait()
        .await
        .unwrap();

    let calls = adapter.calls();
    let recipients: Vec<&str> = calls.iter().map(|c| c.recipient.as_str()).collect();
    assert_eq!(
        recipients,
        vec!["+5511900000000", "+5511900000001", "+5511900000002", "+5511900000003"]
    );
    for pair in calls.windows(2) {
        assert!(pair[1].at - pair[0].at >= delay);
    }
}

#[tokio::test(start_paused = true)]
async fn test_long_body_sent_as_multipart_under_one_token() {
    let (dispatcher, adapter) = mock_dispatcher(vec![
        GatewayEventKind::Sent(SentResult::Ok),
        GatewayEventKind::Delivered(DeliveredResult::Delivered),
    ]);
    let input = vec![
        DispatchRecord::new("+5511999999999", "a".repeat(300)),
        DispatchRecord::new("+5511888888888", "short"),
    ];

    dispatcher.start(input, settings(10)).unwrap().wait().await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let calls = adapter.calls();
    assert_eq!(calls[0].segments.len(), 2);
    assert_eq!(calls[0].segments.concat(), "a".repeat(300));
    assert_eq!(calls[1].segments, vec!["short".to_string()]);
    assert_ne!(calls[0].token, calls[1].token);
    assert!(statuses(dispatcher.store()).iter().all(|s| *s == DispatchStatus::Delivered));
}

// ============================================================================
// Abort
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_abort_stops_at_next_pause_and_resume_skips_attempted() {
    let (dispatcher, gateway) = loopback_dispatcher();
    let slow = BatchSettings::new(10, Duration::from_secs(5));

    let run = dispatcher.start(records(10), slow.clone()).unwrap();
    let abort = run.abort_handle();

    tokio::time::sleep(Duration::from_secs(7)).await;
    abort.abort();

    let outcome = run.wait().await.unwrap();
    assert!(outcome.aborted);
    assert_eq!(outcome.chunks_completed, 0);
    assert_eq!(outcome.next_chunk, Some(1));
    assert_eq!(gateway.transmissions().len(), 2);

    let snapshot = dispatcher.store().snapshot();
    assert!(snapshot[..2].iter().all(|r| r.status != DispatchStatus::Pending));
    assert!(snapshot[2..].iter().all(|r| r.status == DispatchStatus::Pending));

    let outcome = dispatcher.resume(slow, 1).unwrap().wait().await.unwrap();
    assert!(outcome.is_finished());

    let sent: Vec<String> = gateway.transmissions().into_iter().map(|t| t.recipient).collect();
    let expected: Vec<String> = records(10).into_iter().map(|r| r.recipient).collect();
    assert_eq!(sent, expected);
}

#[tokio::test(start_paused = true)]
async fn test_abort_during_poll_wait() {
    let (dispatcher, gateway) = loopback_dispatcher();
    let input = records(1);
    gateway.script(input[0].recipient.clone(), LoopbackOutcome::silent());

    let run = dispatcher.start(input, settings(10)).unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    run.abort();

    let outcome = run.wait().await.unwrap();
    assert!(outcome.aborted);
    assert_eq!(dispatcher.store().get(0).unwrap().status, DispatchStatus::Sending);
    assert!(!dispatcher.store().is_run_active());
}

// ============================================================================
// Structural errors
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_second_run_refused_while_active() {
    let (dispatcher, _gateway) = loopback_dispatcher();

    let run = dispatcher.start(records(5), settings(10)).unwrap();
    assert!(matches!(
        dispatcher.start(records(3), settings(10)),
        Err(DispatchError::RunInProgress)
    ));
    assert!(matches!(dispatcher.resume(settings(10), 1), Err(DispatchError::RunInProgress)));
    assert!(matches!(
        dispatcher.store().replace_all(records(1)),
        Err(DispatchError::RunInProgress)
    ));
    assert_eq!(dispatcher.store().len(), 5);

    run.abort();
    run.wait().await.unwrap();
    assert!(dispatcher.start(records(3), settings(10)).is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_released_when_progress_stream_ends() {
    let (dispatcher, _gateway) = loopback_dispatcher();

    let mut run = dispatcher.start(records(2), settings(1)).unwrap();
    while run.next().await.is_some() {}
    assert!(!dispatcher.store().is_run_active());

    let mut resumed = dispatcher.resume(settings(1), 2).unwrap();
    while resumed.next().await.is_some() {}
    assert!(!dispatcher.store().is_run_active());

    assert_eq!(run.wait().await.unwrap().next_chunk, Some(2));
    assert!(resumed.wait().await.unwrap().is_finished());
}

#[tokio::test]
async fn test_invalid_settings_rejected() {
    let (dispatcher, gateway) = loopback_dispatcher();

    for bad in [
        BatchSettings::new(0, Duration::from_secs(2)),
        BatchSettings::new(21, Duration::from_secs(2)),
        BatchSettings::new(10, Duration::from_millis(500)),
        BatchSettings::new(10, Duration::from_secs(11)),
    ] {
        assert!(matches!(dispatcher.start(records(3), bad), Err(DispatchError::Config(_))));
    }
    assert!(dispatcher.store().is_empty());
    assert!(gateway.transmissions().is_empty());
}

#[tokio::test]
async fn test_empty_run_rejected() {
    let (dispatcher, _gateway) = loopback_dispatcher();

    assert!(matches!(dispatcher.start(Vec::new(), settings(10)), Err(DispatchError::EmptyRun)));
    assert!(matches!(dispatcher.resume(settings(10), 1), Err(DispatchError::EmptyRun)));
}

#[tokio::test(start_paused = true)]
async fn test_resume_chunk_out_of_range() {
    let (dispatcher, _gateway) = loopback_dispatcher();
    dispatcher.start(records(5), settings(10)).unwrap().wait().await.unwrap();

    assert!(matches!(
        dispatcher.resume(settings(10), 2),
        Err(DispatchError::ChunkOutOfRange { chunk: 2, total_chunks: 1 })
    ));
    assert!(matches!(
        dispatcher.resume(settings(10), 0),
        Err(DispatchError::ChunkOutOfRange { chunk: 0, .. })
    ));
    assert!(!dispatcher.store().is_run_active());
}
