use chrono::{Local, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub mod logging;

// ============================================================================
// Timestamps
// ============================================================================

/// Display pattern for record timestamps (`dd/MM/yyyy HH:mm:ss`).
pub const TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// Current local time truncated to whole seconds, so that a timestamp
/// survives a format/parse cycle unchanged.
pub fn now_timestamp() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
}

// ============================================================================
// Status Vocabulary
// ============================================================================

/// Why a record ended in an error state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorReason {
    GenericFailure,
    NoService,
    NullPayload,
    RadioOff,
    Unknown,
    /// Free-form message reported by the transmission adapter
    Adapter(String),
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorReason::GenericFailure => f.write_str("generic-failure"),
            ErrorReason::NoService => f.write_str("no-service"),
            ErrorReason::NullPayload => f.write_str("null-payload"),
            ErrorReason::RadioOff => f.write_str("radio-off"),
            ErrorReason::Unknown => f.write_str("unknown"),
            ErrorReason::Adapter(message) => f.write_str(message),
        }
    }
}

impl From<&str> for ErrorReason {
    fn from(value: &str) -> Self {
        match value.trim() {
            "generic-failure" => ErrorReason::GenericFailure,
            "no-service" => ErrorReason::NoService,
            "null-payload" => ErrorReason::NullPayload,
            "radio-off" => ErrorReason::RadioOff,
            "unknown" => ErrorReason::Unknown,
            other => ErrorReason::Adapter(other.to_string()),
        }
    }
}

/// Lifecycle status of a single dispatch record.
///
/// ```text
/// Pending -> Sending -> Sent -> Delivered | NotDelivered
///    |          |
///    +----------+-> Error(reason)
/// ```
///
/// `Pending` and `Sending` are the only non-terminal states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum DispatchStatus {
    Pending,
    Sending,
    Sent,
    Delivered,
    NotDelivered,
    Error(ErrorReason),
}

impl DispatchStatus {
    pub fn error(reason: impl Into<ErrorReason>) -> Self {
        DispatchStatus::Error(reason.into())
    }

    /// Terminal for chunk-completion purposes.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DispatchStatus::Pending | DispatchStatus::Sending)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DispatchStatus::Sent | DispatchStatus::Delivered)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, DispatchStatus::Error(_) | DispatchStatus::NotDelivered)
    }

    /// Whether moving from `self` to `next` is a legal lifecycle step.
    ///
    /// Delivery outcomes are only accepted while the record is exactly `Sent`,
    /// so a late delivery report can never overwrite an error.
    pub fn can_transition_to(&self, next: &DispatchStatus) -> bool {
        use DispatchStatus::*;
        matches!(
            (self, next),
            (Pending, Sending)
                | (Pending, Error(_))
                | (Sending, Sent)
                | (Sending, Error(_))
                | (Sent, Delivered)
                | (Sent, NotDelivered)
        )
    }
}

impl fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchStatus::Pending => f.write_str("Pending"),
            DispatchStatus::Sending => f.write_str("Sending"),
            DispatchStatus::Sent => f.write_str("Sent"),
            DispatchStatus::Delivered => f.write_str("Delivered"),
            DispatchStatus::NotDelivered => f.write_str("NotDelivered"),
            DispatchStatus::Error(reason) => write!(f, "Error: {}", reason),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unrecognized status: {0}")]
pub struct StatusParseError(pub String);

impl FromStr for DispatchStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(reason) = s.strip_prefix("Error:") {
            return Ok(DispatchStatus::Error(ErrorReason::from(reason)));
        }
        match s {
            "Pending" => Ok(DispatchStatus::Pending),
            "Sending" => Ok(DispatchStatus::Sending),
            "Sent" => Ok(DispatchStatus::Sent),
            "Delivered" => Ok(DispatchStatus::Delivered),
            "NotDelivered" => Ok(DispatchStatus::NotDelivered),
            other => Err(StatusParseError(other.to_string())),
        }
    }
}

impl From<DispatchStatus> for String {
    fn from(status: DispatchStatus) -> Self {
        status.to_string()
    }
}

impl TryFrom<String> for DispatchStatus {
    type Error = StatusParseError;

    fn try_from(value: String) -> Result<Self, StatusParseError> {
        value.parse()
    }
}

// ============================================================================
// Gateway Acknowledgements
// ============================================================================

/// Outcome carried by a sent-acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SentResult {
    Ok,
    GenericFailure,
    NoService,
    NullPayload,
    RadioOff,
    Unknown,
}

impl SentResult {
    pub fn into_status(self) -> DispatchStatus {
        match self {
            SentResult::Ok => DispatchStatus::Sent,
            SentResult::GenericFailure => DispatchStatus::Error(ErrorReason::GenericFailure),
            SentResult::NoService => DispatchStatus::Error(ErrorReason::NoService),
            SentResult::NullPayload => DispatchStatus::Error(ErrorReason::NullPayload),
            SentResult::RadioOff => DispatchStatus::Error(ErrorReason::RadioOff),
            SentResult::Unknown => DispatchStatus::Error(ErrorReason::Unknown),
        }
    }
}

/// Outcome carried by a delivery-acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveredResult {
    Delivered,
    NotDelivered,
}

impl DeliveredResult {
    pub fn into_status(self) -> DispatchStatus {
        match self {
            DeliveredResult::Delivered => DispatchStatus::Delivered,
            DeliveredResult::NotDelivered => DispatchStatus::NotDelivered,
        }
    }
}

/// Opaque per-message token handed to the gateway and echoed back in
/// every acknowledgement for that message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CorrelationToken(pub u64);

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayEventKind {
    Sent(SentResult),
    Delivered(DeliveredResult),
}

/// Asynchronous acknowledgement emitted by a transmission gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayEvent {
    pub token: CorrelationToken,
    pub kind: GatewayEventKind,
}

impl GatewayEvent {
    pub fn sent(token: CorrelationToken, result: SentResult) -> Self {
        Self { token, kind: GatewayEventKind::Sent(result) }
    }

    pub fn delivered(token: CorrelationToken, result: DeliveredResult) -> Self {
        Self { token, kind: GatewayEventKind::Delivered(result) }
    }
}

// ============================================================================
// Records
// ============================================================================

/// One recipient/message pair and its delivery lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRecord {
    pub recipient: String,
    pub body: String,
    pub status: DispatchStatus,
    #[serde(default)]
    pub sent_at: Option<NaiveDateTime>,
}

impl DispatchRecord {
    pub fn new(recipient: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            body: body.into(),
            status: DispatchStatus::Pending,
            sent_at: None,
        }
    }

    /// Timestamp formatted for display, empty when never stamped.
    pub fn sent_at_display(&self) -> String {
        self.sent_at.as_ref().map(format_timestamp).unwrap_or_default()
    }
}

/// Aggregate counts over a set of records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSummary {
    pub total: usize,
    /// Sent or Delivered
    pub succeeded: usize,
    /// Error or NotDelivered
    pub failed: usize,
    /// Pending or Sending
    pub pending: usize,
}

impl DispatchSummary {
    pub fn from_records(records: &[DispatchRecord]) -> Self {
        let mut summary = DispatchSummary { total: records.len(), ..Default::default() };
        for record in records {
            if record.status.is_success() {
                summary.succeeded += 1;
            } else if record.status.is_failure() {
                summary.failed += 1;
            } else {
                summary.pending += 1;
            }
        }
        summary
    }
}

impl fmt::Display for DispatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} total, {} sent, {} failed, {} pending",
            self.total, self.succeeded, self.failed, self.pending
        )
    }
}

// ============================================================================
// Progress
// ============================================================================

/// Reported once per chunk when the engine declares it complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkProgress {
    /// 1-based chunk number
    pub chunk: usize,
    pub total_chunks: usize,
    pub completed: bool,
    /// The poll budget ran out before every record was terminal
    pub timed_out: bool,
}

impl ChunkProgress {
    pub fn has_more(&self) -> bool {
        self.chunk < self.total_chunks
    }
}
