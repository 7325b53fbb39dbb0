//! SMS Batch Dispatch
//!
//! This crate provides the batch dispatch engine and its collaborators:
//! - RecordStore: shared, lifecycle-guarded record collection with change notification
//! - CorrelationTable: token to record-index mapping for asynchronous acknowledgements
//! - TransmissionAdapter: gateway contract, with LoopbackGateway and HttpGateway
//! - AckListener: applies gateway acknowledgements to the store
//! - BatchDispatcher: paced, chunked, resumable and abortable dispatch runs
//! - Loader / Report: CSV input and status report files

pub mod batch;
pub mod correlation;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod http_gateway;
pub mod listener;
pub mod loader;
pub mod loopback;
pub mod report;
pub mod segment;
pub mod store;

pub use batch::{BatchPlan, BatchSettings};
pub use correlation::CorrelationTable;
pub use engine::{BatchDispatcher, DispatchRun, RunAbort, RunOutcome};
pub use error::{DispatchError, SendError};
pub use gateway::{gateway_channel, validate_recipient, EventSink, GatewayEvents, TransmissionAdapter};
pub use http_gateway::{HttpGateway, HttpGatewayConfig};
pub use listener::AckListener;
pub use loader::{load_file, load_records};
pub use loopback::{LoopbackConfig, LoopbackGateway, LoopbackOutcome, Transmission};
pub use report::{parse_report, render_report, write_report, ReportRow, REPORT_HEADER};
pub use segment::{detect_encoding, segment_message, Encoding};
pub use store::{RecordStore, RunGuard};

pub type Result<T> = std::result::Result<T, DispatchError>;
