//! Structured Logging Configuration
//!
//! - JSON output for unattended runs (LOG_FORMAT=json)
//! - Human-readable output otherwise
//!
//! `RUST_LOG` controls filtering (default: info), e.g.
//! `RUST_LOG=sms_dispatch=debug` to see every gateway acknowledgement.
//!
//! Dispatch runs open a `dispatch_run` span, so every record-level event
//! logged inside it carries the run's chunk range:
//!
//! ```rust,ignore
//! use tracing::{info_span, Instrument};
//!
//! let span = info_span!("dispatch_run", start_chunk = 1, total_chunks = 3);
//! async {
//!     tracing::info!(chunk = 1, "Chunk complete");
//! }.instrument(span).await;
//! ```

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Initialize logging for the given service.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging(service_name: &str) {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = if log_format.eq_ignore_ascii_case("json") {
        init_json_logging(env_filter)
    } else {
        init_text_logging(env_filter)
    };

    if installed {
        tracing::debug!(service = service_name, format = %log_format, "Logging initialized");
    }
}

fn init_json_logging(env_filter: EnvFilter) -> bool {
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_file(true)
                .with_line_number(true)
                .with_target(true)
                .flatten_event(true)
                .with_span_events(FmtSpan::CLOSE)
        )
        .try_init()
        .is_ok()
}

fn init_text_logging(env_filter: EnvFilter) -> bool {
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(true)
        )
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_logging("sms-common-test");
        init_logging("sms-common-test");
    }
}
