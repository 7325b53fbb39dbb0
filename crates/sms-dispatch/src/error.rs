use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Nothing to dispatch: the record set is empty")]
    EmptyRun,

    #[error("Chunk {chunk} is out of range (1..={total_chunks})")]
    ChunkOutOfRange { chunk: usize, total_chunks: usize },

    #[error("A dispatch run is already in progress")]
    RunInProgress,

    #[error("Record index {0} is out of range")]
    IndexOutOfRange(usize),

    #[error("Input error: {0}")]
    Input(String),

    #[error("Report error: {0}")]
    Report(String),

    #[error("Dispatch task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Failure to initiate a transmission, reported synchronously by a gateway.
///
/// The display text is recorded on the record as its error reason.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("invalid recipient '{0}'")]
    InvalidRecipient(String),

    #[error("empty message body")]
    EmptyBody,

    #[error("rejected by gateway: {0}")]
    Rejected(String),

    #[error("gateway closed")]
    Closed,
}
