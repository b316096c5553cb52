use crate::model::{RunId, RunState};
use thiserror::Error;

/// Failure to start a run. Nothing is created when this is returned.
#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error("script path is empty")]
    EmptyPath,

    #[error("executor rejected the run: {0}")]
    Rejected(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Network, HTTP or decoding failure talking to the executor.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("executor returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("malformed response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A snapshot that would move a run backwards in its lifecycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("snapshot for run {run_id} would regress state from {from} to {to}")]
pub struct ProtocolViolation {
    pub run_id: RunId,
    pub from: RunState,
    pub to: RunState,
}
