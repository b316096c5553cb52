//! Request layer for the PiRun executor.
//!
//! [`RunApi`] is the seam the monitor polls through; [`HttpRunClient`] is the real
//! implementation. None of these types keep state between calls.

mod files;
mod http;

pub(crate) use files::FileClient;
pub(crate) use http::HttpRunClient;

use crate::error::{SubmissionError, TransportError};
use crate::model::{RunId, StatusSnapshot, Submission};
use async_trait::async_trait;

#[async_trait]
pub trait RunApi: Send + Sync {
    /// Ask the executor to start `path` with `args`.
    async fn submit(&self, path: &str, args: &[String]) -> Result<Submission, SubmissionError>;

    async fn fetch_status(&self, id: &RunId) -> Result<StatusSnapshot, TransportError>;

    /// Full log snapshot to date.
    async fn fetch_log(&self, id: &RunId) -> Result<String, TransportError>;
}

/// Split a raw argument string into whitespace-delimited tokens.
pub fn split_args(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_owned).collect()
}

/// Trimmed script path, or [`SubmissionError::EmptyPath`].
pub fn validate_script_path(path: &str) -> Result<&str, SubmissionError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(SubmissionError::EmptyPath);
    }
    Ok(trimmed)
}
