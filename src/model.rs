use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Seconds since the Unix epoch, as reported by the executor.
pub type EpochSeconds = f64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub base_url: String,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    #[serde(default)]
    pub log_tail_kb: Option<u32>,
    pub user_agent: String,
}

/// Opaque run identifier assigned by the executor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Pending,
    Running,
    Succeeded,
    Failed,
    // The executor reports runs killed on timeout as "killed".
    #[serde(alias = "killed")]
    Errored,
}

impl RunState {
    /// Position in the lifecycle order; terminal states share the top rank.
    pub fn rank(self) -> u8 {
        match self {
            RunState::Pending => 0,
            RunState::Running => 1,
            RunState::Succeeded | RunState::Failed | RunState::Errored => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Pending => "pending",
            RunState::Running => "running",
            RunState::Succeeded => "succeeded",
            RunState::Failed => "failed",
            RunState::Errored => "errored",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Executor acknowledgement of a submitted run.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub run_id: RunId,
    pub started_at: Option<EpochSeconds>,
    pub timeout: Option<Duration>,
}

/// One status poll, as returned by `GET /api/run/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub state: RunState,
    pub started_at: EpochSeconds,
    #[serde(default)]
    pub ended_at: Option<EpochSeconds>,
    #[serde(default)]
    pub exit_code: Option<i32>,
}

/// Everything a single tick learned about a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub status: StatusSnapshot,
    pub log: String,
    /// Local clock when the snapshots arrived; stands in for a missing `ended_at`.
    pub observed_at: EpochSeconds,
}

/// Client-side mirror of one remote execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub path: String,
    pub args: Vec<String>,
    pub state: RunState,
    pub started_at: Option<EpochSeconds>,
    pub ended_at: Option<EpochSeconds>,
    pub exit_code: Option<i32>,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    pub log: String,
}

impl Run {
    /// A run the executor has just acknowledged.
    pub fn submitted(submission: Submission, path: &str, args: &[String]) -> Self {
        Self {
            id: submission.run_id,
            path: path.to_string(),
            args: args.to_vec(),
            state: RunState::Running,
            started_at: submission.started_at,
            ended_at: None,
            exit_code: None,
            timeout: submission.timeout,
            log: String::new(),
        }
    }
}

/// Observation phase of a monitor, distinct from the run's own state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonitorPhase {
    Idle,
    Polling,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// The run reached this terminal state.
    Finished(RunState),
    Cancelled,
    /// A newer submission took over the monitor.
    Superseded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MonitorEvent {
    Submitted(Box<Run>),
    Updated(Box<Run>),
    Info(InfoEvent),
    Stopped(StopReason),
}

/// Structured notices emitted by the monitor and consumed by presentation layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InfoEvent {
    Message(String),
    PollFailed { run_id: RunId, message: String },
}

impl InfoEvent {
    /// Render a human-readable message for CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Message(msg) => msg.clone(),
            InfoEvent::PollFailed { run_id, message } => {
                format!("Poll for run {} failed (will retry): {}", run_id, message)
            }
        }
    }
}

/// Reconciliation of two consecutive log snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogDelta<'a> {
    Unchanged,
    /// New output following what was already seen.
    Append(&'a str),
    /// No overlap with the previous snapshot; the whole text replaces it.
    Reset(&'a str),
}

/// One entry of the executor's file listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub modtime: i64,
    #[serde(rename = "type")]
    pub kind: FileKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Dir,
}
