//! Text summary builder for CLI output.
//!
//! Formats human-readable status lines while a run is followed, and the final report.

use crate::lifecycle;
use crate::model::{EpochSeconds, Run, RunState};
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Short label for a run's state, e.g. `Completed (exit code: 0)`.
pub(crate) fn status_text(run: &Run) -> String {
    match run.state {
        RunState::Pending => "Pending…".to_string(),
        RunState::Running => "Running…".to_string(),
        RunState::Succeeded => match run.exit_code {
            Some(code) => format!("Completed (exit code: {code})"),
            None => "Completed".to_string(),
        },
        RunState::Failed => match run.exit_code {
            Some(code) => format!("Failed (exit code: {code})"),
            None => "Failed".to_string(),
        },
        RunState::Errored => "Errored (killed or could not start)".to_string(),
    }
}

pub(crate) fn format_elapsed(elapsed: Duration) -> String {
    format!("{:.1}s", elapsed.as_secs_f64())
}

/// One progress line: `[r1] Running… 3.2s`.
pub(crate) fn progress_line(run: &Run, now: EpochSeconds) -> String {
    format!(
        "[{}] {} {}",
        run.id,
        status_text(run),
        format_elapsed(lifecycle::elapsed(run, now))
    )
}

/// RFC 3339 in UTC, or the raw seconds when the executor sent something out of range.
fn format_timestamp(secs: EpochSeconds) -> String {
    let nanos = (secs * 1e9) as i128;
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .ok()
        .and_then(|ts| ts.format(&Rfc3339).ok())
        .unwrap_or_else(|| format!("{secs} (unix seconds)"))
}

/// Build the final report for a run.
pub(crate) fn build_text_summary(run: &Run, now: EpochSeconds) -> TextSummary {
    let mut lines = Vec::new();

    lines.push(format!("Run {}: {}", run.id, status_text(run)));
    if run.args.is_empty() {
        lines.push(format!("Script: {}", run.path));
    } else {
        lines.push(format!("Script: {} {}", run.path, run.args.join(" ")));
    }
    if let Some(started) = run.started_at {
        lines.push(format!("Started: {}", format_timestamp(started)));
    }
    if let Some(ended) = run.ended_at {
        lines.push(format!("Ended:   {}", format_timestamp(ended)));
    }
    lines.push(format!(
        "Elapsed: {}",
        format_elapsed(lifecycle::elapsed(run, now))
    ));
    if let Some(timeout) = run.timeout {
        lines.push(format!("Timeout: {}", humantime::format_duration(timeout)));
    }
    if !lifecycle::is_terminal(run) {
        lines.push("Run is still executing remotely; observation stopped.".to_string());
    }

    TextSummary { lines }
}
