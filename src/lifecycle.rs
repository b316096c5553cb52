//! Transition rules for a single run.
//!
//! Everything here is pure: the monitor feeds in what a tick fetched and gets back the
//! next [`Run`], or learns that the snapshot must be dropped.

use crate::error::ProtocolViolation;
use crate::model::{EpochSeconds, LogDelta, Run, RunState, Update};
use std::time::Duration;

/// Overlay a polled status and log snapshot onto `current`.
///
/// Returns `Ok(None)` when `current` is already terminal: nothing may change after that.
/// A snapshot whose state ranks below the current one is a [`ProtocolViolation`].
pub fn apply(current: &Run, update: &Update) -> Result<Option<Run>, ProtocolViolation> {
    if current.state.is_terminal() {
        return Ok(None);
    }

    let reported = update.status.state;
    if reported.rank() < current.state.rank() {
        return Err(ProtocolViolation {
            run_id: current.id.clone(),
            from: current.state,
            to: reported,
        });
    }

    let mut next = current.clone();
    next.state = reported;
    if next.started_at.is_none() {
        next.started_at = Some(update.status.started_at);
    }

    if reported.is_terminal() {
        next.ended_at = Some(update.status.ended_at.unwrap_or(update.observed_at));
        next.exit_code = match reported {
            RunState::Succeeded | RunState::Failed => update.status.exit_code,
            _ => None,
        };
    } else {
        next.ended_at = None;
        next.exit_code = None;
    }

    // Snapshots replace, never append.
    next.log.clone_from(&update.log);

    Ok(Some(next))
}

pub fn is_terminal(run: &Run) -> bool {
    run.state.is_terminal()
}

/// Wall time the run has been (or was) executing. Never negative.
pub fn elapsed(run: &Run, now: EpochSeconds) -> Duration {
    let Some(started) = run.started_at else {
        return Duration::ZERO;
    };
    let end = if run.state.is_terminal() {
        run.ended_at.unwrap_or(started)
    } else {
        now
    };
    let secs = end - started;
    if secs > 0.0 {
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
    } else {
        Duration::ZERO
    }
}

/// Work out what changed between two full log snapshots.
///
/// The executor may return only a trailing window of the log, starting on a line
/// boundary. When that window slides, the start of `next` overlaps the end of
/// `previous`, and only the text past the overlap is new.
pub fn reconcile_log<'a>(previous: &str, next: &'a str) -> LogDelta<'a> {
    if next == previous {
        return LogDelta::Unchanged;
    }
    if let Some(rest) = next.strip_prefix(previous) {
        return LogDelta::Append(rest);
    }

    let first_line = match next.find('\n') {
        Some(pos) => &next[..=pos],
        None => return LogDelta::Reset(next),
    };

    // Leftmost candidate gives the longest overlap.
    for (start, _) in previous.match_indices(first_line) {
        let overlap = &previous[start..];
        if let Some(rest) = next.strip_prefix(overlap) {
            return if rest.is_empty() {
                LogDelta::Unchanged
            } else {
                LogDelta::Append(rest)
            };
        }
    }

    LogDelta::Reset(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RunId, StatusSnapshot, Submission};

    fn running_run() -> Run {
        Run::submitted(
            Submission {
                run_id: RunId::new("r1"),
                started_at: None,
                timeout: None,
            },
            "build.sh",
            &[],
        )
    }

    fn update(state: RunState, ended_at: Option<f64>, exit_code: Option<i32>, log: &str) -> Update {
        Update {
            status: StatusSnapshot {
                state,
                started_at: 1000.0,
                ended_at,
                exit_code,
            },
            log: log.to_string(),
            observed_at: 1003.0,
        }
    }

    #[test]
    fn running_snapshot_sets_start_and_replaces_log() {
        let run = running_run();
        let next = apply(&run, &update(RunState::Running, None, None, "hello\n"))
            .unwrap()
            .unwrap();
        assert_eq!(next.state, RunState::Running);
        assert_eq!(next.started_at, Some(1000.0));
        assert_eq!(next.log, "hello\n");

        let next = apply(&next, &update(RunState::Running, None, None, "fresh\n"))
            .unwrap()
            .unwrap();
        assert_eq!(next.log, "fresh\n");
    }

    #[test]
    fn started_at_is_immutable_once_set() {
        let mut run = running_run();
        run.started_at = Some(999.0);
        let next = apply(&run, &update(RunState::Running, None, None, ""))
            .unwrap()
            .unwrap();
        assert_eq!(next.started_at, Some(999.0));
    }

    #[test]
    fn terminal_snapshot_records_end_and_exit_code() {
        let run = running_run();
        let done = apply(&run, &update(RunState::Succeeded, Some(1005.0), Some(0), "ok\n"))
            .unwrap()
            .unwrap();
        assert!(is_terminal(&done));
        assert_eq!(done.ended_at, Some(1005.0));
        assert_eq!(done.exit_code, Some(0));
    }

    #[test]
    fn terminal_without_end_uses_observation_time() {
        let run = running_run();
        let done = apply(&run, &update(RunState::Failed, None, Some(3), ""))
            .unwrap()
            .unwrap();
        assert_eq!(done.ended_at, Some(1003.0));
        assert_eq!(done.exit_code, Some(3));
    }

    #[test]
    fn non_terminal_drops_end_and_exit_code() {
        let run = running_run();
        let next = apply(&run, &update(RunState::Running, Some(1002.0), Some(0), ""))
            .unwrap()
            .unwrap();
        assert_eq!(next.ended_at, None);
        assert_eq!(next.exit_code, None);
    }

    #[test]
    fn errored_run_has_no_exit_code() {
        let run = running_run();
        let done = apply(&run, &update(RunState::Errored, Some(1030.0), Some(-1), ""))
            .unwrap()
            .unwrap();
        assert_eq!(done.state, RunState::Errored);
        assert_eq!(done.exit_code, None);
    }

    #[test]
    fn regression_is_a_protocol_violation() {
        let run = running_run();
        let err = apply(&run, &update(RunState::Pending, None, None, "")).unwrap_err();
        assert_eq!(err.from, RunState::Running);
        assert_eq!(err.to, RunState::Pending);
    }

    #[test]
    fn terminal_run_ignores_every_later_snapshot() {
        let run = running_run();
        let done = apply(&run, &update(RunState::Succeeded, Some(1005.0), Some(0), "done\n"))
            .unwrap()
            .unwrap();
        for state in [
            RunState::Pending,
            RunState::Running,
            RunState::Succeeded,
            RunState::Failed,
            RunState::Errored,
        ] {
            assert_eq!(apply(&done, &update(state, Some(2000.0), Some(9), "x")), Ok(None));
        }
    }

    #[test]
    fn late_running_reply_cannot_undo_success() {
        // B (sent second) arrives first and reports success; A arrives afterwards.
        let run = running_run();
        let after_b = apply(&run, &update(RunState::Succeeded, Some(1005.0), Some(0), "b\n"))
            .unwrap()
            .unwrap();
        let after_a = apply(&after_b, &update(RunState::Running, None, None, "a\n")).unwrap();
        assert!(after_a.is_none());
        assert_eq!(after_b.state, RunState::Succeeded);
        assert_eq!(after_b.log, "b\n");
    }

    #[test]
    fn elapsed_tracks_clock_until_terminal() {
        let mut run = running_run();
        run.started_at = Some(1000.0);
        assert_eq!(elapsed(&run, 1002.5), Duration::from_millis(2500));

        let done = apply(&run, &update(RunState::Succeeded, Some(1005.0), Some(0), ""))
            .unwrap()
            .unwrap();
        assert_eq!(elapsed(&done, 1005.0).as_secs_f64(), 5.0);
        assert_eq!(elapsed(&done, 5000.0).as_secs_f64(), 5.0);
    }

    #[test]
    fn elapsed_clamps_clock_skew_and_unknown_start() {
        let mut run = running_run();
        assert_eq!(elapsed(&run, 1000.0), Duration::ZERO);
        run.started_at = Some(1000.0);
        assert_eq!(elapsed(&run, 990.0), Duration::ZERO);
        assert_eq!(elapsed(&run, f64::NAN), Duration::ZERO);
    }

    #[test]
    fn reconcile_detects_growth() {
        assert_eq!(reconcile_log("", "a\n"), LogDelta::Append("a\n"));
        assert_eq!(reconcile_log("a\n", "a\nb\n"), LogDelta::Append("b\n"));
        assert_eq!(reconcile_log("a\nb", "a\nbc\n"), LogDelta::Append("c\n"));
        assert_eq!(reconcile_log("a\n", "a\n"), LogDelta::Unchanged);
    }

    #[test]
    fn reconcile_follows_sliding_tail_window() {
        let previous = "one\ntwo\nthree\n";
        let next = "two\nthree\nfour\n";
        assert_eq!(reconcile_log(previous, next), LogDelta::Append("four\n"));
        assert_eq!(reconcile_log(previous, "three\n"), LogDelta::Unchanged);
    }

    #[test]
    fn reconcile_resets_without_overlap() {
        assert_eq!(reconcile_log("one\n", "other\n"), LogDelta::Reset("other\n"));
        assert_eq!(reconcile_log("one\n", ""), LogDelta::Reset(""));
    }
}
