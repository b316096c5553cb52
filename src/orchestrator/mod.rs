//! Run lifecycle orchestration.
//!
//! This module owns submission and observation of a remote run: a fixed-interval poll
//! loop and the monitor facade that feeds polled snapshots through the lifecycle rules
//! and out to presentation layers.

mod monitor;
mod poll;

pub(crate) use monitor::RunMonitor;
pub(crate) use poll::DEFAULT_POLL_INTERVAL;

use crate::model::EpochSeconds;

/// Local wall clock in executor units.
pub(crate) fn unix_now() -> EpochSeconds {
    time::OffsetDateTime::now_utc().unix_timestamp_nanos() as f64 / 1e9
}
