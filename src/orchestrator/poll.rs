//! Fixed-interval scheduler with at most one tick in flight.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

struct ActiveLoop {
    token: CancellationToken,
    // Dropped, not aborted: an in-flight tick runs to completion and sees the token.
    _handle: JoinHandle<()>,
}

/// Repeatedly runs a tick on a fixed interval until the tick returns `false` or the
/// loop is stopped.
///
/// The next interval starts only once the previous tick has finished, so ticks never
/// overlap. Each tick gets the loop's token and must check it before acting on what it
/// fetched: `stop()` cancels the timer but does not interrupt a tick that is running.
pub struct PollLoop {
    interval: Duration,
    active: Option<ActiveLoop>,
}

impl PollLoop {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            active: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start ticking, stopping any loop this instance was already running.
    pub fn start<F, Fut>(&mut self, mut tick: F) -> CancellationToken
    where
        F: FnMut(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.stop();

        let token = CancellationToken::new();
        let loop_token = token.clone();
        let interval = self.interval;
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                if !tick(loop_token.clone()).await {
                    loop_token.cancel();
                    break;
                }
                if loop_token.is_cancelled() {
                    break;
                }
            }
            tracing::trace!("poll loop exited");
        });

        self.active = Some(ActiveLoop {
            token: token.clone(),
            _handle: handle,
        });
        token
    }

    /// Stop scheduling ticks. Calling this when nothing is running is a no-op.
    pub fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            active.token.cancel();
        }
    }

    /// True while a loop is scheduled and has neither finished nor been stopped.
    pub fn is_active(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.token.is_cancelled())
    }
}

impl Drop for PollLoop {
    fn drop(&mut self) {
        self.stop();
    }
}
