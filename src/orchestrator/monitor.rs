//! Run lifecycle monitor.
//!
//! Owns the single active run, drives its poll loop and reports every change to one
//! observer. Presentation layers only ever talk to [`RunMonitor`].

use super::poll::PollLoop;
use super::unix_now;
use crate::client::{validate_script_path, RunApi};
use crate::error::SubmissionError;
use crate::lifecycle;
use crate::model::{InfoEvent, MonitorEvent, MonitorPhase, Run, RunId, StopReason, Update};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Callback receiving monitor events.
pub type Observer = Arc<dyn Fn(&MonitorEvent) + Send + Sync>;

struct Shared {
    run: Option<Run>,
    phase: MonitorPhase,
    /// Bumped whenever observation of the current run ends; ticks carry the value they
    /// were started with and drop their results once it moves on.
    generation: u64,
    observer: Option<Observer>,
}

impl Shared {
    fn notify(&self, event: MonitorEvent) {
        if let Some(observer) = &self.observer {
            observer(&event);
        }
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct RunMonitor {
    client: Arc<dyn RunApi>,
    shared: Arc<Mutex<Shared>>,
    poll: PollLoop,
}

impl RunMonitor {
    pub fn new(client: Arc<dyn RunApi>, poll_interval: Duration) -> Self {
        Self {
            client,
            shared: Arc::new(Mutex::new(Shared {
                run: None,
                phase: MonitorPhase::Idle,
                generation: 0,
                observer: None,
            })),
            poll: PollLoop::new(poll_interval),
        }
    }

    /// Register the observer, replacing any previous one.
    ///
    /// The observer is called with the monitor's state locked, so events arrive in
    /// order. It must not call back into the monitor.
    pub fn on_update<F>(&self, observer: F)
    where
        F: Fn(&MonitorEvent) + Send + Sync + 'static,
    {
        lock(&self.shared).observer = Some(Arc::new(observer));
    }

    pub fn current_run(&self) -> Option<Run> {
        lock(&self.shared).run.clone()
    }

    pub fn phase(&self) -> MonitorPhase {
        lock(&self.shared).phase
    }

    /// Submit a script and start following it.
    ///
    /// Any run already being observed is abandoned first (it keeps running remotely).
    /// On error no run is active afterwards.
    pub async fn submit(&mut self, path: &str, args: &[String]) -> Result<RunId, SubmissionError> {
        self.disengage(StopReason::Superseded);
        {
            let mut shared = lock(&self.shared);
            shared.run = None;
            shared.phase = MonitorPhase::Idle;
        }

        let path = validate_script_path(path)?;
        let submission = self.client.submit(path, args).await.inspect_err(|err| {
            tracing::warn!(path, error = %err, "run submission failed");
        })?;

        let run = Run::submitted(submission, path, args);
        let run_id = run.id.clone();
        let generation = {
            let mut shared = lock(&self.shared);
            shared.generation += 1;
            shared.run = Some(run.clone());
            shared.phase = MonitorPhase::Polling;
            shared.notify(MonitorEvent::Submitted(Box::new(run)));
            shared.generation
        };
        tracing::info!(
            run_id = %run_id,
            path,
            interval = ?self.poll.interval(),
            "run submitted, polling for status"
        );

        let client = Arc::clone(&self.client);
        let shared = Arc::clone(&self.shared);
        let id = run_id.clone();
        self.poll.start(move |token| {
            let client = Arc::clone(&client);
            let shared = Arc::clone(&shared);
            let id = id.clone();
            async move { sync_once(client.as_ref(), &shared, &id, generation, &token).await }
        });

        Ok(run_id)
    }

    /// Stop observing. The run keeps its last known state; nothing is sent to the
    /// executor.
    pub fn cancel(&mut self) {
        self.disengage(StopReason::Cancelled);
    }

    /// End observation of the current run, if any. Returns whether polling was live.
    fn disengage(&mut self, reason: StopReason) -> bool {
        let was_polling = {
            let mut shared = lock(&self.shared);
            shared.generation += 1;
            let was_polling = shared.phase == MonitorPhase::Polling;
            if was_polling {
                shared.phase = MonitorPhase::Stopped;
                if let Some(run) = shared.run.as_ref() {
                    let notice = format!(
                        "Stopped following run {}; it keeps running on the executor",
                        run.id
                    );
                    shared.notify(MonitorEvent::Info(InfoEvent::Message(notice)));
                }
                shared.notify(MonitorEvent::Stopped(reason));
            }
            was_polling
        };
        if self.poll.is_active() {
            tracing::debug!("stopping poll loop");
        }
        self.poll.stop();
        if was_polling {
            tracing::info!(?reason, "stopped polling");
        }
        was_polling
    }
}

/// One tick: fetch status and log together, then apply them if this poll is still
/// current. Returns whether polling should continue.
async fn sync_once(
    client: &dyn RunApi,
    shared: &Mutex<Shared>,
    id: &RunId,
    generation: u64,
    token: &CancellationToken,
) -> bool {
    let (status, log) = futures::future::join(client.fetch_status(id), client.fetch_log(id)).await;
    let observed_at = unix_now();

    let mut shared = lock(shared);
    if token.is_cancelled() || shared.generation != generation {
        tracing::debug!(run_id = %id, "discarding result of a stopped poll");
        return false;
    }

    let update = match (status, log) {
        (Ok(status), Ok(log)) => Update {
            status,
            log,
            observed_at,
        },
        (Err(err), _) | (_, Err(err)) => {
            tracing::warn!(run_id = %id, error = %err, "poll failed, retrying on next tick");
            shared.notify(MonitorEvent::Info(InfoEvent::PollFailed {
                run_id: id.clone(),
                message: err.to_string(),
            }));
            return true;
        }
    };

    let Some(current) = shared.run.as_ref() else {
        return false;
    };
    match lifecycle::apply(current, &update) {
        Ok(Some(next)) => {
            let finished = lifecycle::is_terminal(&next).then_some(next.state);
            shared.run = Some(next.clone());
            shared.notify(MonitorEvent::Updated(Box::new(next)));
            match finished {
                Some(state) => {
                    shared.phase = MonitorPhase::Stopped;
                    shared.notify(MonitorEvent::Stopped(StopReason::Finished(state)));
                    tracing::info!(run_id = %id, %state, "run finished");
                    false
                }
                None => true,
            }
        }
        Ok(None) => false,
        Err(violation) => {
            tracing::debug!(%violation, "discarding snapshot");
            true
        }
    }
}
