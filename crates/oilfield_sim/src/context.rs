//! Execution context handed to actor tasks.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, warn};

use crate::config::SimConfig;
use crate::event::EventSink;

/// Simulation-wide stop signal.
///
/// Raised once by `Simulation::stop`; every [`ActorContext`] created from
/// it observes the change at its next suspension point.
#[derive(Debug)]
pub struct StopSignal {
    tx: watch::Sender<bool>,
}

impl StopSignal {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Ask every task holding a receiver to wind down.
    pub fn raise(&self) {
        self.tx.send_replace(true);
    }

    #[must_use]
    pub fn is_raised(&self) -> bool {
        *self.tx.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a repair or shipment task needs: timing, the event sink it
/// reports through, and the stop signal it must honour.
#[derive(Debug, Clone)]
pub struct ActorContext {
    pub config: Arc<SimConfig>,
    pub events: EventSink,
    stop: watch::Receiver<bool>,
}

impl ActorContext {
    #[must_use]
    pub fn new(config: Arc<SimConfig>, events: EventSink, stop: watch::Receiver<bool>) -> Self {
        Self {
            config,
            events,
            stop,
        }
    }

    /// A context that is never stopped, for driving actors by hand.
    #[cfg(test)]
    pub(crate) fn detached(config: Arc<SimConfig>, events: EventSink) -> Self {
        let (_, stop) = watch::channel(false);
        Self::new(config, events, stop)
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Sleep for `duration` unless the stop signal is raised first.
    ///
    /// Returns `true` if the full duration elapsed, `false` if cancelled.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_stopped() {
            return false;
        }
        tokio::select! {
            () = tokio::time::sleep(duration) => true,
            () = stop_requested(self.stop.clone()) => false,
        }
    }

    /// Resolves once the stop signal is raised.
    pub async fn stopped(&self) {
        stop_requested(self.stop.clone()).await;
    }
}

async fn stop_requested(mut stop: watch::Receiver<bool>) {
    if stop.wait_for(|raised| *raised).await.is_err() {
        // Signal dropped without being raised: nobody can stop us any more.
        std::future::pending::<()>().await;
    }
}

/// Every repair and shipment task spawned by the dispatcher.
///
/// Finished tasks are reaped on the next spawn. A task that panicked is
/// reported on the event stream and otherwise ignored; it cannot take the
/// dispatcher or any other task down with it.
#[derive(Debug)]
pub struct ActorTasks {
    set: Mutex<JoinSet<()>>,
    events: EventSink,
}

impl ActorTasks {
    #[must_use]
    pub fn new(events: EventSink) -> Self {
        Self {
            set: Mutex::new(JoinSet::new()),
            events,
        }
    }

    fn set(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.set.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut set = self.set();
        while let Some(result) = set.try_join_next() {
            self.report(result);
        }
        set.spawn(task);
    }

    /// Number of tasks not yet reaped. Includes tasks that finished since
    /// the last spawn.
    #[must_use]
    pub fn len(&self) -> usize {
        self.set().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait up to `grace` for every task to finish, then abort the rest.
    ///
    /// Returns how many tasks had to be aborted.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        let mut set = std::mem::take(&mut *self.set());
        if set.is_empty() {
            return 0;
        }
        debug!(tasks = set.len(), ?grace, "waiting for actor tasks");

        let drained = tokio::time::timeout(grace, async {
            while let Some(result) = set.join_next().await {
                self.report(result);
            }
        })
        .await;
        if drained.is_ok() {
            return 0;
        }

        let stragglers = set.len();
        warn!(stragglers, "actor tasks ignored the stop signal, aborting");
        set.abort_all();
        while set.join_next().await.is_some() {}
        stragglers
    }

    fn report(&self, result: Result<(), JoinError>) {
        if let Err(err) = result
            && err.is_panic()
        {
            self.events.warn(format!("actor task failed: {err}"));
        }
    }
}
