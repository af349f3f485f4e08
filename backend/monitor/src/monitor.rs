//! Monitor supervisor. Owns the subscription lifecycle and the dispatch
//! loop.
//!
//! ```text
//! Stopped ──start()──► Starting ──subscribed──► Running ──stop()──► Stopped
//!                         └──subscribe failed──► Stopped
//! ```
//!
//! The dispatch loop is the only consumer of the subscription. Events of a
//! batch are reconciled one after another in delivery order and every
//! outcome is handed to the observer; a failed event never stops the loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use alloy_primitives::Address;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::errors::{MonitorError, SubscriptionError};
use crate::events::FUNDING_EVENT;
use crate::observer::{FundingObserver, MonitorReport, Outcome};
use crate::reader::ChainReader;
use crate::reconcile::Reconciler;
use crate::subscriber::{BatchResult, EventSource, Subscription, SubscriptionHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Stopped,
    Starting,
    Running,
}

/// Counters over the lifetime of a monitor instance.
#[derive(Debug, Default)]
pub struct MonitorStats {
    batches: AtomicU64,
    funded: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub batches: u64,
    pub funded: u64,
    pub rejected: u64,
    pub failed: u64,
}

impl MonitorStats {
    fn record(&self, outcome: &Outcome) {
        let counter = match outcome {
            Outcome::Funded(_) => &self.funded,
            Outcome::Rejected(_) => &self.rejected,
            Outcome::Failed(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            batches: self.batches.load(Ordering::Relaxed),
            funded: self.funded.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

struct ActiveRun {
    handle: SubscriptionHandle,
    task: JoinHandle<Result<(), SubscriptionError>>,
}

pub struct Monitor<S, R> {
    source: S,
    contract: Address,
    reconciler: Arc<Reconciler<R>>,
    observer: Arc<dyn FundingObserver>,
    stats: Arc<MonitorStats>,
    state: MonitorState,
    active: Option<ActiveRun>,
}

impl<S, R> Monitor<S, R>
where
    S: EventSource,
    R: ChainReader + 'static,
{
    pub fn new(
        source: S,
        contract: Address,
        reconciler: Reconciler<R>,
        observer: Arc<dyn FundingObserver>,
    ) -> Self {
        Self {
            source,
            contract,
            reconciler: Arc::new(reconciler),
            observer,
            stats: Arc::new(MonitorStats::default()),
            state: MonitorState::Stopped,
            active: None,
        }
    }

    /// Current lifecycle state. A run whose stream ended on its own reads
    /// as `Stopped` even before [`Monitor::wait`] reaps it.
    pub fn state(&self) -> MonitorState {
        match &self.active {
            Some(active) if active.task.is_finished() => MonitorState::Stopped,
            _ => self.state,
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Open the subscription and start dispatching. No-op while running.
    pub async fn start(&mut self) -> Result<(), MonitorError> {
        if self.state() == MonitorState::Running {
            debug!("Monitor already running");
            return Ok(());
        }
        self.reap().await;

        self.state = MonitorState::Starting;
        info!(contract = %self.contract, event = FUNDING_EVENT, "Monitor starting");

        let Subscription { batches, handle } =
            match self.source.subscribe(FUNDING_EVENT, self.contract).await {
                Ok(subscription) => subscription,
                Err(e) => {
                    self.state = MonitorState::Stopped;
                    error!(error = %e, "Failed to open subscription");
                    return Err(e.into());
                }
            };

        let task = tokio::spawn(dispatch(
            batches,
            handle.clone(),
            Arc::clone(&self.reconciler),
            Arc::clone(&self.observer),
            Arc::clone(&self.stats),
        ));

        self.active = Some(ActiveRun { handle, task });
        self.state = MonitorState::Running;
        info!("Monitor started");
        Ok(())
    }

    /// Cancel the subscription and wait for the in-flight event to finish.
    /// Idempotent.
    pub async fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            self.state = MonitorState::Stopped;
            debug!("Monitor already stopped");
            return;
        };

        active.handle.cancel();
        match active.task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Subscription had already failed"),
            Err(e) => error!(error = %e, "Dispatch task failed"),
        }

        self.state = MonitorState::Stopped;
        let stats = self.stats.snapshot();
        info!(
            batches = stats.batches,
            funded = stats.funded,
            rejected = stats.rejected,
            failed = stats.failed,
            "Monitor stopped"
        );
    }

    /// Resolve when the dispatch loop ends on its own: the stream closed or
    /// failed. Returns the terminal subscription error, if any.
    pub async fn wait(&mut self) -> Result<(), MonitorError> {
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };

        let result = (&mut active.task).await;
        active.handle.cancel();
        self.active = None;
        self.state = MonitorState::Stopped;

        Ok(result??)
    }

    /// Collect a run that ended without `stop()` or `wait()`.
    async fn reap(&mut self) {
        if let Some(active) = self.active.take() {
            active.handle.cancel();
            if let Ok(Err(e)) = active.task.await {
                warn!(error = %e, "Previous run ended with a subscription error");
            }
        }
    }
}

impl<S, R> Drop for Monitor<S, R> {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            active.handle.cancel();
        }
    }
}

async fn dispatch<R: ChainReader>(
    mut batches: mpsc::Receiver<BatchResult>,
    handle: SubscriptionHandle,
    reconciler: Arc<Reconciler<R>>,
    observer: Arc<dyn FundingObserver>,
    stats: Arc<MonitorStats>,
) -> Result<(), SubscriptionError> {
    loop {
        let next = tokio::select! {
            biased;
            _ = handle.cancelled() => break,
            next = batches.recv() => next,
        };

        let events = match next {
            Some(Ok(events)) => events,
            Some(Err(e)) => {
                error!(error = %e, "Event stream failed");
                return Err(e);
            }
            None => {
                info!("Event stream closed");
                break;
            }
        };

        stats.batches.fetch_add(1, Ordering::Relaxed);
        debug!(events = events.len(), "Dispatching batch");

        for event in events {
            if handle.is_cancelled() {
                debug!(key = %event.key(), "Stopped before dispatching event");
                break;
            }

            let outcome = Outcome::from(reconciler.reconcile(&event).await);
            stats.record(&outcome);
            observer.observe(&MonitorReport { event, outcome });
        }
    }

    Ok(())
}
