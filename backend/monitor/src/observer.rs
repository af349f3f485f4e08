//! Outbound interface: one [`MonitorReport`] per processed event.
//!
//! Whatever drives the monitor (CLI, service wrapper, UI bridge) implements
//! [`FundingObserver`] or uses one of the two stock observers.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::errors::ReconciliationError;
use crate::events::FundingEvent;
use crate::reconcile::{ObservedFunding, Reconciliation, RejectedEvent};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Funded(ObservedFunding),
    Rejected(RejectedEvent),
    Failed(ReconciliationError),
}

impl From<Result<Reconciliation, ReconciliationError>> for Outcome {
    fn from(result: Result<Reconciliation, ReconciliationError>) -> Self {
        match result {
            Ok(Reconciliation::Funded(observed)) => Self::Funded(observed),
            Ok(Reconciliation::Rejected(rejected)) => Self::Rejected(rejected),
            Err(e) => Self::Failed(e),
        }
    }
}

/// The outcome of one event, paired with the event that triggered it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorReport {
    pub event: FundingEvent,
    pub outcome: Outcome,
}

pub trait FundingObserver: Send + Sync {
    fn observe(&self, report: &MonitorReport);
}

impl<F> FundingObserver for F
where
    F: Fn(&MonitorReport) + Send + Sync,
{
    fn observe(&self, report: &MonitorReport) {
        self(report)
    }
}

/// Writes every report to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl FundingObserver for TracingObserver {
    fn observe(&self, report: &MonitorReport) {
        let event = &report.event;
        info!(
            project_id = %event.project_id,
            total_amount = %event.total_amount,
            key = %event.key(),
            "Project {} funded with {} wei",
            event.project_id,
            event.total_amount
        );

        match &report.outcome {
            Outcome::Funded(observed) => {
                let project = &observed.snapshot;
                let deadline = project
                    .deadline_utc()
                    .map(|d| d.to_rfc3339())
                    .unwrap_or_else(|| project.deadline.to_string());
                info!(
                    project_id = %event.project_id,
                    title = %project.title,
                    description = %project.description,
                    creator = %project.creator,
                    funding_goal = %project.funding_goal,
                    current_funding = %project.current_funding,
                    deadline = %deadline,
                    funded = project.funded,
                    completed = project.completed,
                    "Project details"
                );
            }
            Outcome::Rejected(rejected) => {
                warn!(
                    project_id = %event.project_id,
                    project_count = %rejected.project_count,
                    reason = ?rejected.reason,
                    "Project ID out of range"
                );
            }
            Outcome::Failed(e) => {
                error!(
                    project_id = %e.project_id,
                    stage = %e.stage,
                    error = %e.message,
                    cause = e.cause.as_deref(),
                    details = e.details.as_deref(),
                    "Error handling funded project"
                );
            }
        }
    }
}

/// Forwards reports to an async consumer.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<MonitorReport>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MonitorReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl FundingObserver for ChannelObserver {
    fn observe(&self, report: &MonitorReport) {
        if self.tx.send(report.clone()).is_err() {
            debug!(key = %report.event.key(), "Report receiver dropped");
        }
    }
}
