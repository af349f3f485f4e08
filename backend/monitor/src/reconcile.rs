//! Reconciliation of observed `ProjectFunded` events against on-chain state.
//!
//! Every event is checked against a fresh `projectCount()` read and then
//! paired with a fresh `getProject()` snapshot. Nothing is cached between
//! events. Read failures are returned as [`ReconciliationError`] values and
//! never escape as faults.

use std::str::FromStr;

use alloy_primitives::U256;
use serde::Serialize;
use tracing::debug;

use crate::errors::{ReadStage, ReconciliationError};
use crate::events::FundingEvent;
use crate::reader::{ChainReader, ProjectSnapshot};
use crate::rpc::BlockTag;

/// Block height both reads of one event are evaluated at.
///
/// `Latest` accepts that a reorg may land between the count read and the
/// project read. `EventBlock` pins both reads to the block that emitted the
/// event, so they always see one consistent state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadConsistency {
    #[default]
    Latest,
    EventBlock,
}

impl ReadConsistency {
    fn block_for(&self, event: &FundingEvent) -> BlockTag {
        match self {
            Self::Latest => BlockTag::Latest,
            Self::EventBlock => BlockTag::Number(event.block_number),
        }
    }
}

impl FromStr for ReadConsistency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "latest" => Ok(Self::Latest),
            "event_block" => Ok(Self::EventBlock),
            other => Err(format!("expected `latest` or `event_block`, got `{other}`")),
        }
    }
}

/// A funding event confirmed against the project it references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObservedFunding {
    pub event: FundingEvent,
    pub snapshot: ProjectSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// `project_id >= projectCount()`.
    OutOfRange,
}

/// An event that failed validation. Not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedEvent {
    pub event: FundingEvent,
    pub reason: RejectionReason,
    pub project_count: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reconciliation {
    Funded(ObservedFunding),
    Rejected(RejectedEvent),
}

pub struct Reconciler<R> {
    reader: R,
    consistency: ReadConsistency,
}

impl<R: ChainReader> Reconciler<R> {
    pub fn new(reader: R, consistency: ReadConsistency) -> Self {
        Self {
            reader,
            consistency,
        }
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    pub fn consistency(&self) -> ReadConsistency {
        self.consistency
    }

    /// Validate one event and fetch the project it funded.
    pub async fn reconcile(
        &self,
        event: &FundingEvent,
    ) -> Result<Reconciliation, ReconciliationError> {
        let project_id = event.project_id;
        let block = self.consistency.block_for(event);

        debug!(%project_id, key = %event.key(), ?block, "Reading project count");
        let project_count = self
            .reader
            .project_count(block)
            .await
            .map_err(|e| ReconciliationError::new(project_id, ReadStage::ProjectCount, &e))?;

        if project_id >= project_count {
            return Ok(Reconciliation::Rejected(RejectedEvent {
                event: event.clone(),
                reason: RejectionReason::OutOfRange,
                project_count,
            }));
        }

        debug!(%project_id, %project_count, "Reading project");
        let snapshot = self
            .reader
            .project(project_id, block)
            .await
            .map_err(|e| ReconciliationError::new(project_id, ReadStage::Project, &e))?;

        Ok(Reconciliation::Funded(ObservedFunding {
            event: event.clone(),
            snapshot,
        }))
    }
}
