//! Chain reader: typed contract reads over `eth_call`.
//!
//! Raw return data is ABI-decoded exactly once, here, so the rest of the
//! crate only ever sees a [`ProjectSnapshot`] with named fields. Arity and
//! field order are checked by the decoder against the `getProject` ABI.

use std::sync::Arc;

use alloy_primitives::{Address, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::errors::{ChainQueryError, QueryResult};
use crate::events::PublicInference;
use crate::rpc::{BlockTag, RpcClient};

/// Point-in-time read of a project's on-chain state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectSnapshot {
    pub title: String,
    pub description: String,
    pub creator: Address,
    pub funding_goal: U256,
    pub current_funding: U256,
    /// Unix seconds.
    pub deadline: U256,
    pub funded: bool,
    pub completed: bool,
}

impl ProjectSnapshot {
    /// Deadline as a UTC timestamp, for display. `None` when it does not
    /// fit a `DateTime`.
    pub fn deadline_utc(&self) -> Option<DateTime<Utc>> {
        let secs = u64::try_from(self.deadline).ok()?;
        DateTime::from_timestamp(i64::try_from(secs).ok()?, 0)
    }
}

impl From<PublicInference::getProjectReturn> for ProjectSnapshot {
    fn from(raw: PublicInference::getProjectReturn) -> Self {
        Self {
            title: raw.title,
            description: raw.description,
            creator: raw.creator,
            funding_goal: raw.fundingGoal,
            current_funding: raw.currentFunding,
            deadline: raw.deadline,
            funded: raw.funded,
            completed: raw.completed,
        }
    }
}

/// Read-only access to the crowdfunding contract.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// `projectCount()`, the number of projects ever created.
    async fn project_count(&self, block: BlockTag) -> QueryResult<U256>;

    /// `getProject(projectId)` decoded into a snapshot.
    async fn project(&self, project_id: U256, block: BlockTag) -> QueryResult<ProjectSnapshot>;
}

#[async_trait]
impl<T: ChainReader + ?Sized> ChainReader for Arc<T> {
    async fn project_count(&self, block: BlockTag) -> QueryResult<U256> {
        (**self).project_count(block).await
    }

    async fn project(&self, project_id: U256, block: BlockTag) -> QueryResult<ProjectSnapshot> {
        (**self).project(project_id, block).await
    }
}

/// [`ChainReader`] backed by a JSON-RPC endpoint.
pub struct RpcChainReader {
    rpc: Arc<RpcClient>,
    contract: Address,
}

impl RpcChainReader {
    pub fn new(rpc: Arc<RpcClient>, contract: Address) -> Self {
        Self { rpc, contract }
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    /// Execute a read method and decode its return tuple.
    pub async fn call<C: SolCall + Sync>(&self, call: &C, block: BlockTag) -> QueryResult<C::Return> {
        let output = self.rpc.call(self.contract, &call.abi_encode(), block).await?;

        // A call to an address without code succeeds with empty output.
        if output.is_empty() {
            return Err(ChainQueryError::InvalidResponse(format!(
                "{} returned no data; is {} the contract address?",
                C::SIGNATURE,
                self.contract
            )));
        }

        debug!(method = C::SIGNATURE, bytes = output.len(), "Decoding contract response");
        Ok(C::abi_decode_returns(&output, true)?)
    }
}

#[async_trait]
impl ChainReader for RpcChainReader {
    async fn project_count(&self, block: BlockTag) -> QueryResult<U256> {
        let count = self
            .call(&PublicInference::projectCountCall {}, block)
            .await?;
        Ok(count._0)
    }

    async fn project(&self, project_id: U256, block: BlockTag) -> QueryResult<ProjectSnapshot> {
        let call = PublicInference::getProjectCall {
            projectId: project_id,
        };
        let raw = self.call(&call, block).await?;
        Ok(raw.into())
    }
}
