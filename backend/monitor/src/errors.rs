//! Application-wide error types.
//!
//! Configuration and subscription errors are fatal to a run. A
//! [`ChainQueryError`] only ever affects the event being reconciled and
//! reaches the observer wrapped in a [`ReconciliationError`].

use std::fmt;

use alloy_primitives::U256;
use serde::Serialize;
use thiserror::Error;

/// JSON-RPC error codes that mean the request itself is malformed and
/// retrying it cannot help.
const HARD_RPC_ERROR_CODES: [i64; 2] = [-32600, -32601];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing env var: {0}")]
    Missing(&'static str),

    #[error("Invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// A single contract read or log query failed.
#[derive(Debug, Error)]
pub enum ChainQueryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("RPC endpoint responded with HTTP {0}")]
    Status(reqwest::StatusCode),

    #[error("RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("ABI decode error: {0}")]
    Decode(#[from] alloy_sol_types::Error),

    #[error("Invalid RPC response: {0}")]
    InvalidResponse(String),
}

impl ChainQueryError {
    /// Invalid request / method not found. Everything else is worth retrying.
    pub fn is_hard(&self) -> bool {
        matches!(self, Self::Rpc { code, .. } if HARD_RPC_ERROR_CODES.contains(code))
    }

    /// The endpoint answered HTTP 429.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Status(status) if *status == reqwest::StatusCode::TOO_MANY_REQUESTS)
    }

    /// Innermost error in the source chain, if there is one.
    pub fn root_cause(&self) -> Option<String> {
        let mut source = std::error::Error::source(self)?;
        while let Some(next) = source.source() {
            source = next;
        }
        Some(source.to_string())
    }

    /// Provider-specific detail that is not part of the display message.
    pub fn details(&self) -> Option<String> {
        match self {
            Self::Rpc {
                code,
                data: Some(data),
                ..
            } => Some(format!("code={code} data={data}")),
            Self::Rpc { code, .. } => Some(format!("code={code}")),
            Self::Status(status) => Some(format!("status={status}")),
            _ => None,
        }
    }
}

pub type QueryResult<T> = std::result::Result<T, ChainQueryError>;

/// Which contract read failed while reconciling an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadStage {
    ProjectCount,
    Project,
}

impl fmt::Display for ReadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProjectCount => f.write_str("projectCount"),
            Self::Project => f.write_str("getProject"),
        }
    }
}

/// A chain read failure attached to the project the event referenced.
///
/// Carried to the observer as data; it never stops the dispatch loop.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("Error handling funded project {project_id} during {stage}: {message}")]
pub struct ReconciliationError {
    pub project_id: U256,
    pub stage: ReadStage,
    pub message: String,
    pub cause: Option<String>,
    pub details: Option<String>,
}

impl ReconciliationError {
    pub fn new(project_id: U256, stage: ReadStage, error: &ChainQueryError) -> Self {
        Self {
            project_id,
            stage,
            message: error.to_string(),
            cause: error.root_cause(),
            details: error.details(),
        }
    }
}

/// Failure of the live event stream. Terminal for the current run.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("Event `{0}` is not part of the contract ABI")]
    UnknownEvent(String),

    #[error("RPC error: {0}")]
    Rpc(#[source] ChainQueryError),

    #[error("Gave up after {attempts} consecutive failures: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: ChainQueryError,
    },

    #[error("Log {block_number}:{log_index} does not match the ProjectFunded ABI: {source}")]
    Decode {
        block_number: u64,
        log_index: u64,
        #[source]
        source: alloy_sol_types::Error,
    },
}

/// Errors surfaced by the monitor supervisor to whoever drives it.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Subscription error: {0}")]
    Subscription(#[from] SubscriptionError),

    #[error("Dispatch task failed: {0}")]
    Dispatch(#[from] tokio::task::JoinError),
}
