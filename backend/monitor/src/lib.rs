//! Crowdfunding funding monitor.
//!
//! Watches a deployed crowdfunding contract for `ProjectFunded` events and
//! reconciles each one against the contract's own view state:
//!
//! 1. [`subscriber`] polls the node for new logs and delivers them as
//!    ordered batches.
//! 2. [`reconcile`] range-checks the project id against `projectCount()`
//!    and reads the project record with `getProject(id)`.
//! 3. [`monitor`] owns the subscription lifecycle and feeds every outcome
//!    to a [`observer::FundingObserver`].
//!
//! All chain access goes through [`rpc::RpcClient`], a thin JSON-RPC client
//! over HTTP.

pub mod config;
pub mod errors;
pub mod events;
pub mod monitor;
pub mod observer;
pub mod reader;
pub mod reconcile;
pub mod rpc;
pub mod subscriber;

#[cfg(test)]
mod test_utils;

pub use config::Config;
pub use errors::{ChainQueryError, MonitorError, ReconciliationError, SubscriptionError};
pub use events::{EventKey, FundingEvent, FUNDING_EVENT};
pub use monitor::{Monitor, MonitorState, StatsSnapshot};
pub use observer::{ChannelObserver, FundingObserver, MonitorReport, Outcome, TracingObserver};
pub use reader::{ChainReader, ProjectSnapshot, RpcChainReader};
pub use reconcile::{ReadConsistency, Reconciler};
pub use rpc::{BlockTag, RpcClient};
pub use subscriber::{EventSource, LogSubscriber, PollSettings, Subscription, SubscriptionHandle};
