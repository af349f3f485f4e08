//! Test doubles for the chain reader and the event source.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use alloy_primitives::{address, Address, B256, U256};
use async_trait::async_trait;
use tokio::sync::{mpsc, Notify, Semaphore};

use crate::errors::{ChainQueryError, QueryResult, SubscriptionError};
use crate::events::{FundingEvent, WatchedEvent};
use crate::reader::{ChainReader, ProjectSnapshot};
use crate::rpc::BlockTag;
use crate::subscriber::{BatchResult, EventSource, Subscription, SubscriptionHandle};

pub(crate) const CONTRACT: Address = address!("5fbdb2315678afecb367f032d93f642f64180aa3");

/// `("Art Grant", "desc", 0xabc…, 1000, 500, 1999999999, false, false)`
pub(crate) fn art_grant() -> ProjectSnapshot {
    ProjectSnapshot {
        title: "Art Grant".to_string(),
        description: "desc".to_string(),
        creator: address!("abcabcabcabcabcabcabcabcabcabcabcabcabca"),
        funding_goal: U256::from(1000),
        current_funding: U256::from(500),
        deadline: U256::from(1_999_999_999u64),
        funded: false,
        completed: false,
    }
}

pub(crate) fn project_named(title: &str) -> ProjectSnapshot {
    ProjectSnapshot {
        title: title.to_string(),
        ..art_grant()
    }
}

pub(crate) fn funding_event(
    project_id: u64,
    total_amount: u64,
    block_number: u64,
    log_index: u64,
) -> FundingEvent {
    FundingEvent {
        project_id: U256::from(project_id),
        total_amount: U256::from(total_amount),
        block_number,
        log_index,
        transaction_hash: Some(B256::with_last_byte(log_index as u8)),
    }
}

fn reverted() -> ChainQueryError {
    ChainQueryError::Rpc {
        code: -32000,
        message: "execution reverted".to_string(),
        data: None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ReaderCall {
    ProjectCount(BlockTag),
    Project(U256, BlockTag),
}

/// Scripted [`ChainReader`] that records every call.
///
/// With a gate installed, `project()` announces itself on `entered` and then
/// blocks until the test adds a permit to the gate.
pub(crate) struct MockReader {
    count: U256,
    count_fails: bool,
    projects: HashMap<U256, ProjectSnapshot>,
    failing: HashSet<U256>,
    calls: Mutex<Vec<ReaderCall>>,
    gate: Option<Arc<Semaphore>>,
    entered: Arc<Notify>,
}

impl MockReader {
    pub(crate) fn new(count: u64) -> Self {
        Self {
            count: U256::from(count),
            count_fails: false,
            projects: HashMap::new(),
            failing: HashSet::new(),
            calls: Mutex::new(Vec::new()),
            gate: None,
            entered: Arc::new(Notify::new()),
        }
    }

    pub(crate) fn with_project(mut self, id: u64, snapshot: ProjectSnapshot) -> Self {
        self.projects.insert(U256::from(id), snapshot);
        self
    }

    pub(crate) fn failing_project(mut self, id: u64) -> Self {
        self.failing.insert(U256::from(id));
        self
    }

    pub(crate) fn failing_count(mut self) -> Self {
        self.count_fails = true;
        self
    }

    pub(crate) fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub(crate) fn entered(&self) -> Arc<Notify> {
        Arc::clone(&self.entered)
    }

    pub(crate) fn calls(&self) -> Vec<ReaderCall> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn project_reads(&self) -> Vec<U256> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ReaderCall::Project(id, _) => Some(id),
                ReaderCall::ProjectCount(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl ChainReader for MockReader {
    async fn project_count(&self, block: BlockTag) -> QueryResult<U256> {
        self.calls.lock().unwrap().push(ReaderCall::ProjectCount(block));
        if self.count_fails {
            return Err(reverted());
        }
        Ok(self.count)
    }

    async fn project(&self, project_id: U256, block: BlockTag) -> QueryResult<ProjectSnapshot> {
        self.calls
            .lock()
            .unwrap()
            .push(ReaderCall::Project(project_id, block));

        if let Some(gate) = &self.gate {
            self.entered.notify_one();
            gate.acquire().await.unwrap().forget();
        }

        if self.failing.contains(&project_id) {
            return Err(reverted());
        }
        self.projects.get(&project_id).cloned().ok_or_else(reverted)
    }
}

/// [`EventSource`] whose batches are pushed by the test.
#[derive(Default)]
pub(crate) struct MockSource {
    subscriptions: Mutex<Vec<(mpsc::Sender<BatchResult>, SubscriptionHandle)>>,
    fail: bool,
}

impl MockSource {
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub(crate) fn subscribe_count(&self) -> usize {
        self.subscriptions.lock().unwrap().len()
    }

    /// Sender and handle of the most recent subscription.
    pub(crate) fn latest(&self) -> (mpsc::Sender<BatchResult>, SubscriptionHandle) {
        self.subscriptions
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no subscription opened")
    }
}

#[async_trait]
impl EventSource for MockSource {
    async fn subscribe(
        &self,
        event_name: &str,
        _address: Address,
    ) -> Result<Subscription, SubscriptionError> {
        if self.fail || WatchedEvent::from_name(event_name).is_none() {
            return Err(SubscriptionError::UnknownEvent(event_name.to_string()));
        }

        let (tx, rx) = mpsc::channel(16);
        let handle = SubscriptionHandle::new();
        self.subscriptions
            .lock()
            .unwrap()
            .push((tx, handle.clone()));

        Ok(Subscription {
            batches: rx,
            handle,
        })
    }
}
