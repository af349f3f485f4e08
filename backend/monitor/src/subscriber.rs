//! Live subscription to one contract event, delivered as ordered batches.
//!
//! [`LogSubscriber`] polls `eth_getLogs` over HTTP. Each poll covers the
//! blocks mined since the previous one, split into chunks of at most
//! `max_block_range` blocks, and every non-empty chunk becomes one batch on
//! the subscription channel.
//!
//! ## Ordering and delivery
//!
//! * Events within a batch and across batches are in `(block_number,
//!   log_index)` order.
//! * The block cursor only advances once a batch is on the channel, so a
//!   fetched batch is never skipped; a key at or below the last delivered
//!   key is never delivered twice.
//!
//! ## Resilience
//!
//! Transient failures back off exponentially and retry. A hard JSON-RPC
//! error, a log that does not decode as `ProjectFunded`, or too many
//! consecutive failures end the stream with a terminal
//! [`SubscriptionError`].

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::{ChainQueryError, SubscriptionError};
use crate::events::{EventKey, FundingEvent, WatchedEvent};
use crate::rpc::{LogFilter, RawLog, RpcClient};

pub type BatchResult = Result<Vec<FundingEvent>, SubscriptionError>;

/// Receiving end of a subscription plus the handle that cancels it.
pub struct Subscription {
    pub batches: mpsc::Receiver<BatchResult>,
    pub handle: SubscriptionHandle,
}

/// Cancels a subscription. Cloneable, idempotent, usable from any task.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionHandle {
    token: CancellationToken,
}

impl SubscriptionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

/// Producer of event batches for one contract.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Open a subscription to `event_name` logs emitted by `address`.
    ///
    /// Fails immediately if the event is not part of the contract ABI.
    async fn subscribe(
        &self,
        event_name: &str,
        address: Address,
    ) -> Result<Subscription, SubscriptionError>;
}

#[async_trait]
impl<T: EventSource + ?Sized> EventSource for Arc<T> {
    async fn subscribe(
        &self,
        event_name: &str,
        address: Address,
    ) -> Result<Subscription, SubscriptionError> {
        (**self).subscribe(event_name, address).await
    }
}

#[derive(Debug, Clone)]
pub struct PollSettings {
    pub poll_interval: Duration,
    /// First block to scan. Defaults to the block after the head at
    /// subscription time.
    pub start_block: Option<u64>,
    pub max_block_range: u64,
    pub max_consecutive_failures: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub channel_capacity: usize,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(4_000),
            start_block: None,
            max_block_range: 1_000,
            max_consecutive_failures: 5,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            channel_capacity: 64,
        }
    }
}

/// [`EventSource`] that polls `eth_getLogs` on a JSON-RPC endpoint.
pub struct LogSubscriber {
    rpc: Arc<RpcClient>,
    settings: PollSettings,
}

impl LogSubscriber {
    pub fn new(rpc: Arc<RpcClient>, settings: PollSettings) -> Self {
        Self { rpc, settings }
    }
}

#[async_trait]
impl EventSource for LogSubscriber {
    async fn subscribe(
        &self,
        event_name: &str,
        address: Address,
    ) -> Result<Subscription, SubscriptionError> {
        let event = WatchedEvent::from_name(event_name)
            .ok_or_else(|| SubscriptionError::UnknownEvent(event_name.to_string()))?;

        let next_block = match self.settings.start_block {
            Some(block) => block,
            None => self.rpc.block_number().await.map_err(SubscriptionError::Rpc)? + 1,
        };

        let (tx, rx) = mpsc::channel(self.settings.channel_capacity);
        let handle = SubscriptionHandle::new();

        let poller = LogPoller {
            rpc: Arc::clone(&self.rpc),
            settings: self.settings.clone(),
            address,
            event,
            next_block,
            last_delivered: None,
        };
        tokio::spawn(poller.run(tx, handle.clone()));

        info!(
            %address,
            event = event.signature(),
            from_block = next_block,
            "Subscribed to contract events"
        );

        Ok(Subscription {
            batches: rx,
            handle,
        })
    }
}

// ─────────────────────────────────────────────────────────
// Polling loop
// ─────────────────────────────────────────────────────────

enum PollFailure {
    Query(ChainQueryError),
    Terminal(SubscriptionError),
    ReceiverGone,
}

impl From<ChainQueryError> for PollFailure {
    fn from(error: ChainQueryError) -> Self {
        Self::Query(error)
    }
}

struct LogPoller {
    rpc: Arc<RpcClient>,
    settings: PollSettings,
    address: Address,
    event: WatchedEvent,
    next_block: u64,
    last_delivered: Option<EventKey>,
}

impl LogPoller {
    async fn run(mut self, tx: mpsc::Sender<BatchResult>, handle: SubscriptionHandle) {
        let mut failures = 0u32;
        let mut backoff = self.settings.initial_backoff;

        loop {
            let polled = tokio::select! {
                biased;
                _ = handle.cancelled() => break,
                polled = self.poll_once(&tx) => polled,
            };

            let delay = match polled {
                Ok(()) => {
                    failures = 0;
                    backoff = self.settings.initial_backoff;
                    self.settings.poll_interval
                }
                Err(PollFailure::ReceiverGone) => {
                    debug!("Subscription receiver dropped");
                    break;
                }
                Err(PollFailure::Terminal(e)) => {
                    error!(error = %e, "Subscription failed");
                    let _ = tx.send(Err(e)).await;
                    break;
                }
                Err(PollFailure::Query(e)) if e.is_hard() => {
                    error!(error = %e, "Subscription hit a hard RPC error");
                    let _ = tx.send(Err(SubscriptionError::Rpc(e))).await;
                    break;
                }
                Err(PollFailure::Query(e)) => {
                    failures += 1;
                    if failures >= self.settings.max_consecutive_failures {
                        error!(attempts = failures, error = %e, "Giving up on subscription");
                        let _ = tx
                            .send(Err(SubscriptionError::RetriesExhausted {
                                attempts: failures,
                                last: e,
                            }))
                            .await;
                        break;
                    }
                    if e.is_rate_limited() {
                        warn!(attempt = failures, "Rate-limited by RPC (will retry in {backoff:?})");
                    } else {
                        warn!(attempt = failures, error = %e, "Log poll failed (will retry in {backoff:?})");
                    }
                    let delay = backoff;
                    backoff = (backoff * 2).min(self.settings.max_backoff);
                    delay
                }
            };

            tokio::select! {
                biased;
                _ = handle.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!(next_block = self.next_block, "Subscription closed");
    }

    /// Fetch and deliver everything between the cursor and the current head.
    async fn poll_once(&mut self, tx: &mpsc::Sender<BatchResult>) -> Result<(), PollFailure> {
        let head = self.rpc.block_number().await?;
        if head < self.next_block {
            debug!(head, next_block = self.next_block, "No new blocks");
            return Ok(());
        }

        while self.next_block <= head {
            let from_block = self.next_block;
            let span = self.settings.max_block_range.max(1) - 1;
            let to_block = head.min(from_block.saturating_add(span));

            let filter = LogFilter {
                address: self.address,
                topic0: self.event.topic(),
                from_block,
                to_block,
            };
            let logs = self.rpc.get_logs(&filter).await?;
            let batch = self.decode_batch(logs)?;

            debug!(from_block, to_block, events = batch.len(), "Fetched log range");

            if let Some(last) = batch.last() {
                let last_key = last.key();
                tx.send(Ok(batch))
                    .await
                    .map_err(|_| PollFailure::ReceiverGone)?;
                self.last_delivered = Some(last_key);
            }

            self.next_block = to_block + 1;
        }

        Ok(())
    }

    /// Decode, order and de-duplicate one `eth_getLogs` response.
    fn decode_batch(&self, logs: Vec<RawLog>) -> Result<Vec<FundingEvent>, PollFailure> {
        let mut keyed = Vec::with_capacity(logs.len());
        for log in logs {
            if log.removed {
                debug!(tx = ?log.transaction_hash, "Skipping removed log");
                continue;
            }
            let key = log.key()?;
            keyed.push((key, log));
        }

        keyed.sort_by_key(|(key, _)| *key);
        keyed.dedup_by_key(|(key, _)| *key);

        let mut batch = Vec::with_capacity(keyed.len());
        for (key, log) in keyed {
            if self.last_delivered.is_some_and(|last| key <= last) {
                debug!(%key, "Skipping already delivered log");
                continue;
            }
            let event = FundingEvent::decode(&log, key).map_err(|source| {
                PollFailure::Terminal(SubscriptionError::Decode {
                    block_number: key.block_number,
                    log_index: key.log_index,
                    source,
                })
            })?;
            batch.push(event);
        }

        Ok(batch)
    }
}
