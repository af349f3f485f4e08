//! Contract bindings and the canonical event type produced by the subscriber.
//!
//! The ABI below mirrors the deployed `PublicInference` crowdfunding
//! contract. Only the event and the two read methods the monitor touches are
//! declared; a mismatch with the deployed contract shows up as a decode error
//! at the boundary that first sees the data.

use std::fmt;

use alloy_primitives::{B256, U256};
use alloy_sol_types::{sol, SolEvent};
use serde::Serialize;

use crate::rpc::RawLog;

sol! {
    contract PublicInference {
        event ProjectFunded(uint256 projectId, uint256 totalAmount);

        function projectCount() external view returns (uint256);

        function getProject(uint256 projectId) external view returns (
            string memory title,
            string memory description,
            address creator,
            uint256 fundingGoal,
            uint256 currentFunding,
            uint256 deadline,
            bool funded,
            bool completed
        );
    }
}

/// Name of the event the monitor subscribes to.
pub const FUNDING_EVENT: &str = "ProjectFunded";

/// Contract events a subscription can be opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchedEvent {
    ProjectFunded,
}

impl WatchedEvent {
    /// Resolve an ABI event name. Unknown names yield `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ProjectFunded" => Some(Self::ProjectFunded),
            _ => None,
        }
    }

    /// Canonical Solidity signature, e.g. `ProjectFunded(uint256,uint256)`.
    pub fn signature(&self) -> &'static str {
        match self {
            Self::ProjectFunded => PublicInference::ProjectFunded::SIGNATURE,
        }
    }

    /// keccak256 of the signature, i.e. the log's `topic0`.
    pub fn topic(&self) -> B256 {
        match self {
            Self::ProjectFunded => PublicInference::ProjectFunded::SIGNATURE_HASH,
        }
    }
}

/// Position of a log on chain; unique per event and totally ordered in
/// delivery order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct EventKey {
    pub block_number: u64,
    pub log_index: u64,
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block_number, self.log_index)
    }
}

/// A decoded `ProjectFunded` log. Never mutated after decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FundingEvent {
    pub project_id: U256,
    /// Wei.
    pub total_amount: U256,
    pub block_number: u64,
    pub log_index: u64,
    pub transaction_hash: Option<B256>,
}

impl FundingEvent {
    pub fn key(&self) -> EventKey {
        EventKey {
            block_number: self.block_number,
            log_index: self.log_index,
        }
    }

    /// Decode a raw log whose position has already been validated.
    ///
    /// Checks `topic0` against the event signature and the data against the
    /// declared argument types.
    pub fn decode(log: &RawLog, key: EventKey) -> Result<Self, alloy_sol_types::Error> {
        let decoded = PublicInference::ProjectFunded::decode_raw_log(
            log.topics.iter().copied(),
            &log.data,
            true,
        )?;

        Ok(Self {
            project_id: decoded.projectId,
            total_amount: decoded.totalAmount,
            block_number: key.block_number,
            log_index: key.log_index,
            transaction_hash: log.transaction_hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{Address, Bytes};

    use super::*;

    fn funded_log(topics: Vec<B256>, data: Vec<u8>) -> RawLog {
        RawLog {
            address: Address::ZERO,
            topics,
            data: Bytes::from(data),
            block_number: None,
            log_index: None,
            transaction_hash: Some(B256::repeat_byte(0x01)),
            removed: false,
        }
    }

    #[test]
    fn watched_event_from_name() {
        assert_eq!(
            WatchedEvent::from_name(FUNDING_EVENT),
            Some(WatchedEvent::ProjectFunded)
        );
        assert_eq!(WatchedEvent::from_name("ProjectCreated"), None);
        assert_eq!(WatchedEvent::from_name("projectFunded"), None);
    }

    #[test]
    fn watched_event_signature() {
        let event = WatchedEvent::ProjectFunded;
        assert_eq!(event.signature(), "ProjectFunded(uint256,uint256)");
        assert_eq!(
            event.topic(),
            alloy_primitives::keccak256("ProjectFunded(uint256,uint256)")
        );
    }

    #[test]
    fn event_keys_order_by_block_then_log_index() {
        let a = EventKey { block_number: 10, log_index: 7 };
        let b = EventKey { block_number: 11, log_index: 0 };
        let c = EventKey { block_number: 11, log_index: 2 };

        assert!(a < b && b < c);
        assert_eq!(c.to_string(), "11:2");
    }

    #[test]
    fn decode_funded_log() {
        let data = PublicInference::ProjectFunded {
            projectId: U256::from(42),
            totalAmount: U256::from(5000),
        }
        .encode_data();
        let log = funded_log(vec![WatchedEvent::ProjectFunded.topic()], data);
        let key = EventKey { block_number: 1000, log_index: 3 };

        let event = FundingEvent::decode(&log, key).unwrap();

        assert_eq!(event.project_id, U256::from(42));
        assert_eq!(event.total_amount, U256::from(5000));
        assert_eq!(event.key(), key);
        assert_eq!(event.transaction_hash, Some(B256::repeat_byte(0x01)));
    }

    #[test]
    fn decode_rejects_foreign_topic() {
        let data = PublicInference::ProjectFunded {
            projectId: U256::from(1),
            totalAmount: U256::from(1),
        }
        .encode_data();
        let log = funded_log(vec![B256::repeat_byte(0xee)], data);

        assert!(FundingEvent::decode(&log, EventKey { block_number: 1, log_index: 0 }).is_err());
    }

    #[test]
    fn decode_rejects_truncated_data() {
        let log = funded_log(vec![WatchedEvent::ProjectFunded.topic()], vec![0u8; 32]);

        assert!(FundingEvent::decode(&log, EventKey { block_number: 1, log_index: 0 }).is_err());
    }
}
