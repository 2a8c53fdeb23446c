use std::sync::Arc;

use ethers::abi::{AbiDecode, AbiEncode};
use ethers::types::{Address, U256};
use tracing::debug;

use crate::chainadapter::{AdapterError, ChainClient};
use crate::evm::types::{BountiesCall, BountiesReturn};
use crate::types::{DestinationRecord, SettlementDecision};

impl From<BountiesReturn> for DestinationRecord {
    fn from(ret: BountiesReturn) -> Self {
        Self {
            bounty_id: ret.bounty_id,
            employer: ret.employer,
            budget: ret.budget,
            completed: ret.is_completed,
            active: ret.is_active,
        }
    }
}

/// Answers "has this bounty already been paid out?" from BountyManager state.
///
/// Nothing is cached: every query is a fresh `eth_call`, so a settlement made
/// by another actor between observation and dispatch is always seen.
pub struct IdempotencyOracle {
    client: Arc<dyn ChainClient>,
    manager: Address,
}

impl IdempotencyOracle {
    pub fn new(client: Arc<dyn ChainClient>, manager: Address) -> Self {
        Self { client, manager }
    }

    pub async fn read_record(&self, bounty_id: U256) -> Result<DestinationRecord, AdapterError> {
        let calldata = BountiesCall { bounty_id }.encode();
        let raw = self.client.call_view(self.manager, calldata.into()).await?;
        let ret = BountiesReturn::decode(raw.as_ref())
            .map_err(|e| AdapterError::ContractRead(format!("bounties({}) returned undecodable data: {}", bounty_id, e)))?;
        Ok(ret.into())
    }

    pub async fn should_settle(&self, bounty_id: U256) -> Result<(SettlementDecision, DestinationRecord), AdapterError> {
        let record = self.read_record(bounty_id).await?;
        let decision = record.decision();
        debug!(
            "bountyId={} completed={} active={} -> {:?}",
            bounty_id, record.completed, record.active, decision
        );
        Ok((decision, record))
    }
}
