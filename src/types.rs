use std::fmt;

use ethers::types::{Address, TxHash, H256, U256};

/// A `PaymentTriggered` occurrence on the source chain.
///
/// Identified by `id` (the bounty id assigned by the source contract). The
/// relayer never stores these; the source chain log is the only durable copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementEvent {
    pub id: U256,
    pub beneficiary: Address,
    pub source_tx: Option<TxHash>,
    pub source_block: Option<u64>,
    pub log_index: Option<U256>,
}

impl SettlementEvent {
    pub fn new(id: U256, beneficiary: Address) -> Self {
        Self { id, beneficiary, source_tx: None, source_block: None, log_index: None }
    }

    pub fn with_source(mut self, tx: TxHash, block: u64) -> Self {
        self.source_tx = Some(tx);
        self.source_block = Some(block);
        self
    }
}

impl fmt::Display for SettlementEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bountyId={} developer={:?}", self.id, self.beneficiary)
    }
}

/// Destination-side bounty state, read fresh for every dispatch decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationRecord {
    pub bounty_id: U256,
    pub employer: Address,
    pub budget: U256,
    pub completed: bool,
    pub active: bool,
}

impl DestinationRecord {
    /// Completion wins over the active flag: a completed bounty is reported
    /// as already settled even though the contract also clears `isActive`.
    pub fn decision(&self) -> SettlementDecision {
        if self.completed {
            SettlementDecision::AlreadySettled
        } else if !self.active {
            SettlementDecision::NoLongerEligible
        } else {
            SettlementDecision::Proceed
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementDecision {
    Proceed,
    AlreadySettled,
    NoLongerEligible,
}

/// Contract address plus event topic the scanner and subscriber filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Address,
    pub signature: H256,
}

impl LogFilter {
    pub fn new(address: Address, signature: H256) -> Self {
        Self { address, signature }
    }

    pub fn to_filter(&self, from: u64, to: u64) -> ethers::types::Filter {
        ethers::types::Filter::new()
            .address(self.address)
            .topic0(self.signature)
            .from_block(from)
            .to_block(to)
    }
}

/// What the destination chain reported once a settlement was mined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedTx {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub gas_used: Option<U256>,
}

/// One in-flight settlement attempt. Lives only inside a single `handle` call.
#[derive(Debug, Clone)]
pub struct DispatchAttempt {
    pub event_id: U256,
    pub attempt_number: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
}

impl DispatchAttempt {
    pub fn new(event_id: U256, max_attempts: u32) -> Self {
        Self { event_id, attempt_number: 0, max_attempts, last_error: None }
    }

    /// Moves to the next attempt. Returns false once the cap is reached.
    pub fn advance(&mut self) -> bool {
        if self.attempt_number >= self.max_attempts {
            return false;
        }
        self.attempt_number += 1;
        true
    }

    pub fn is_last(&self) -> bool {
        self.attempt_number >= self.max_attempts
    }

    pub fn record_error(&mut self, error: impl ToString) {
        self.last_error = Some(error.to_string());
    }
}
