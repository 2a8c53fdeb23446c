// Chain client abstraction shared by the source and destination side

use async_trait::async_trait;
use ethers::types::{Address, Bytes, Log, TxHash, U256};
use futures::stream::BoxStream;

use crate::evm::revert::RevertData;
use crate::types::{ConfirmedTx, LogFilter};

/// Live log feed. Logs arrive in block order. The feed ends after yielding a
/// connectivity error, and only between two block ranges, so resubscribing
/// from the block after the last delivered log misses nothing.
pub type LogStream = BoxStream<'static, Result<Log, AdapterError>>;

/// Errors surfaced by a chain client.
#[derive(thiserror::Error, Debug, Clone)]
pub enum AdapterError {
    /// RPC endpoint unreachable or the connection dropped
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Log query spans more blocks than the endpoint accepts
    #[error("Log range too large: {from}..={to}")]
    RangeTooLarge { from: u64, to: u64 },

    /// Read-only contract call failed or returned undecodable data
    #[error("Contract read failed: {0}")]
    ContractRead(String),

    /// Transaction rejected before inclusion (nonce, funds, mempool)
    #[error("Submission rejected (code {code:?}): {message}")]
    Submission { code: Option<i64>, message: String },

    /// Destination contract refused the call with decodable revert data
    #[error("Contract reverted: {0}")]
    ContractRevert(RevertData),

    /// Transaction was mined but failed without revert data
    #[error("Transaction {tx_hash:?} reverted on chain")]
    Reverted { tx_hash: TxHash },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Submission requested on a read-only client
    #[error("No signer configured for this chain")]
    MissingSigner,

    #[error("Decode error: {0}")]
    Decode(String),
}

impl AdapterError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, AdapterError::Connectivity(_) | AdapterError::Timeout(_))
    }
}

/// Chain I/O used by every relayer component.
///
/// One instance per chain. Implementations hold a single connection and do
/// not reconnect on their own; a dropped subscription is reported to the
/// caller through the stream.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current block height.
    async fn get_height(&self) -> Result<u64, AdapterError>;

    /// Historical logs in `[from, to]`, inclusive.
    async fn query_logs(&self, filter: LogFilter, from: u64, to: u64) -> Result<Vec<Log>, AdapterError>;

    /// Tail of logs from `from_block` onwards, following the head as it grows.
    async fn subscribe_logs(&self, filter: LogFilter, from_block: u64) -> Result<LogStream, AdapterError>;

    /// `eth_call` against `contract`, returning the raw ABI-encoded result.
    async fn call_view(&self, contract: Address, calldata: Bytes) -> Result<Bytes, AdapterError>;

    /// Signs and broadcasts a call. Returns once the node accepted it.
    async fn send_signed_tx(
        &self,
        contract: Address,
        calldata: Bytes,
        gas_hint: Option<U256>,
    ) -> Result<TxHash, AdapterError>;

    /// Waits until `tx_hash` is mined with the configured confirmations.
    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<ConfirmedTx, AdapterError>;
}
