// Contract bindings and EVM-side defaults

use std::time::Duration;

use ethers::contract::abigen;

/// Default confirmations before a settlement counts as confirmed
pub const DEFAULT_CONFIRMATIONS: usize = 1;

/// Default timeout for RPC requests
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on waiting for a broadcast settlement to be mined
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(120);

/// Interval between head polls while tailing logs or awaiting receipts
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// Largest block span requested in a single `eth_getLogs`
pub const DEFAULT_MAX_BLOCK_RANGE: u64 = 2048;

/// JSON-RPC code nodes use for "query returned too many results / range too wide"
pub const RPC_LIMIT_EXCEEDED: i64 = -32005;

/// Buffered logs between the polling task and the consumer
pub const LOG_CHANNEL_CAPACITY: usize = 256;

abigen!(
    BountyExecutor,
    r#"[
        event PaymentTriggered(uint256 indexed bountyId, address indexed developer)
    ]"#,
);

abigen!(
    BountyManager,
    r#"[
        function forceSettleByEmployer(uint256 bountyId, address developer) external
        function bounties(uint256 bountyId) external view returns (uint256 bountyId, address employer, uint256 budget, string ipfsDocHash, bool isActive, bool isCompleted)
    ]"#,
);

/// Settings for one EVM chain connection.
#[derive(Debug, Clone)]
pub struct EvmClientConfig {
    /// Label used in log lines ("app-chain", "c-chain")
    pub label: String,
    pub rpc_url: url::Url,
    pub rpc_timeout: Duration,
    pub poll_interval: Duration,
    pub max_block_range: u64,
    pub confirmations: usize,
    pub confirmation_timeout: Duration,
}

impl EvmClientConfig {
    pub fn new(label: impl Into<String>, rpc_url: url::Url) -> Self {
        Self {
            label: label.into(),
            rpc_url,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_block_range: DEFAULT_MAX_BLOCK_RANGE,
            confirmations: DEFAULT_CONFIRMATIONS,
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
        }
    }

    pub fn rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// A zero range is treated as one block per query.
    pub fn max_block_range(mut self, range: u64) -> Self {
        self.max_block_range = range.max(1);
        self
    }

    pub fn confirmations(mut self, confirmations: usize) -> Self {
        self.confirmations = confirmations;
        self
    }
}
