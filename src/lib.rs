//! Bounty settlement relayer
//!
//! Watches `PaymentTriggered` on the app chain's BountyExecutor and releases
//! the matching escrow through `forceSettleByEmployer` on the C-chain's
//! BountyManager. Destination state is the only source of truth for whether
//! a bounty still needs settling, so the relayer itself is stateless.

pub mod backfill;
pub mod chainadapter;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod evm;
pub mod logging;
pub mod oracle;
pub mod pool;
pub mod relayer;
pub mod subscriber;
pub mod types;
pub mod utils;

#[cfg(test)]
pub mod testing;

pub use chainadapter::{AdapterError, ChainClient};
pub use config::{ConfigError, RelayerCli, RelayerConfig};
pub use dispatcher::{DispatchOutcome, SettlementDispatcher};
pub use error::RelayerError;
pub use relayer::{RelaySettings, Relayer};
pub use types::*;

pub type Result<T> = std::result::Result<T, RelayerError>;
