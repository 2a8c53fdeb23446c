pub mod clients;
pub mod events;
pub mod revert;
pub mod types;

pub use clients::EvmChainClient;
pub use revert::{RevertData, TerminalRevert};
pub use types::EvmClientConfig;
