use ethers::providers::{JsonRpcError, MiddlewareError, ProviderError, RpcError};

use crate::chainadapter::AdapterError;
use crate::config::ConfigError;
use crate::evm::revert::RevertData;

/// Errors that stop the relayer. Per-event failures never end up here.
#[derive(thiserror::Error, Debug)]
pub enum RelayerError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// A chain could not be reached during startup checks
    #[error("Cannot reach {chain}: {source}")]
    Startup {
        chain: String,
        #[source]
        source: AdapterError,
    },

    /// Startup backfill could not produce a consistent view of recent history
    #[error("Backfill failed: {0}")]
    Backfill(#[source] AdapterError),
}

impl From<ProviderError> for AdapterError {
    fn from(error: ProviderError) -> Self {
        match RpcError::as_error_response(&error) {
            Some(response) => from_json_rpc_error(response),
            None => match error {
                ProviderError::SerdeJson(e) => AdapterError::Decode(e.to_string()),
                ProviderError::HexError(e) => AdapterError::Decode(format!("Hex error: {}", e)),
                ProviderError::EnsError(e) => AdapterError::Configuration(format!("ENS error: {}", e)),
                other => AdapterError::Connectivity(other.to_string()),
            },
        }
    }
}

/// Maps an error returned through a middleware stack (signer, nonce manager)
/// onto the relayer taxonomy.
pub fn from_middleware_error<E: MiddlewareError>(error: E) -> AdapterError {
    if let Some(response) = error.as_error_response() {
        return from_json_rpc_error(response);
    }
    match error.as_provider_error() {
        Some(_) => AdapterError::Connectivity(error.to_string()),
        // Signing failures and other middleware-local errors never reached a node.
        None => AdapterError::Submission { code: None, message: error.to_string() },
    }
}

fn from_json_rpc_error(response: &JsonRpcError) -> AdapterError {
    if let Some(data) = response.as_revert_data() {
        return AdapterError::ContractRevert(RevertData(data));
    }
    AdapterError::Submission { code: Some(response.code), message: response.message.clone() }
}
