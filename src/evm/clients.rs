use async_trait::async_trait;
use ethers::middleware::{NonceManagerMiddleware, SignerMiddleware};
use ethers::providers::{Http, JsonRpcClient, Middleware, PendingTransaction, Provider, ProviderError, RpcError};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, BlockNumber, Bytes, Log, TransactionRequest, TxHash, U256, U64};
use reqwest::Client;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use crate::chainadapter::{AdapterError, ChainClient, LogStream};
use crate::error::from_middleware_error;
use crate::evm::events::{receiver_stream, tail_logs, TailSettings};
use crate::evm::types::{EvmClientConfig, LOG_CHANNEL_CAPACITY, RPC_LIMIT_EXCEEDED};
use crate::types::{ConfirmedTx, LogFilter};

/// Signs locally and hands out nonces from an in-process counter.
type SigningStack<P, S> = NonceManagerMiddleware<SignerMiddleware<Provider<P>, S>>;

/// JSON-RPC client for one EVM chain.
///
/// Read-only until [`EvmChainClient::with_signer`] attaches a signing key.
/// Nonces come from a counter seeded with the account's pending transaction
/// count, so concurrent settlements never share a nonce. Broadcasts are
/// serialized so they reach the node in nonce order.
pub struct EvmChainClient<P = Http, S = LocalWallet> {
    config: EvmClientConfig,
    provider: Provider<P>,
    signer: Option<SigningStack<P, S>>,
    submit_lock: Mutex<()>,
}

impl EvmChainClient<Http, LocalWallet> {
    pub fn new(config: EvmClientConfig) -> Result<Self, AdapterError> {
        let http_client = Client::builder()
            .timeout(config.rpc_timeout)
            .build()
            .map_err(|e| AdapterError::Configuration(format!("Failed to create HTTP client: {}", e)))?;
        let http = Http::new_with_client(config.rpc_url.clone(), http_client);
        Ok(Self::with_provider(config, Provider::new(http)))
    }
}

impl<P: JsonRpcClient + Clone + 'static> EvmChainClient<P, LocalWallet> {
    /// Read-only client over an already built transport.
    pub fn with_provider(config: EvmClientConfig, provider: Provider<P>) -> Self {
        let provider = provider.interval(config.poll_interval);
        Self { config, provider, signer: None, submit_lock: Mutex::new(()) }
    }
}

impl<P, S> EvmChainClient<P, S>
where
    P: JsonRpcClient + Clone + 'static,
    S: Signer + 'static,
{
    /// Binds `signer` to this chain's id and enables submission. The nonce
    /// counter starts at the account's pending transaction count.
    pub async fn with_signer<T: Signer + 'static>(self, signer: T) -> Result<EvmChainClient<P, T>, AdapterError> {
        let chain_id = self.provider.get_chainid().await?;
        let signer = signer.with_chain_id(chain_id.as_u64());
        let address = signer.address();

        let stack = NonceManagerMiddleware::new(SignerMiddleware::new(self.provider.clone(), signer), address);
        let next_nonce = stack
            .initialize_nonce(Some(BlockNumber::Pending.into()))
            .await
            .map_err(from_middleware_error)?;
        info!(
            "{}: signer {:?} bound to chain id {}, next nonce {}",
            self.config.label, address, chain_id, next_nonce
        );

        Ok(EvmChainClient {
            signer: Some(stack),
            config: self.config,
            provider: self.provider,
            submit_lock: Mutex::new(()),
        })
    }

    pub fn label(&self) -> &str {
        &self.config.label
    }

    pub fn signer_address(&self) -> Option<Address> {
        self.signer.as_ref().map(|stack| stack.inner().address())
    }

    fn log_query_error(error: ProviderError, from: u64, to: u64) -> AdapterError {
        match RpcError::as_error_response(&error) {
            Some(response) if response.code == RPC_LIMIT_EXCEEDED => AdapterError::RangeTooLarge { from, to },
            Some(response) => AdapterError::Connectivity(format!("eth_getLogs rejected: {}", response.message)),
            None => AdapterError::from(error),
        }
    }
}

#[async_trait]
impl<P, S> ChainClient for EvmChainClient<P, S>
where
    P: JsonRpcClient + Clone + 'static,
    S: Signer + 'static,
{
    async fn get_height(&self) -> Result<u64, AdapterError> {
        let height = self.provider.get_block_number().await?;
        Ok(height.as_u64())
    }

    async fn query_logs(&self, filter: LogFilter, from: u64, to: u64) -> Result<Vec<Log>, AdapterError> {
        if to < from {
            return Ok(Vec::new());
        }
        if to - from + 1 > self.config.max_block_range {
            return Err(AdapterError::RangeTooLarge { from, to });
        }
        debug!("{}: eth_getLogs {}..={}", self.config.label, from, to);
        self.provider
            .get_logs(&filter.to_filter(from, to))
            .await
            .map_err(|e| Self::log_query_error(e, from, to))
    }

    async fn subscribe_logs(&self, filter: LogFilter, from_block: u64) -> Result<LogStream, AdapterError> {
        let (tx, rx) = mpsc::channel(LOG_CHANNEL_CAPACITY);
        let settings = TailSettings {
            label: self.config.label.clone(),
            poll_interval: self.config.poll_interval,
            max_block_range: self.config.max_block_range,
        };
        debug!("{}: tailing logs from block {}", self.config.label, from_block);
        tokio::spawn(tail_logs(self.provider.clone(), filter, from_block, settings, tx));
        Ok(receiver_stream(rx))
    }

    async fn call_view(&self, contract: Address, calldata: Bytes) -> Result<Bytes, AdapterError> {
        let tx: TypedTransaction = TransactionRequest::new().to(contract).data(calldata).into();
        self.provider
            .call(&tx, None)
            .await
            .map_err(|e| AdapterError::ContractRead(format!("eth_call to {:?} failed: {}", contract, e)))
    }

    async fn send_signed_tx(
        &self,
        contract: Address,
        calldata: Bytes,
        gas_hint: Option<U256>,
    ) -> Result<TxHash, AdapterError> {
        let stack = self.signer.as_ref().ok_or(AdapterError::MissingSigner)?;

        let mut request = TransactionRequest::new().from(stack.inner().address()).to(contract).data(calldata);
        if let Some(gas) = gas_hint {
            request = request.gas(gas);
        }
        let tx: TypedTransaction = request.into();

        // Simulate first so contract reverts come back with their error selector.
        // A failed simulation never takes a nonce.
        stack.call(&tx, None).await.map_err(from_middleware_error)?;

        let _submit_guard = self.submit_lock.lock().await;
        let pending = stack.send_transaction(tx, None).await.map_err(from_middleware_error)?;
        Ok(pending.tx_hash())
    }

    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<ConfirmedTx, AdapterError> {
        let pending = PendingTransaction::new(tx_hash, &self.provider)
            .confirmations(self.config.confirmations)
            .interval(self.config.poll_interval);

        let receipt = tokio::time::timeout(self.config.confirmation_timeout, pending)
            .await
            .map_err(|_| {
                AdapterError::Timeout(format!(
                    "{:?} not confirmed within {}s",
                    tx_hash,
                    self.config.confirmation_timeout.as_secs()
                ))
            })??
            .ok_or_else(|| AdapterError::Submission {
                code: None,
                message: format!("{:?} dropped from mempool", tx_hash),
            })?;

        if receipt.status == Some(U64::zero()) {
            return Err(AdapterError::Reverted { tx_hash });
        }

        Ok(ConfirmedTx {
            tx_hash,
            block_number: receipt.block_number.map(|n| n.as_u64()).unwrap_or_default(),
            gas_used: receipt.gas_used,
        })
    }
}
