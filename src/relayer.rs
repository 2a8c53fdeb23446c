use std::sync::Arc;
use std::time::Duration;

use ethers::types::{Address, U256};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::backfill::BackfillScanner;
use crate::chainadapter::{AdapterError, ChainClient};
use crate::config::RelayerConfig;
use crate::dispatcher::SettlementDispatcher;
use crate::error::RelayerError;
use crate::evm::events::payment_triggered_topic;
use crate::evm::{EvmChainClient, EvmClientConfig};
use crate::logging::Phase;
use crate::pool::DispatchPool;
use crate::subscriber::LiveEventSubscriber;
use crate::types::LogFilter;
use crate::utils::RetryPolicy;

/// Live events buffered between the subscriber and the dispatch pool
const EVENT_QUEUE_CAPACITY: usize = 128;

const SOURCE_LABEL: &str = "app-chain";
const DESTINATION_LABEL: &str = "c-chain";

/// Chain-independent knobs of a relayer run.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub executor: Address,
    pub manager: Address,
    pub lookback_blocks: u64,
    pub max_block_range: u64,
    pub retry: RetryPolicy,
    pub gas_limit: U256,
    pub reconnect_delay: Duration,
    pub max_concurrent_dispatches: usize,
}

impl From<&RelayerConfig> for RelaySettings {
    fn from(config: &RelayerConfig) -> Self {
        Self {
            executor: config.source.contract,
            manager: config.destination.contract,
            lookback_blocks: config.lookback_blocks,
            max_block_range: config.max_block_range,
            retry: config.retry,
            gas_limit: config.gas_limit,
            reconnect_delay: config.reconnect_delay,
            max_concurrent_dispatches: config.max_concurrent_dispatches,
        }
    }
}

/// Source-to-destination settlement relay.
pub struct Relayer {
    source: Arc<dyn ChainClient>,
    destination: Arc<dyn ChainClient>,
    settings: RelaySettings,
}

impl Relayer {
    pub fn new(source: Arc<dyn ChainClient>, destination: Arc<dyn ChainClient>, settings: RelaySettings) -> Self {
        Self { source, destination, settings }
    }

    /// Opens both chain connections and checks they answer. Any failure here
    /// is fatal: the relayer never runs half-connected.
    pub async fn connect(config: &RelayerConfig) -> Result<Self, RelayerError> {
        info!(phase = %Phase::Init, "starting settlement relayer");

        let source_config = EvmClientConfig::new(SOURCE_LABEL, config.source.rpc_url.clone())
            .rpc_timeout(config.rpc_timeout)
            .poll_interval(config.poll_interval)
            .max_block_range(config.max_block_range);
        let source = EvmChainClient::new(source_config).map_err(startup(SOURCE_LABEL))?;
        let source_height = source.get_height().await.map_err(startup(SOURCE_LABEL))?;
        info!(
            phase = %Phase::Init,
            "app chain {} at block {}, BountyExecutor {:?}",
            config.source.rpc_url,
            source_height,
            config.source.contract
        );

        let destination_config = EvmClientConfig::new(DESTINATION_LABEL, config.destination.rpc_url.clone())
            .rpc_timeout(config.rpc_timeout)
            .poll_interval(config.poll_interval)
            .confirmations(config.confirmations);
        let destination = EvmChainClient::new(destination_config)
            .map_err(startup(DESTINATION_LABEL))?
            .with_signer(config.signer.clone())
            .await
            .map_err(startup(DESTINATION_LABEL))?;
        let destination_height = destination.get_height().await.map_err(startup(DESTINATION_LABEL))?;
        info!(
            phase = %Phase::Init,
            "c-chain {} at block {}, BountyManager {:?}",
            config.destination.rpc_url,
            destination_height,
            config.destination.contract
        );
        if let Some(relayer) = destination.signer_address() {
            info!(phase = %Phase::Init, "relayer account {:?}", relayer);
        }

        Ok(Self::new(Arc::new(source), Arc::new(destination), RelaySettings::from(config)))
    }

    /// Backfills the lookback window, then follows the source chain until
    /// `shutdown` fires. Returns once in-flight settlements have finished.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), RelayerError> {
        let settings = &self.settings;
        let filter = LogFilter::new(settings.executor, payment_triggered_topic());
        let dispatcher = SettlementDispatcher::new(
            self.destination.clone(),
            settings.manager,
            settings.gas_limit,
            settings.retry,
            shutdown.clone(),
        );
        let pool = DispatchPool::new(Arc::new(dispatcher), settings.max_concurrent_dispatches);

        let scanner = BackfillScanner::new(self.source.clone(), filter, settings.max_block_range);
        let backfill = scanner.run(settings.lookback_blocks).await.map_err(RelayerError::Backfill)?;
        let resume_block = backfill.resume_block();
        let summary = pool.dispatch_all(backfill.events).await;
        info!(
            phase = %Phase::Scan,
            "backfill complete: {} settled, {} skipped, {} failed, {} interrupted",
            summary.settled,
            summary.skipped,
            summary.failed,
            summary.interrupted
        );
        if shutdown.is_cancelled() {
            return Ok(());
        }

        // Blocks mined while the backfill was dispatching are picked up here.
        let (queue_tx, queue_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let subscriber = LiveEventSubscriber::new(self.source.clone(), filter, resume_block, settings.reconnect_delay);
        let ((), summary) = tokio::join!(subscriber.run(queue_tx, shutdown.clone()), pool.run(queue_rx, shutdown));
        info!(
            "relayer stopped: {} settled, {} skipped, {} failed live",
            summary.settled,
            summary.skipped,
            summary.failed
        );
        Ok(())
    }
}

fn startup(chain: &'static str) -> impl Fn(AdapterError) -> RelayerError {
    move |source| RelayerError::Startup { chain: chain.to_string(), source }
}
