use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use ethers::signers::LocalWallet;
use ethers::types::{Address, U256};
use url::Url;

use crate::utils::RetryPolicy;

const RPC_URL_PLACEHOLDER: &str = "YOUR_BLOCKCHAIN_ID";
const PRIVATE_KEY_PLACEHOLDER: &str = "0x_your_private_key_here";

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing environment variable(s): {}", .0.join(", "))]
    Missing(Vec<&'static str>),

    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Command line / environment surface of the relayer.
#[derive(Debug, Clone, Parser)]
#[command(name = "bounty-relayer", about = "Relays PaymentTriggered from the app chain to BountyManager on the C-chain")]
pub struct RelayerCli {
    /// RPC endpoint of the chain emitting PaymentTriggered.
    #[arg(env = "APP_CHAIN_RPC_URL", long)]
    pub app_chain_rpc_url: Option<String>,

    /// BountyExecutor contract on the app chain.
    #[arg(env = "BOUNTY_EXECUTOR_ADDRESS", long)]
    pub bounty_executor_address: Option<String>,

    /// RPC endpoint of the chain holding the escrow.
    #[arg(env = "C_CHAIN_RPC_URL", long, default_value = "https://api.avax-test.network/ext/bc/C/rpc")]
    pub c_chain_rpc_url: Option<String>,

    /// BountyManager contract on the C-chain.
    #[arg(env = "BOUNTY_MANAGER_ADDRESS", long)]
    pub bounty_manager_address: Option<String>,

    /// Key of the employer account allowed to call forceSettleByEmployer.
    #[arg(env = "PRIVATE_KEY", long, hide_env_values = true)]
    pub private_key: Option<String>,

    /// How many source blocks to re-scan on startup.
    #[arg(env = "RELAYER_LOOKBACK_BLOCKS", long, default_value = "500")]
    pub lookback_blocks: u64,

    #[arg(env = "RELAYER_MAX_ATTEMPTS", long, default_value = "3")]
    pub max_attempts: u32,

    #[arg(env = "RELAYER_RETRY_BACKOFF_SECS", long, default_value = "5")]
    pub retry_backoff_secs: u64,

    /// Gas limit attached to every settlement transaction.
    #[arg(env = "RELAYER_GAS_LIMIT", long, default_value = "200000")]
    pub gas_limit: u64,

    #[arg(env = "RELAYER_POLL_INTERVAL_MS", long, default_value = "2000")]
    pub poll_interval_ms: u64,

    #[arg(env = "RELAYER_RECONNECT_DELAY_SECS", long, default_value = "5")]
    pub reconnect_delay_secs: u64,

    #[arg(env = "RELAYER_MAX_BLOCK_RANGE", long, default_value = "2048")]
    pub max_block_range: u64,

    #[arg(env = "RELAYER_MAX_CONCURRENT_DISPATCHES", long, default_value = "4")]
    pub max_concurrent_dispatches: usize,

    #[arg(env = "RELAYER_CONFIRMATIONS", long, default_value = "1")]
    pub confirmations: usize,

    #[arg(env = "RELAYER_RPC_TIMEOUT_SECS", long, default_value = "30")]
    pub rpc_timeout_secs: u64,

    /// tracing filter directives, e.g. `info,bounty_relayer=debug`.
    #[arg(env = "RELAYER_LOG", long, default_value = "info")]
    pub log: String,
}

#[derive(Debug, Clone)]
pub struct ChainSettings {
    pub rpc_url: Url,
    pub contract: Address,
}

/// Validated relayer configuration. Constructed only through `TryFrom<RelayerCli>`.
#[derive(Debug, Clone)]
pub struct RelayerConfig {
    pub source: ChainSettings,
    pub destination: ChainSettings,
    pub signer: LocalWallet,
    pub lookback_blocks: u64,
    pub retry: RetryPolicy,
    pub gas_limit: U256,
    pub poll_interval: Duration,
    pub reconnect_delay: Duration,
    pub max_block_range: u64,
    pub max_concurrent_dispatches: usize,
    pub confirmations: usize,
    pub rpc_timeout: Duration,
}

impl TryFrom<RelayerCli> for RelayerConfig {
    type Error = ConfigError;

    fn try_from(cli: RelayerCli) -> Result<Self, Self::Error> {
        let mut missing = Vec::new();
        let app_rpc = required(&cli.app_chain_rpc_url, "APP_CHAIN_RPC_URL", &mut missing, |url| {
            url.contains(RPC_URL_PLACEHOLDER)
        });
        let executor = required(&cli.bounty_executor_address, "BOUNTY_EXECUTOR_ADDRESS", &mut missing, |_| false);
        let c_rpc = required(&cli.c_chain_rpc_url, "C_CHAIN_RPC_URL", &mut missing, |_| false);
        let manager = required(&cli.bounty_manager_address, "BOUNTY_MANAGER_ADDRESS", &mut missing, |_| false);
        let key = required(&cli.private_key, "PRIVATE_KEY", &mut missing, |key| key == PRIVATE_KEY_PLACEHOLDER);

        let (Some(app_rpc), Some(executor), Some(c_rpc), Some(manager), Some(key)) =
            (app_rpc, executor, c_rpc, manager, key)
        else {
            return Err(ConfigError::Missing(missing));
        };

        if cli.lookback_blocks == 0 {
            return Err(invalid("RELAYER_LOOKBACK_BLOCKS", "must be greater than zero"));
        }
        if cli.max_attempts == 0 {
            return Err(invalid("RELAYER_MAX_ATTEMPTS", "must be greater than zero"));
        }
        if cli.max_block_range == 0 {
            return Err(invalid("RELAYER_MAX_BLOCK_RANGE", "must be greater than zero"));
        }
        if cli.max_concurrent_dispatches == 0 {
            return Err(invalid("RELAYER_MAX_CONCURRENT_DISPATCHES", "must be greater than zero"));
        }
        if cli.gas_limit == 0 {
            return Err(invalid("RELAYER_GAS_LIMIT", "must be greater than zero"));
        }

        Ok(Self {
            source: ChainSettings {
                rpc_url: parse_rpc_url(app_rpc, "APP_CHAIN_RPC_URL")?,
                contract: parse_address(executor, "BOUNTY_EXECUTOR_ADDRESS")?,
            },
            destination: ChainSettings {
                rpc_url: parse_rpc_url(c_rpc, "C_CHAIN_RPC_URL")?,
                contract: parse_address(manager, "BOUNTY_MANAGER_ADDRESS")?,
            },
            signer: LocalWallet::from_str(key)
                .map_err(|e| invalid("PRIVATE_KEY", format!("not a valid secp256k1 key: {}", e)))?,
            lookback_blocks: cli.lookback_blocks,
            retry: RetryPolicy::new(cli.max_attempts, Duration::from_secs(cli.retry_backoff_secs)),
            gas_limit: U256::from(cli.gas_limit),
            poll_interval: Duration::from_millis(cli.poll_interval_ms.max(1)),
            reconnect_delay: Duration::from_secs(cli.reconnect_delay_secs),
            max_block_range: cli.max_block_range,
            max_concurrent_dispatches: cli.max_concurrent_dispatches,
            confirmations: cli.confirmations,
            rpc_timeout: Duration::from_secs(cli.rpc_timeout_secs.max(1)),
        })
    }
}

/// Empty values and the sample placeholders from `.env.example` count as missing.
fn required<'a>(
    value: &'a Option<String>,
    var: &'static str,
    missing: &mut Vec<&'static str>,
    is_placeholder: impl Fn(&str) -> bool,
) -> Option<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() && !is_placeholder(v) => Some(v),
        _ => {
            missing.push(var);
            None
        }
    }
}

fn invalid(var: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { var, reason: reason.into() }
}

fn parse_rpc_url(raw: &str, var: &'static str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| invalid(var, e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(invalid(var, format!("unsupported scheme '{}', expected http or https", scheme))),
    }
}

fn parse_address(raw: &str, var: &'static str) -> Result<Address, ConfigError> {
    let address = Address::from_str(raw).map_err(|e| invalid(var, e.to_string()))?;
    if address == Address::zero() {
        return Err(invalid(var, "zero address"));
    }
    Ok(address)
}
