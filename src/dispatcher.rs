use std::fmt;
use std::sync::Arc;

use ethers::abi::AbiEncode;
use ethers::types::{Address, U256};
use ethers::utils::format_ether;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::chainadapter::{AdapterError, ChainClient};
use crate::evm::revert::TerminalRevert;
use crate::evm::types::ForceSettleByEmployerCall;
use crate::logging::Phase;
use crate::oracle::IdempotencyOracle;
use crate::types::{ConfirmedTx, SettlementDecision, SettlementEvent};
use crate::utils::{retry_classified, Attempt, RetryPolicy, RetryResult};

/// Gas limit sent with every settlement unless configured otherwise.
pub const DEFAULT_GAS_LIMIT: u64 = 200_000;

/// Why an event was dropped without a settlement of ours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadySettled,
    NoLongerEligible,
    /// The destination contract refused the call with a terminal custom error.
    Rejected(TerminalRevert),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AlreadySettled => f.write_str("already completed on destination"),
            SkipReason::NoLongerEligible => f.write_str("no longer active on destination"),
            SkipReason::Rejected(revert) => write!(f, "destination rejected settlement with {}", revert),
        }
    }
}

/// Classification of a single dispatch attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    Confirmed(ConfirmedTx),
    Terminal(SkipReason),
    Transient(AdapterError),
}

/// Final result of handling one event.
#[derive(Debug)]
pub enum DispatchOutcome {
    Settled { tx: ConfirmedTx, attempts: u32 },
    Skipped { reason: SkipReason, attempts: u32 },
    Exhausted { attempts: u32, last_error: AdapterError },
    /// Shutdown arrived before the next attempt started. `attempts` is 0 when
    /// the event was never tried.
    Interrupted { attempts: u32 },
}

/// Maps a submission or confirmation failure onto the retry taxonomy. Only a
/// revert carrying one of the contract's terminal selectors ends the retries.
pub fn classify(error: AdapterError) -> AttemptOutcome {
    match &error {
        AdapterError::ContractRevert(data) => match data.terminal() {
            Some(revert) => AttemptOutcome::Terminal(SkipReason::Rejected(revert)),
            None => AttemptOutcome::Transient(error),
        },
        _ => AttemptOutcome::Transient(error),
    }
}

/// Turns settlement events into `forceSettleByEmployer` transactions on the
/// destination chain.
///
/// Every attempt starts with a fresh oracle read, so handling the same event
/// twice (backfill plus live, or an operator re-run) settles it at most once.
/// Errors never leave [`SettlementDispatcher::handle`].
pub struct SettlementDispatcher {
    destination: Arc<dyn ChainClient>,
    oracle: IdempotencyOracle,
    manager: Address,
    gas_limit: U256,
    retry: RetryPolicy,
    shutdown: CancellationToken,
}

impl SettlementDispatcher {
    pub fn new(
        destination: Arc<dyn ChainClient>,
        manager: Address,
        gas_limit: U256,
        retry: RetryPolicy,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            oracle: IdempotencyOracle::new(destination.clone(), manager),
            destination,
            manager,
            gas_limit,
            retry,
            shutdown,
        }
    }

    pub async fn handle(&self, event: &SettlementEvent) -> DispatchOutcome {
        let result = retry_classified(self.retry, event.id, &self.shutdown, |attempt| async move {
            match self.attempt(event, attempt).await {
                AttemptOutcome::Confirmed(tx) => Attempt::Done(Ok(tx)),
                AttemptOutcome::Terminal(reason) => Attempt::Done(Err(reason)),
                AttemptOutcome::Transient(e) => {
                    warn!(phase = %Phase::Err, "{} attempt {} failed: {}", event, attempt, e);
                    Attempt::Retry(e)
                }
            }
        })
        .await;

        match result {
            RetryResult::Done { value: Ok(tx), attempts } => {
                info!(
                    phase = %Phase::Ok,
                    "{} settled in tx {:?} (block {})",
                    event,
                    tx.tx_hash,
                    tx.block_number
                );
                DispatchOutcome::Settled { tx, attempts }
            }
            RetryResult::Done { value: Err(reason), attempts } => {
                info!(phase = %Phase::Skip, "{}: {}", event, reason);
                DispatchOutcome::Skipped { reason, attempts }
            }
            RetryResult::Exhausted { last_error, attempts } => {
                error!(
                    phase = %Phase::Err,
                    "{} not settled after {} attempts: {}; re-run the relayer to retry",
                    event,
                    attempts,
                    last_error
                );
                DispatchOutcome::Exhausted { attempts, last_error }
            }
            RetryResult::Cancelled { attempts: 0, .. } => {
                debug!("{} not started: shutting down", event);
                DispatchOutcome::Interrupted { attempts: 0 }
            }
            RetryResult::Cancelled { attempts, .. } => {
                warn!(phase = %Phase::Err, "{} abandoned after {} attempts: shutting down", event, attempts);
                DispatchOutcome::Interrupted { attempts }
            }
        }
    }

    async fn attempt(&self, event: &SettlementEvent, attempt: u32) -> AttemptOutcome {
        let record = match self.oracle.should_settle(event.id).await {
            Ok((SettlementDecision::Proceed, record)) => record,
            Ok((SettlementDecision::AlreadySettled, _)) => return AttemptOutcome::Terminal(SkipReason::AlreadySettled),
            Ok((SettlementDecision::NoLongerEligible, _)) => {
                return AttemptOutcome::Terminal(SkipReason::NoLongerEligible)
            }
            Err(e) => return AttemptOutcome::Transient(e),
        };

        info!(
            phase = %Phase::Tx,
            "settling {} budget={} AVAX (attempt {}/{})",
            event,
            format_ether(record.budget),
            attempt,
            self.retry.max_attempts
        );
        let calldata = ForceSettleByEmployerCall { bounty_id: event.id, developer: event.beneficiary }.encode();
        let tx_hash = match self.destination.send_signed_tx(self.manager, calldata.into(), Some(self.gas_limit)).await {
            Ok(tx_hash) => tx_hash,
            Err(e) => return classify(e),
        };
        info!(phase = %Phase::Tx, "{} sent as {:?}, waiting for confirmation", event, tx_hash);

        match self.destination.wait_for_receipt(tx_hash).await {
            Ok(tx) => AttemptOutcome::Confirmed(tx),
            Err(e) => classify(e),
        }
    }
}
