//! In-memory chains used by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ethers::abi::{AbiDecode, AbiEncode};
use ethers::providers::{JsonRpcClient, JsonRpcError, MockError};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Log, TxHash, H256, U256, U64};
use ethers::utils::rlp::Rlp;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use crate::chainadapter::{AdapterError, ChainClient, LogStream};
use crate::evm::events::payment_triggered_topic;
use crate::evm::revert::TerminalRevert;
use crate::evm::types::{BountiesCall, BountiesReturn, ForceSettleByEmployerCall};
use crate::types::{ConfirmedTx, LogFilter};

pub const MANAGER: Address = Address::repeat_byte(0xa2);
pub const EXECUTOR: Address = Address::repeat_byte(0xe1);

/// A `PaymentTriggered` log as BountyExecutor would emit it.
pub fn payment_log(id: u64, beneficiary: Address, block: u64) -> Log {
    Log {
        address: EXECUTOR,
        topics: vec![payment_triggered_topic(), H256::from_low_u64_be(id), H256::from(beneficiary)],
        block_number: Some(U64::from(block)),
        transaction_hash: Some(H256::from_low_u64_be(0x1000 + id)),
        log_index: Some(U256::zero()),
        ..Default::default()
    }
}

pub fn executor_filter() -> LogFilter {
    LogFilter::new(EXECUTOR, payment_triggered_topic())
}

#[derive(Debug, Clone, Copy, Default)]
struct Bounty {
    completed: bool,
    active: bool,
}

/// BountyManager on a fake destination chain.
///
/// Accepted settlements flip the bounty to completed; settling a completed or
/// inactive bounty reverts with the matching custom error, like the contract.
#[derive(Default)]
pub struct FakeDestination {
    bounties: Mutex<HashMap<U256, Bounty>>,
    send_failures: Mutex<VecDeque<AdapterError>>,
    submitted: Mutex<Vec<(U256, Address, Option<U256>)>>,
    confirmed: Mutex<Vec<(U256, Address)>>,
    view_calls: AtomicUsize,
    fail_reads: AtomicBool,
    complete_before_send: AtomicBool,
    next_tx: AtomicU64,
    pending: Mutex<HashMap<TxHash, (U256, Address)>>,
}

impl FakeDestination {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_record(&self, id: u64, completed: bool, active: bool) {
        self.bounties.lock().unwrap().insert(U256::from(id), Bounty { completed, active });
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Next submissions fail with these errors, in order.
    pub fn push_send_failure(&self, error: AdapterError) {
        self.send_failures.lock().unwrap().push_back(error);
    }

    /// Another actor completes the bounty right before our transaction lands.
    pub fn complete_before_send(&self, enabled: bool) {
        self.complete_before_send.store(enabled, Ordering::SeqCst);
    }

    pub fn view_calls(&self) -> usize {
        self.view_calls.load(Ordering::SeqCst)
    }

    /// Every settlement call that reached the node, accepted or not.
    pub fn submitted(&self) -> Vec<(U256, Address, Option<U256>)> {
        self.submitted.lock().unwrap().clone()
    }

    /// Settlements that were mined successfully.
    pub fn confirmed(&self) -> Vec<(U256, Address)> {
        self.confirmed.lock().unwrap().clone()
    }

    pub fn is_completed(&self, id: u64) -> bool {
        self.bounties.lock().unwrap().get(&U256::from(id)).map(|b| b.completed).unwrap_or(false)
    }
}

#[async_trait]
impl ChainClient for FakeDestination {
    async fn get_height(&self) -> Result<u64, AdapterError> {
        Ok(1_000)
    }

    async fn query_logs(&self, _filter: LogFilter, _from: u64, _to: u64) -> Result<Vec<Log>, AdapterError> {
        Ok(Vec::new())
    }

    async fn subscribe_logs(&self, _filter: LogFilter, _from_block: u64) -> Result<LogStream, AdapterError> {
        Ok(futures::stream::pending().boxed())
    }

    async fn call_view(&self, contract: Address, calldata: Bytes) -> Result<Bytes, AdapterError> {
        self.view_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(AdapterError::ContractRead("connection reset".into()));
        }
        assert_eq!(contract, MANAGER);
        let call = BountiesCall::decode(calldata.as_ref()).map_err(|e| AdapterError::Decode(e.to_string()))?;
        let bounty = self.bounties.lock().unwrap().get(&call.bounty_id).copied();
        let ret = match bounty {
            Some(b) => BountiesReturn {
                bounty_id: call.bounty_id,
                employer: Address::repeat_byte(0x11),
                budget: U256::exp10(18),
                ipfs_doc_hash: "ipfs://doc".to_string(),
                is_active: b.active,
                is_completed: b.completed,
            },
            None => BountiesReturn::default(),
        };
        // lets concurrent dispatches observe the same state before either sends
        tokio::task::yield_now().await;
        Ok(ret.encode().into())
    }

    async fn send_signed_tx(
        &self,
        contract: Address,
        calldata: Bytes,
        gas_hint: Option<U256>,
    ) -> Result<TxHash, AdapterError> {
        assert_eq!(contract, MANAGER);
        let call =
            ForceSettleByEmployerCall::decode(calldata.as_ref()).map_err(|e| AdapterError::Decode(e.to_string()))?;
        self.submitted.lock().unwrap().push((call.bounty_id, call.developer, gas_hint));

        if let Some(error) = self.send_failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        let mut bounties = self.bounties.lock().unwrap();
        let bounty = bounties.entry(call.bounty_id).or_default();
        if self.complete_before_send.load(Ordering::SeqCst) {
            bounty.completed = true;
            bounty.active = false;
        }
        if bounty.completed {
            return Err(AdapterError::ContractRevert(TerminalRevert::BountyAlreadyCompleted.revert_data()));
        }
        if !bounty.active {
            return Err(AdapterError::ContractRevert(TerminalRevert::BountyNotActive.revert_data()));
        }
        bounty.completed = true;
        bounty.active = false;

        let tx_hash = H256::from_low_u64_be(self.next_tx.fetch_add(1, Ordering::SeqCst) + 1);
        self.pending.lock().unwrap().insert(tx_hash, (call.bounty_id, call.developer));
        Ok(tx_hash)
    }

    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<ConfirmedTx, AdapterError> {
        let settled = self
            .pending
            .lock()
            .unwrap()
            .remove(&tx_hash)
            .ok_or_else(|| AdapterError::Submission { code: None, message: "unknown tx".into() })?;
        self.confirmed.lock().unwrap().push(settled);
        Ok(ConfirmedTx { tx_hash, block_number: 77, gas_used: Some(U256::from(51_000)) })
    }
}

type Session = Result<Vec<Result<Log, AdapterError>>, AdapterError>;

/// BountyExecutor on a fake source chain.
#[derive(Default)]
pub struct FakeSource {
    height: AtomicU64,
    logs: Mutex<Vec<Log>>,
    max_range: Mutex<Option<u64>>,
    queries: Mutex<Vec<(u64, u64)>>,
    fail_height: AtomicBool,
    fail_logs: AtomicBool,
    sessions: Mutex<VecDeque<Session>>,
    subscribed_from: Mutex<Vec<u64>>,
}

impl FakeSource {
    pub fn new(height: u64) -> Self {
        let source = Self::default();
        source.height.store(height, Ordering::SeqCst);
        source
    }

    /// Emits a log. Without scripted sessions, the live tail replays every
    /// pushed log at or after the block it was subscribed from.
    pub fn push_log(&self, log: Log) {
        self.logs.lock().unwrap().push(log);
    }

    /// Ranges wider than this are answered with `RangeTooLarge`.
    pub fn limit_range(&self, max: u64) {
        *self.max_range.lock().unwrap() = Some(max);
    }

    pub fn fail_height(&self, fail: bool) {
        self.fail_height.store(fail, Ordering::SeqCst);
    }

    pub fn fail_logs(&self, fail: bool) {
        self.fail_logs.store(fail, Ordering::SeqCst);
    }

    pub fn queries(&self) -> Vec<(u64, u64)> {
        self.queries.lock().unwrap().clone()
    }

    /// Scripts the next `subscribe_logs` call. The stream ends after `items`.
    pub fn push_session(&self, items: Vec<Result<Log, AdapterError>>) {
        self.sessions.lock().unwrap().push_back(Ok(items));
    }

    pub fn push_subscribe_failure(&self, error: AdapterError) {
        self.sessions.lock().unwrap().push_back(Err(error));
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribed_from.lock().unwrap().len()
    }

    /// Start block of every `subscribe_logs` call.
    pub fn subscribed_from(&self) -> Vec<u64> {
        self.subscribed_from.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainClient for FakeSource {
    async fn get_height(&self) -> Result<u64, AdapterError> {
        if self.fail_height.load(Ordering::SeqCst) {
            return Err(AdapterError::Connectivity("connection refused".into()));
        }
        Ok(self.height.load(Ordering::SeqCst))
    }

    async fn query_logs(&self, filter: LogFilter, from: u64, to: u64) -> Result<Vec<Log>, AdapterError> {
        self.queries.lock().unwrap().push((from, to));
        if self.fail_logs.load(Ordering::SeqCst) {
            return Err(AdapterError::Connectivity("connection reset".into()));
        }
        if let Some(max) = *self.max_range.lock().unwrap() {
            if to - from + 1 > max {
                return Err(AdapterError::RangeTooLarge { from, to });
            }
        }
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| log.address == filter.address && log.topics.first() == Some(&filter.signature))
            .filter(|log| {
                let block = log.block_number.map(|n| n.as_u64()).unwrap_or_default();
                block >= from && block <= to
            })
            .cloned()
            .collect())
    }

    async fn subscribe_logs(&self, _filter: LogFilter, from_block: u64) -> Result<LogStream, AdapterError> {
        self.subscribed_from.lock().unwrap().push(from_block);
        match self.sessions.lock().unwrap().pop_front() {
            Some(Ok(items)) => Ok(futures::stream::iter(items).boxed()),
            Some(Err(error)) => Err(error),
            None => {
                let mut tail: Vec<Log> = self
                    .logs
                    .lock()
                    .unwrap()
                    .iter()
                    .filter(|log| log.block_number.map(|n| n.as_u64()).unwrap_or_default() >= from_block)
                    .cloned()
                    .collect();
                tail.sort_by_key(|log| log.block_number);
                let replay = futures::stream::iter(tail.into_iter().map(Ok));
                Ok(replay.chain(futures::stream::pending()).boxed())
            }
        }
    }

    async fn call_view(&self, _contract: Address, _calldata: Bytes) -> Result<Bytes, AdapterError> {
        Err(AdapterError::ContractRead("no contracts on the fake source".into()))
    }

    async fn send_signed_tx(
        &self,
        _contract: Address,
        _calldata: Bytes,
        _gas_hint: Option<U256>,
    ) -> Result<TxHash, AdapterError> {
        Err(AdapterError::MissingSigner)
    }

    async fn wait_for_receipt(&self, _tx_hash: TxHash) -> Result<ConfirmedTx, AdapterError> {
        Err(AdapterError::MissingSigner)
    }
}

/// Chain id answered by [`ScriptedRpc`] (Avalanche Fuji).
pub const SCRIPTED_CHAIN_ID: u64 = 43_113;

#[derive(Debug, Default)]
struct RpcScript {
    head: u64,
    account_nonce: u64,
    sent: u64,
    call_revert: Option<Bytes>,
    requests: Vec<(String, Value)>,
}

/// JSON-RPC transport answering from a script, so `EvmChainClient` can be
/// driven without a node. Every request is recorded with its params.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRpc {
    script: Arc<Mutex<RpcScript>>,
}

impl ScriptedRpc {
    /// A chain at block `head` where the relayer account has sent
    /// `account_nonce` transactions.
    pub fn new(head: u64, account_nonce: u64) -> Self {
        let rpc = Self::default();
        {
            let mut script = rpc.script.lock().unwrap();
            script.head = head;
            script.account_nonce = account_nonce;
        }
        rpc
    }

    pub fn set_head(&self, head: u64) {
        self.script.lock().unwrap().head = head;
    }

    /// Makes every `eth_call` revert with `data`, or succeed again on `None`.
    pub fn revert_calls(&self, data: Option<Bytes>) {
        self.script.lock().unwrap().call_revert = data;
    }

    /// Params of every `method` request, oldest first.
    pub fn requests(&self, method: &str) -> Vec<Value> {
        self.script
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, params)| params.clone())
            .collect()
    }

    /// `(fromBlock, toBlock)` of every `eth_getLogs`, as block numbers.
    pub fn log_ranges(&self) -> Vec<(u64, u64)> {
        self.requests("eth_getLogs")
            .iter()
            .map(|params| {
                let block = |key: &str| serde_json::from_value::<U64>(params[0][key].clone()).unwrap().as_u64();
                (block("fromBlock"), block("toBlock"))
            })
            .collect()
    }

    /// Nonces of the signed transactions that were broadcast, in broadcast order.
    pub fn broadcast_nonces(&self) -> Vec<U256> {
        self.requests("eth_sendRawTransaction")
            .into_iter()
            .map(|params| {
                let raw: Bytes = serde_json::from_value(params[0].clone()).unwrap();
                let (tx, _signature) = TypedTransaction::decode_signed(&Rlp::new(raw.as_ref())).unwrap();
                *tx.nonce().unwrap()
            })
            .collect()
    }
}

#[async_trait]
impl JsonRpcClient for ScriptedRpc {
    type Error = MockError;

    async fn request<T, R>(&self, method: &str, params: T) -> Result<R, MockError>
    where
        T: Debug + Serialize + Send + Sync,
        R: DeserializeOwned + Send,
    {
        let params = serde_json::to_value(&params)?;
        let response = {
            let mut script = self.script.lock().unwrap();
            script.requests.push((method.to_string(), params));
            match method {
                "eth_chainId" => json!(U64::from(SCRIPTED_CHAIN_ID)),
                "eth_blockNumber" => json!(U64::from(script.head)),
                "eth_getTransactionCount" => json!(U256::from(script.account_nonce)),
                "eth_call" => match &script.call_revert {
                    Some(data) => {
                        return Err(MockError::JsonRpcError(JsonRpcError {
                            code: 3,
                            message: "execution reverted".to_string(),
                            data: Some(json!(data)),
                        }))
                    }
                    None => json!(Bytes::new()),
                },
                "eth_gasPrice" => json!(U256::from(25_000_000_000u64)),
                "eth_estimateGas" => json!(U256::from(90_000)),
                "eth_getLogs" => json!(Vec::<Log>::new()),
                "eth_sendRawTransaction" => {
                    script.sent += 1;
                    json!(H256::from_low_u64_be(script.sent))
                }
                _ => return Err(MockError::EmptyResponses),
            }
        };
        // a real node answers asynchronously, so concurrent callers interleave here
        tokio::task::yield_now().await;
        Ok(serde_json::from_value(response)?)
    }
}
