use std::time::Duration;

use ethers::contract::{parse_log, EthEvent};
use ethers::providers::{JsonRpcClient, Middleware, Provider};
use ethers::types::Log;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::chainadapter::{AdapterError, LogStream};
use crate::evm::types::PaymentTriggeredFilter;
use crate::types::{LogFilter, SettlementEvent};

/// Topic-0 of `PaymentTriggered(uint256,address)`.
pub fn payment_triggered_topic() -> ethers::types::H256 {
    PaymentTriggeredFilter::signature()
}

/// Decodes a `PaymentTriggered` log into the event the dispatcher consumes.
pub fn decode_settlement_event(log: Log) -> Result<SettlementEvent, AdapterError> {
    let source_tx = log.transaction_hash;
    let source_block = log.block_number.map(|n| n.as_u64());
    let log_index = log.log_index;

    let decoded: PaymentTriggeredFilter =
        parse_log(log).map_err(|e| AdapterError::Decode(format!("PaymentTriggered: {}", e)))?;

    Ok(SettlementEvent {
        id: decoded.bounty_id,
        beneficiary: decoded.developer,
        source_tx,
        source_block,
        log_index,
    })
}

pub(crate) struct TailSettings {
    pub label: String,
    pub poll_interval: Duration,
    pub max_block_range: u64,
}

/// Polls the head and forwards logs from `next_block` onwards, one block
/// range at a time and in block order. The first RPC failure is forwarded as
/// an error and ends the tail, dropping `sink`.
pub(crate) async fn tail_logs<P: JsonRpcClient>(
    provider: Provider<P>,
    filter: LogFilter,
    mut next_block: u64,
    settings: TailSettings,
    sink: mpsc::Sender<Result<Log, AdapterError>>,
) {
    let span = settings.max_block_range.max(1);
    let mut ticker = tokio::time::interval(settings.poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if sink.is_closed() {
            debug!("{}: log consumer gone, stopping tail", settings.label);
            return;
        }

        let head = match provider.get_block_number().await {
            Ok(head) => head.as_u64(),
            Err(e) => {
                warn!("{}: head poll failed: {}", settings.label, e);
                let _ = sink.send(Err(AdapterError::from(e))).await;
                return;
            }
        };

        while next_block <= head {
            let to = head.min(next_block.saturating_add(span - 1));
            let logs = match provider.get_logs(&filter.to_filter(next_block, to)).await {
                Ok(logs) => logs,
                Err(e) => {
                    warn!("{}: eth_getLogs {}..={} failed: {}", settings.label, next_block, to, e);
                    let _ = sink.send(Err(AdapterError::from(e))).await;
                    return;
                }
            };
            for log in logs {
                if sink.send(Ok(log)).await.is_err() {
                    return;
                }
            }
            next_block = to + 1;
        }
    }
}

pub(crate) fn receiver_stream(rx: mpsc::Receiver<Result<Log, AdapterError>>) -> LogStream {
    futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{executor_filter, payment_log, ScriptedRpc};
    use ethers::types::{Address, H256, U256};

    #[test]
    fn test_decode_payment_triggered() {
        let beneficiary = Address::from_low_u64_be(0xabc);
        let event = decode_settlement_event(payment_log(42, beneficiary, 17)).unwrap();
        assert_eq!(event.id, U256::from(42));
        assert_eq!(event.beneficiary, beneficiary);
        assert_eq!(event.source_block, Some(17));
        assert_eq!(event.source_tx, Some(H256::from_low_u64_be(0x1000 + 42)));
    }

    #[test]
    fn test_decode_rejects_foreign_event() {
        let mut log = payment_log(1, Address::from_low_u64_be(2), 3);
        log.topics[0] = H256::from_low_u64_be(99);
        assert!(matches!(decode_settlement_event(log), Err(AdapterError::Decode(_))));
    }

    #[test]
    fn test_decode_rejects_missing_topic() {
        let mut log = payment_log(1, Address::from_low_u64_be(2), 3);
        log.topics.truncate(2);
        assert!(decode_settlement_event(log).is_err());
    }

    #[tokio::test]
    async fn test_receiver_stream_ends_when_sender_drops() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok(payment_log(1, Address::from_low_u64_be(2), 3))).await.unwrap();
        tx.send(Err(AdapterError::Connectivity("reset".into()))).await.unwrap();
        drop(tx);

        let items: Vec<_> = receiver_stream(rx).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(AdapterError::Connectivity(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tail_with_zero_range_queries_single_blocks() {
        let rpc = ScriptedRpc::new(12, 0);
        let (tx, _rx) = mpsc::channel(4);
        let settings = TailSettings { label: "test-chain".into(), poll_interval: Duration::from_secs(1), max_block_range: 0 };
        tokio::spawn(tail_logs(Provider::new(rpc.clone()), executor_filter(), 10, settings, tx));
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(rpc.log_ranges(), vec![(10, 10), (11, 11), (12, 12)]);
    }
}
