use std::sync::Arc;

use ethers::types::Log;
use tracing::{info, warn};

use crate::chainadapter::{AdapterError, ChainClient};
use crate::evm::events::decode_settlement_event;
use crate::logging::Phase;
use crate::types::{LogFilter, SettlementEvent};

/// Events found by one backfill pass, and the head the window ended at.
#[derive(Debug, Clone)]
pub struct BackfillResult {
    pub head: u64,
    pub events: Vec<SettlementEvent>,
}

impl BackfillResult {
    /// First block the live tail has to cover.
    pub fn resume_block(&self) -> u64 {
        self.head + 1
    }
}

/// Re-reads a trailing window of source history on startup.
///
/// The relayer keeps no cursor, so the window `[head - lookback, head]` is the
/// only recovery horizon: events older than that are not replayed.
pub struct BackfillScanner {
    client: Arc<dyn ChainClient>,
    filter: LogFilter,
    max_block_range: u64,
}

impl BackfillScanner {
    pub fn new(client: Arc<dyn ChainClient>, filter: LogFilter, max_block_range: u64) -> Self {
        Self { client, filter, max_block_range: max_block_range.max(1) }
    }

    /// Scans the window and returns every decodable event in it, ordered by
    /// position on chain. Any RPC failure other than an oversized range aborts.
    pub async fn run(&self, lookback_blocks: u64) -> Result<BackfillResult, AdapterError> {
        let head = self.client.get_height().await?;
        let from = head.saturating_sub(lookback_blocks);
        info!(phase = %Phase::Scan, "scanning last {} blocks ({} -> {})", lookback_blocks, from, head);

        let logs = self.collect_logs(from, head).await?;
        let mut events: Vec<SettlementEvent> = logs
            .into_iter()
            .filter_map(|log| match decode_settlement_event(log) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(phase = %Phase::Scan, "skipping undecodable log: {}", e);
                    None
                }
            })
            .collect();
        events.sort_by_key(|event| (event.source_block, event.log_index));

        if events.is_empty() {
            info!(phase = %Phase::Scan, "no past PaymentTriggered events found");
        } else {
            info!(phase = %Phase::Scan, "{} past event(s) found", events.len());
        }
        Ok(BackfillResult { head, events })
    }

    /// Walks `[from, to]` in chunks, halving any chunk the node refuses as too wide.
    async fn collect_logs(&self, from: u64, to: u64) -> Result<Vec<Log>, AdapterError> {
        let mut pending = Vec::new();
        let mut start = from;
        loop {
            let end = to.min(start.saturating_add(self.max_block_range - 1));
            pending.push((start, end));
            if end >= to {
                break;
            }
            start = end + 1;
        }
        pending.reverse();

        let mut logs = Vec::new();
        while let Some((start, end)) = pending.pop() {
            match self.client.query_logs(self.filter, start, end).await {
                Ok(mut chunk) => logs.append(&mut chunk),
                Err(AdapterError::RangeTooLarge { .. }) if end > start => {
                    let mid = start + (end - start) / 2;
                    warn!(phase = %Phase::Scan, "range {}..={} too large, splitting at {}", start, end, mid);
                    pending.push((mid + 1, end));
                    pending.push((start, mid));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(logs)
    }
}
