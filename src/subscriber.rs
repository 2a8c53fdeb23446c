use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chainadapter::{ChainClient, LogStream};
use crate::evm::events::decode_settlement_event;
use crate::logging::Phase;
use crate::types::{LogFilter, SettlementEvent};
use crate::utils::sleep_or_cancel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Connecting,
    Subscribed,
    Disconnected,
}

/// Forwards `PaymentTriggered` events from the source chain's live tail.
///
/// The tail starts at the block after the backfilled range and, after a
/// disconnect, resumes at the block after the last forwarded log. Events are
/// not deduplicated against the backfill pass; the dispatcher's oracle check
/// handles repeats.
pub struct LiveEventSubscriber {
    client: Arc<dyn ChainClient>,
    filter: LogFilter,
    start_block: u64,
    reconnect_delay: Duration,
}

impl LiveEventSubscriber {
    pub fn new(client: Arc<dyn ChainClient>, filter: LogFilter, start_block: u64, reconnect_delay: Duration) -> Self {
        Self { client, filter, start_block, reconnect_delay }
    }

    /// Runs until `shutdown` fires or the receiving side of `sink` is dropped.
    pub async fn run(&self, sink: mpsc::Sender<SettlementEvent>, shutdown: CancellationToken) {
        let mut state = SubscriptionState::Connecting;
        let mut stream: Option<LogStream> = None;
        let mut next_block = self.start_block;
        loop {
            state = match state {
                SubscriptionState::Connecting => {
                    let subscribed = tokio::select! {
                        _ = shutdown.cancelled() => return,
                        subscribed = self.client.subscribe_logs(self.filter, next_block) => subscribed,
                    };
                    match subscribed {
                        Ok(live) => {
                            info!(
                                phase = %Phase::Listen,
                                "watching PaymentTriggered on {:?} from block {}",
                                self.filter.address,
                                next_block
                            );
                            stream = Some(live);
                            SubscriptionState::Subscribed
                        }
                        Err(e) => {
                            warn!(phase = %Phase::Err, "subscribe failed: {}", e);
                            SubscriptionState::Disconnected
                        }
                    }
                }
                SubscriptionState::Subscribed => match stream.take() {
                    Some(live) => {
                        if !self.forward(live, &mut next_block, &sink, &shutdown).await {
                            return;
                        }
                        SubscriptionState::Disconnected
                    }
                    None => SubscriptionState::Connecting,
                },
                SubscriptionState::Disconnected => {
                    info!(
                        phase = %Phase::Wait,
                        "reconnecting in {}s, resuming from block {}",
                        self.reconnect_delay.as_secs(),
                        next_block
                    );
                    if !sleep_or_cancel(self.reconnect_delay, &shutdown).await {
                        return;
                    }
                    SubscriptionState::Connecting
                }
            };
        }
    }

    /// Drains one subscription into `sink`, moving `next_block` past every
    /// log it sees. Returns false when the subscriber should stop, true when
    /// the stream dropped and a reconnect is due.
    async fn forward(
        &self,
        mut live: LogStream,
        next_block: &mut u64,
        sink: &mpsc::Sender<SettlementEvent>,
        shutdown: &CancellationToken,
    ) -> bool {
        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => return false,
                next = live.next() => next,
            };
            match next {
                Some(Ok(log)) => {
                    if let Some(block) = log.block_number {
                        *next_block = (*next_block).max(block.as_u64() + 1);
                    }
                    match decode_settlement_event(log) {
                        Ok(event) => {
                            info!(phase = %Phase::Listen, "new event {}", event);
                            if sink.send(event).await.is_err() {
                                debug!("dispatch queue closed, stopping subscriber");
                                return false;
                            }
                        }
                        Err(e) => warn!(phase = %Phase::Listen, "skipping undecodable log: {}", e),
                    }
                }
                Some(Err(e)) => {
                    warn!(phase = %Phase::Err, "subscription dropped: {}", e);
                    return true;
                }
                None => {
                    warn!(phase = %Phase::Err, "subscription stream ended");
                    return true;
                }
            }
        }
    }
}
