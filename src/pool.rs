use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatcher::{DispatchOutcome, SettlementDispatcher};
use crate::logging::Phase;
use crate::types::SettlementEvent;

/// Tally of dispatch outcomes, reported at the end of a pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSummary {
    pub settled: usize,
    pub skipped: usize,
    pub failed: usize,
    pub interrupted: usize,
}

impl DispatchSummary {
    fn record(&mut self, outcome: &DispatchOutcome) {
        match outcome {
            DispatchOutcome::Settled { .. } => self.settled += 1,
            DispatchOutcome::Skipped { .. } => self.skipped += 1,
            DispatchOutcome::Exhausted { .. } => self.failed += 1,
            DispatchOutcome::Interrupted { .. } => self.interrupted += 1,
        }
    }

    fn record_joined(&mut self, joined: Result<DispatchOutcome, JoinError>) {
        match joined {
            Ok(outcome) => self.record(&outcome),
            Err(e) => {
                error!(phase = %Phase::Err, "dispatch task failed: {}", e);
                self.failed += 1;
            }
        }
    }

    pub fn total(&self) -> usize {
        self.settled + self.skipped + self.failed + self.interrupted
    }
}

/// Runs settlement dispatches for distinct events concurrently, at most
/// `max_concurrent` at a time. Backfill and live events share one dispatcher.
pub struct DispatchPool {
    dispatcher: Arc<SettlementDispatcher>,
    max_concurrent: usize,
}

impl DispatchPool {
    pub fn new(dispatcher: Arc<SettlementDispatcher>, max_concurrent: usize) -> Self {
        Self { dispatcher, max_concurrent: max_concurrent.max(1) }
    }

    /// Dispatches a batch and waits for every event to reach a final outcome.
    pub async fn dispatch_all(&self, events: Vec<SettlementEvent>) -> DispatchSummary {
        let outcomes: Vec<DispatchOutcome> = futures::stream::iter(events)
            .map(|event| {
                let dispatcher = self.dispatcher.clone();
                async move { dispatcher.handle(&event).await }
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        let mut summary = DispatchSummary::default();
        for outcome in &outcomes {
            summary.record(outcome);
        }
        summary
    }

    /// Dispatches events from `queue` until it closes or `shutdown` fires, then
    /// waits for the dispatches already started. Queued events that were not
    /// started are dropped; the next startup backfill picks them up again.
    pub async fn run(&self, mut queue: mpsc::Receiver<SettlementEvent>, shutdown: CancellationToken) -> DispatchSummary {
        let permits = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();
        let mut summary = DispatchSummary::default();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => summary.record_joined(joined),
                next = queue.recv() => {
                    let Some(event) = next else {
                        debug!("event queue closed");
                        break;
                    };
                    let permit = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        permit = permits.clone().acquire_owned() => permit,
                    };
                    let Ok(permit) = permit else {
                        break;
                    };
                    let dispatcher = self.dispatcher.clone();
                    tasks.spawn(async move {
                        let _permit = permit;
                        dispatcher.handle(&event).await
                    });
                }
            }
        }

        queue.close();
        let dropped = std::iter::from_fn(|| queue.try_recv().ok()).count();
        if dropped > 0 {
            warn!(phase = %Phase::Wait, "{} queued event(s) not dispatched before shutdown", dropped);
        }
        if !tasks.is_empty() {
            info!(phase = %Phase::Wait, "waiting for {} in-flight settlement(s)", tasks.len());
        }
        while let Some(joined) = tasks.join_next().await {
            summary.record_joined(joined);
        }
        summary
    }
}
