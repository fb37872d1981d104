//! Deferred reconciliation of denied admission buckets against the ledger.

use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use railseat_core::{KvCache, TicketResult};
use railseat_shared::{SeatClass, Segment, Train};

use crate::ledger::RemainingTicketLedger;

/// One denial waiting for its grace period to pass.
#[derive(Debug, Clone)]
pub struct ReconcileTask {
    pub train: Train,
    pub segment: Segment,
    /// Classes the bucket could not cover and how many seats were asked for.
    pub short: Vec<(SeatClass, u32)>,
    pub bucket_key: String,
    pub marker_key: String,
}

/// Handle to the single background task that runs every reconciliation.
#[derive(Clone)]
pub struct ReconcileScheduler {
    tx: mpsc::UnboundedSender<ReconcileTask>,
}

impl ReconcileScheduler {
    /// Starts the background task. It stops once every handle is dropped and
    /// the queued work has drained.
    pub fn spawn(ledger: Arc<RemainingTicketLedger>, cache: Arc<dyn KvCache>, grace: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx, ledger, cache, grace));
        Self { tx }
    }

    pub fn schedule(&self, task: ReconcileTask) {
        let train_id = task.train.id.clone();
        if self.tx.send(task).is_err() {
            error!(train_id, "Reconcile scheduler has stopped, dropping task");
        }
    }
}

async fn after_grace(task: ReconcileTask, grace: Duration) -> ReconcileTask {
    tokio::time::sleep(grace).await;
    task
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<ReconcileTask>,
    ledger: Arc<RemainingTicketLedger>,
    cache: Arc<dyn KvCache>,
    grace: Duration,
) {
    let mut pending = FuturesUnordered::new();
    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(task) => pending.push(after_grace(task, grace)),
                None => break,
            },
            Some(task) = pending.next(), if !pending.is_empty() => {
                finish(&ledger, cache.as_ref(), task).await;
            }
        }
    }
    while let Some(task) = pending.next().await {
        finish(&ledger, cache.as_ref(), task).await;
    }
    debug!("Reconcile scheduler stopped");
}

async fn finish(ledger: &RemainingTicketLedger, cache: &dyn KvCache, task: ReconcileTask) {
    if let Err(e) = reconcile(ledger, cache, &task).await {
        error!(train_id = %task.train.id, segment = %task.segment, error = %e, "Bucket reconciliation failed");
    }
    // The marker goes regardless so the next denial can schedule again.
    if let Err(e) = cache.del(&task.marker_key).await {
        error!(key = %task.marker_key, error = %e, "Failed to clear reconcile marker");
    }
}

/// Drops the bucket when the ledger can now cover any short class, so the
/// next purchase rebuilds it from the ledger.
pub async fn reconcile(
    ledger: &RemainingTicketLedger,
    cache: &dyn KvCache,
    task: &ReconcileTask,
) -> TicketResult<bool> {
    let remaining = ledger.remaining(&task.train, &task.segment).await?;
    let recoverable = task
        .short
        .iter()
        .any(|(class, wanted)| remaining.get(class).copied().unwrap_or(0) >= *wanted);
    if recoverable {
        cache.del(&task.bucket_key).await?;
        info!(train_id = %task.train.id, segment = %task.segment, "Admission bucket refilled from ledger");
    } else {
        debug!(train_id = %task.train.id, segment = %task.segment, "Ledger confirms shortfall, bucket kept");
    }
    Ok(recoverable)
}
