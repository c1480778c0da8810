//! Batched result persistence.
//!
//! Outcomes accumulate into a fixed-size buffer; a full buffer is handed to
//! a writer task holding one of [`MAX_WRITERS`] semaphore permits. A failed
//! save is logged and dropped: the scanner re-measures every range on its
//! next pass, so an in-memory retry queue would buy nothing.

use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::metrics::ScanMetrics;
use crate::prober::Outcome;
use crate::store::ResultStore;

/// Outcomes per batch: 2¹⁵ − 1, the most rows the upsert can carry without
/// blowing the wire protocol's parameter limit (two binds per row).
pub const BATCH_SIZE: usize = (1 << 15) - 1;

/// Upper bound on concurrent `save` statements.
pub const MAX_WRITERS: usize = 20;

/// Accumulate outcomes and persist full batches until cancelled; on
/// cancellation the partial buffer is flushed through the same save path
/// before returning. In-flight writers are always allowed to finish.
pub async fn run_batcher(
    mut result_rx: mpsc::Receiver<Outcome>,
    store: Arc<dyn ResultStore>,
    metrics: Arc<ScanMetrics>,
    shutdown: CancellationToken,
) {
    let writer_slots = Arc::new(Semaphore::new(MAX_WRITERS));
    let mut writers: JoinSet<()> = JoinSet::new();
    let mut buffer: Vec<Outcome> = Vec::with_capacity(BATCH_SIZE);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,

            outcome = result_rx.recv() => {
                let Some(outcome) = outcome else { break };
                buffer.push(outcome);
                if buffer.len() == BATCH_SIZE {
                    let full = std::mem::replace(&mut buffer, Vec::with_capacity(BATCH_SIZE));
                    // Blocks while all writer slots are busy; that wait is
                    // what bounds concurrent saves.
                    let Ok(slot) = writer_slots.clone().acquire_owned().await else {
                        break;
                    };
                    let store = store.clone();
                    let metrics = metrics.clone();
                    writers.spawn(async move {
                        save_batch(store.as_ref(), &full, &metrics).await;
                        drop(slot);
                    });
                }
            }

            Some(_) = writers.join_next(), if !writers.is_empty() => {}
        }
    }

    // Terminal flush: whatever is buffered goes out synchronously through
    // the same save path.
    if !buffer.is_empty() {
        if let Ok(slot) = writer_slots.clone().acquire_owned().await {
            save_batch(store.as_ref(), &buffer, &metrics).await;
            drop(slot);
        }
    }

    while writers.join_next().await.is_some() {}
}

async fn save_batch(store: &dyn ResultStore, batch: &[Outcome], metrics: &ScanMetrics) {
    match store.save(batch).await {
        Ok(()) => {
            metrics.batches_saved.fetch_add(1, Relaxed);
            tracing::debug!(rows = batch.len(), "batch saved");
        }
        Err(e) => {
            metrics.save_failures.fetch_add(1, Relaxed);
            tracing::error!(rows = batch.len(), "failed to save batch: {e:#}");
        }
    }
}
