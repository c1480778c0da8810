//! Range-oriented scan task generation.
//!
//! The 32-bit address space tiles into 256 /8 ranges. Each cycle asks the
//! store which range has the oldest observation (absent ranges win), then
//! enumerates its 2²⁴ addresses into the task channel. Back-pressure from the
//! single-element channel is the only pacing; there is no local cursor and no
//! coordinator, so restarts and replicas pick up the right range for free.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::addr;
use crate::store::ResultStore;

/// Addresses per /8 range.
pub const RANGE_SIZE: u32 = 1 << 24;

/// A single address to probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanTask {
    pub ip: u32,
}

/// The addresses of the /8 range anchored at `anchor`, in offer order.
/// The window is `[anchor, anchor + 2²⁴)` with wrap-around modulo 2³².
pub fn range_addrs(anchor: u32) -> impl Iterator<Item = u32> {
    (0..RANGE_SIZE).map(move |offset| anchor.wrapping_add(offset))
}

/// Feed scan tasks until cancelled. A failed range query is logged and
/// retried after yielding once; the store owns range selection, so there is
/// no local state to repair.
pub async fn run_range_source(
    store: Arc<dyn ResultStore>,
    task_tx: mpsc::Sender<ScanTask>,
    shutdown: CancellationToken,
) {
    loop {
        if shutdown.is_cancelled() {
            return;
        }
        let anchor = match store.oldest_range_anchor().await {
            Ok(anchor) => anchor,
            Err(e) => {
                tracing::info!("could not select oldest range: {e:#}");
                tokio::task::yield_now().await;
                continue;
            }
        };
        tracing::info!(range = %format!("{}/8", addr::dotted(anchor)), "scanning range");

        for ip in range_addrs(anchor) {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                sent = task_tx.send(ScanTask { ip }) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
    }
}
