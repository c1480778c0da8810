//! Scan progress instrumentation.
//!
//! All fields use `Relaxed` ordering; these are reporting counters, not
//! synchronisation. One instance is shared by `Arc` across the scheduler,
//! the batcher, and the periodic status log.

use std::sync::atomic::{AtomicU64, AtomicUsize};

#[derive(Default)]
pub struct ScanMetrics {
    /// Probes handed to a worker (cumulative).
    pub probes_sent: AtomicU64,
    /// Probes that got an echo reply within the deadline (cumulative).
    pub probes_reachable: AtomicU64,
    /// Batches successfully written to the store (cumulative).
    pub batches_saved: AtomicU64,
    /// Batch writes that failed and were discarded (cumulative).
    pub save_failures: AtomicU64,
    /// Admitted-but-not-completed probes (gauge, maintained by the scheduler).
    pub in_flight: AtomicUsize,
    /// Current admission cap (gauge, maintained by the scheduler).
    pub cap: AtomicUsize,
}

impl ScanMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}
