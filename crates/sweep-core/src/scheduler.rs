//! Load-adaptive admission scheduling.
//!
//! Consumes scan tasks and load samples; keeps the number of in-flight
//! probes under a dynamic cap. Workers live in a [`JoinSet`]: the set's
//! length *is* the in-flight count, and completion removes a worker on every
//! exit path, panics included, so an admission slot can never leak.

use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::metrics::ScanMetrics;
use crate::prober::{Outcome, Pinger};
use crate::ranges::ScanTask;

pub const INITIAL_CAP: usize = 1000;
pub const MIN_CAP: usize = 100;
/// Hard ceiling defending the allocator; effectively unbounded in practice.
pub const MAX_CAP: usize = 1_000_000;
pub const CAP_STEP: usize = 100;

/// Cadence of the in-flight / cap status report.
const STATUS_INTERVAL: Duration = Duration::from_secs(10);

/// Additive-increase / step-decrease admission bound.
///
/// Deliberately coarse: it reacts in O(seconds), the same time constant as
/// the OS load average it steers on. Per-probe fine control would chase
/// noise.
pub struct AdmissionController {
    cap: usize,
    max_load: f64,
}

impl AdmissionController {
    pub fn new(max_load: f64) -> Self {
        Self {
            cap: INITIAL_CAP,
            max_load,
        }
    }

    /// Fold one normalised load sample into the cap. Overload steps the cap
    /// down towards the floor and holds it there; anything else steps it up
    /// towards the ceiling.
    pub fn observe(&mut self, load: f64) {
        if load > self.max_load {
            self.cap = self.cap.saturating_sub(CAP_STEP).max(MIN_CAP);
        } else {
            self.cap = (self.cap + CAP_STEP).min(MAX_CAP);
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }
}

/// Admit tasks while `in_flight < cap`, spawning one probe worker per task.
/// Returns once cancelled (or the task channel closes) and every outstanding
/// probe has finished.
pub async fn run_scheduler(
    mut task_rx: mpsc::Receiver<ScanTask>,
    mut load_rx: mpsc::Receiver<f64>,
    result_tx: mpsc::Sender<Outcome>,
    pinger: Arc<dyn Pinger>,
    max_load: f64,
    metrics: Arc<ScanMetrics>,
    shutdown: CancellationToken,
) {
    let mut ctrl = AdmissionController::new(max_load);
    let mut last_load = 0.0f64;
    let mut workers: JoinSet<()> = JoinSet::new();
    let mut status = tokio::time::interval(STATUS_INTERVAL);
    metrics.cap.store(ctrl.cap(), Relaxed);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,

            Some(load) = load_rx.recv() => {
                last_load = load;
                ctrl.observe(load);
                metrics.cap.store(ctrl.cap(), Relaxed);
            }

            _ = status.tick() => {
                tracing::info!(
                    in_flight = workers.len(),
                    cap = ctrl.cap(),
                    load = last_load,
                    probed = metrics.probes_sent.load(Relaxed),
                    batches_saved = metrics.batches_saved.load(Relaxed),
                    "scheduler status"
                );
            }

            Some(joined) = workers.join_next(), if !workers.is_empty() => {
                reap(joined);
                metrics.in_flight.store(workers.len(), Relaxed);
            }

            // The guard is the admission bound: while the cap is reached the
            // branch is disabled and the single-element task channel pushes
            // back on the range source.
            task = task_rx.recv(), if workers.len() < ctrl.cap() => {
                let Some(task) = task else { break };
                metrics.probes_sent.fetch_add(1, Relaxed);
                let pinger = pinger.clone();
                let result_tx = result_tx.clone();
                let worker_metrics = metrics.clone();
                workers.spawn(async move {
                    let reachable = pinger.probe(task.ip).await;
                    if reachable {
                        worker_metrics.probes_reachable.fetch_add(1, Relaxed);
                    }
                    // The batcher may already be gone during shutdown.
                    let _ = result_tx.send(Outcome { ip: task.ip, reachable }).await;
                });
                metrics.in_flight.store(workers.len(), Relaxed);
            }
        }
    }

    // Stop admitting; outstanding probes run to completion (at most the
    // probe deadline) and release their slots as they land.
    while let Some(joined) = workers.join_next().await {
        reap(joined);
        metrics.in_flight.store(workers.len(), Relaxed);
    }
}

fn reap(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            tracing::warn!("probe worker panicked: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Semaphore;

    #[test]
    fn test_cap_staircase_matches_load_swings() {
        let mut ctrl = AdmissionController::new(1.0);
        assert_eq!(ctrl.cap(), 1000);
        ctrl.observe(0.5);
        assert_eq!(ctrl.cap(), 1100);
        ctrl.observe(2.0);
        assert_eq!(ctrl.cap(), 1000);
    }

    #[test]
    fn test_cap_non_increasing_under_sustained_overload() {
        let mut ctrl = AdmissionController::new(1.0);
        let mut prev = ctrl.cap();
        for _ in 0..50 {
            ctrl.observe(4.0);
            assert!(ctrl.cap() <= prev);
            assert!(ctrl.cap() >= MIN_CAP);
            prev = ctrl.cap();
        }
        assert_eq!(ctrl.cap(), MIN_CAP);
    }

    #[test]
    fn test_cap_non_decreasing_under_idle_up_to_ceiling() {
        let mut ctrl = AdmissionController::new(1.0);
        let mut prev = ctrl.cap();
        for _ in 0..20_000 {
            ctrl.observe(0.0);
            assert!(ctrl.cap() >= prev);
            assert!(ctrl.cap() <= MAX_CAP);
            prev = ctrl.cap();
        }
        assert_eq!(ctrl.cap(), MAX_CAP);
    }

    #[test]
    fn test_boundary_load_is_not_overload() {
        // load == max_load steps up, not down.
        let mut ctrl = AdmissionController::new(1.0);
        ctrl.observe(1.0);
        assert_eq!(ctrl.cap(), 1100);
    }

    /// Pinger fake that parks every probe on a semaphore until the test
    /// releases it.
    struct GatedPinger {
        gate: Semaphore,
    }

    #[async_trait]
    impl Pinger for GatedPinger {
        async fn probe(&self, _ip: u32) -> bool {
            self.gate.acquire().await.unwrap().forget();
            false
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_in_flight_never_exceeds_cap() {
        const TASKS: usize = INITIAL_CAP + 200;

        let pinger = Arc::new(GatedPinger {
            gate: Semaphore::new(0),
        });
        let metrics = Arc::new(ScanMetrics::new());
        let shutdown = CancellationToken::new();
        let (task_tx, task_rx) = mpsc::channel(1);
        let (_load_tx, load_rx) = mpsc::channel(1);
        let (result_tx, mut result_rx) = mpsc::channel(1);

        let scheduler = tokio::spawn(run_scheduler(
            task_rx,
            load_rx,
            result_tx,
            pinger.clone(),
            1.0,
            metrics.clone(),
            shutdown,
        ));
        let producer = tokio::spawn(async move {
            for ip in 0..TASKS as u32 {
                task_tx.send(ScanTask { ip }).await.unwrap();
            }
        });

        // With every probe parked, admissions must stall exactly at the cap.
        let mut waited = 0;
        while metrics.in_flight.load(Relaxed) < INITIAL_CAP {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += 1;
            assert!(waited < 500, "never reached the admission cap");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(metrics.in_flight.load(Relaxed), INITIAL_CAP);

        // Release the floodgate; every task must complete exactly once.
        pinger.gate.add_permits(TASKS);
        let mut outcomes = 0;
        while outcomes < TASKS {
            result_rx.recv().await.unwrap();
            outcomes += 1;
        }

        producer.await.unwrap();
        scheduler.await.unwrap();
        assert!(result_rx.recv().await.is_none());
        assert_eq!(metrics.probes_sent.load(Relaxed), TASKS as u64);
        assert_eq!(metrics.in_flight.load(Relaxed), 0);
    }
}
