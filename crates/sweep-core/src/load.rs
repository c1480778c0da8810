//! Host load sampling.
//!
//! The admission controller steers on the 1-minute load average, normalised
//! by logical core count so the same `MAX_LOAD` setting means the same thing
//! on a 4-core box and a 64-core box.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One sample per wall-clock second. The load average itself only moves on
/// that timescale, so sampling faster buys nothing.
const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// 1-minute load average divided by logical core count.
pub fn normalised_load() -> anyhow::Result<f64> {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    Ok(loadavg_1m()? / cores as f64)
}

#[cfg(unix)]
fn loadavg_1m() -> anyhow::Result<f64> {
    let mut loads = [0f64; 3];
    // Returns the number of samples written, or -1.
    let written = unsafe { libc::getloadavg(loads.as_mut_ptr(), 3) };
    if written < 1 {
        anyhow::bail!("getloadavg returned {written}");
    }
    Ok(loads[0])
}

#[cfg(not(unix))]
fn loadavg_1m() -> anyhow::Result<f64> {
    anyhow::bail!("load averages are not available on this platform")
}

/// Emit one normalised sample per second until cancelled. A failed sample is
/// logged and skipped; the tick cadence is unaffected.
pub async fn run_load_monitor(load_tx: mpsc::Sender<f64>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(SAMPLE_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {}
        }
        match normalised_load() {
            Ok(load) => {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    sent = load_tx.send(load) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
            Err(e) => tracing::error!("load sampling failed: {e}"),
        }
    }
}
