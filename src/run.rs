//! Pipeline bring-up and lifecycle supervision.
//!
//! Wiring order matters only at the edges: the store opens first (nothing to
//! scan into without it) and closes last (writers still in flight at
//! shutdown get to land). In between, four stage tasks share single-element
//! channels and one cancellation token.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use sweep_core::{
    run_batcher, run_load_monitor, run_range_source, run_scheduler, IcmpProber, PgStore, Pinger,
    ResultStore, ScanMetrics,
};

use crate::config::Config;

pub async fn run(config: Config) -> Result<()> {
    let store = PgStore::connect(&config.store)
        .await
        .context("cannot open connection to results store")?;
    store
        .ping()
        .await
        .context("results store did not answer ping")?;
    tracing::info!("creating results table if not exists");
    store
        .ensure_schema()
        .await
        .context("results table creation failed")?;
    let store: Arc<dyn ResultStore> = Arc::new(store);

    let shutdown = CancellationToken::new();

    let prober = IcmpProber::new().context("icmp prober bring-up failed")?;
    let _reply_listener = prober
        .spawn_reply_listener(shutdown.clone())
        .context("cannot start icmp reply listener")?;
    let pinger: Arc<dyn Pinger> = Arc::new(prober);

    let metrics = Arc::new(ScanMetrics::new());

    // Single-element channels: back-pressure on the task channel is the
    // admission mechanism, not a buffer.
    let (task_tx, task_rx) = mpsc::channel(1);
    let (result_tx, result_rx) = mpsc::channel(1);
    let (load_tx, load_rx) = mpsc::channel(1);

    let load_monitor = tokio::spawn(run_load_monitor(load_tx, shutdown.clone()));
    let range_source = tokio::spawn(run_range_source(
        store.clone(),
        task_tx,
        shutdown.clone(),
    ));
    let scheduler = tokio::spawn(run_scheduler(
        task_rx,
        load_rx,
        result_tx,
        pinger,
        config.max_load,
        metrics.clone(),
        shutdown.clone(),
    ));
    let batcher = tokio::spawn(run_batcher(
        result_rx,
        store.clone(),
        metrics.clone(),
        shutdown.clone(),
    ));

    spawn_signal_handler(shutdown)?;
    tracing::info!(max_load = config.max_load, "pingsweep started");

    // The batcher anchors the shutdown sequence: it returns once the final
    // partial batch is flushed and in-flight writers have finished. The
    // scheduler then drains its outstanding probes.
    batcher.await.context("batcher task failed")?;
    scheduler.await.context("scheduler task failed")?;
    range_source.await.context("range source task failed")?;
    load_monitor.await.context("load monitor task failed")?;

    store.close().await;
    tracing::info!("shutdown complete");
    Ok(())
}

fn spawn_signal_handler(shutdown: CancellationToken) -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("cannot install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("cannot install SIGINT handler")?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("caught SIGTERM; stopping"),
            _ = sigint.recv() => tracing::info!("caught SIGINT; stopping"),
        }
        shutdown.cancel();
    });
    Ok(())
}
