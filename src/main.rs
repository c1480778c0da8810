//! pingsweep — continuous IPv4 reachability scanner.
//!
//! Probes the entire IPv4 space with ICMP echo requests, persists
//! per-address reachability to Postgres, and forever revisits the /8 range
//! with the oldest observations. Run `pingsweep --help` for configuration.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod run;

use cli::Cli;
use config::Config;

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_cli(&cli)?;

    // The chrome-trace guard must live for the whole run; the profile is
    // flushed when it drops.
    let _trace_guard = init_tracing(&cli, &config);

    #[cfg(feature = "dhat-heap")]
    let _heap_profiler = cli
        .memprofile
        .as_ref()
        .map(|path| dhat::Profiler::builder().file_name(path.clone()).build());
    #[cfg(not(feature = "dhat-heap"))]
    if cli.memprofile.is_some() {
        tracing::warn!("built without the dhat-heap feature; --memprofile has no effect");
    }

    run::run(config).await
}

fn init_tracing(cli: &Cli, config: &Config) -> Option<tracing_chrome::FlushGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_directive()));

    let (chrome_layer, guard) = match &cli.cpuprofile {
        Some(path) => {
            let (layer, guard) = tracing_chrome::ChromeLayerBuilder::new().file(path).build();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(chrome_layer)
        .init();

    guard
}
