//! CLI definitions for pingsweep.
//!
//! Every configuration key doubles as an environment variable so the scanner
//! drops into a container or a systemd unit without a wrapper script.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "pingsweep",
    version,
    about = "Continuous IPv4 reachability scanner\n\nProbes the whole address space with ICMP echo, oldest /8 range first, and keeps per-address reachability fresh in Postgres.",
    long_about = None
)]
pub struct Cli {
    /// Postgres host
    #[clap(long, env = "DB_ADDRESS")]
    pub db_address: String,

    /// Postgres port
    #[clap(long, env = "DB_PORT")]
    pub db_port: u16,

    /// Postgres user
    #[clap(long, env = "DB_USERNAME")]
    pub db_username: String,

    /// Postgres password
    #[clap(long, env = "DB_PASSWORD", hide_env_values = true)]
    pub db_password: String,

    /// Database name
    #[clap(long, env = "DB_NAME")]
    pub db_name: String,

    /// Results table name
    #[clap(long, env = "DB_TABLE")]
    pub db_table: String,

    /// Normalised 1-minute load average the admission controller steers
    /// towards; must be in (0, 100]
    #[clap(long, env = "MAX_LOAD", default_value_t = 1.0, allow_negative_numbers = true)]
    pub max_load: f64,

    /// Log verbosity: 4 = notice, 5 = debug
    #[clap(long, env = "LOG_LEVEL", default_value_t = 4)]
    pub log_level: u8,

    /// Write a chrome-trace CPU profile of the run to this path
    #[clap(long, value_name = "PATH")]
    pub cpuprofile: Option<PathBuf>,

    /// Write a dhat heap profile to this path (needs a build with the
    /// dhat-heap feature)
    #[clap(long, value_name = "PATH")]
    pub memprofile: Option<PathBuf>,
}
