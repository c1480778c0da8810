//! Runtime configuration.
//!
//! Flags and environment are folded into one validated record at startup and
//! threaded into each component; no ambient globals.

use anyhow::{ensure, Result};
use sweep_core::StoreConfig;

use crate::cli::Cli;

#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreConfig,
    pub max_load: f64,
    pub log_level: u8,
}

impl Config {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        ensure!(
            cli.max_load > 0.0 && cli.max_load <= 100.0,
            "MAX_LOAD must be in (0, 100], got {}",
            cli.max_load
        );
        Ok(Self {
            store: StoreConfig {
                address: cli.db_address.clone(),
                port: cli.db_port,
                username: cli.db_username.clone(),
                password: cli.db_password.clone(),
                database: cli.db_name.clone(),
                table: cli.db_table.clone(),
            },
            max_load: cli.max_load,
            log_level: cli.log_level,
        })
    }

    /// Default tracing filter directive for the numeric log level.
    pub fn log_directive(&self) -> &'static str {
        if self.log_level >= 5 {
            "debug"
        } else {
            "info"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn cli(extra: &[&str]) -> Cli {
        let mut args = vec![
            "pingsweep",
            "--db-address",
            "127.0.0.1",
            "--db-port",
            "5432",
            "--db-username",
            "postgres",
            "--db-password",
            "123456",
            "--db-name",
            "postgres",
            "--db-table",
            "results",
        ];
        args.extend_from_slice(extra);
        Cli::parse_from(args)
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_cli(&cli(&[])).unwrap();
        assert_eq!(config.max_load, 1.0);
        assert_eq!(config.log_level, 4);
        assert_eq!(config.log_directive(), "info");
        assert_eq!(config.store.table, "results");
    }

    #[test]
    fn test_max_load_bounds() {
        assert!(Config::from_cli(&cli(&["--max-load", "0"])).is_err());
        assert!(Config::from_cli(&cli(&["--max-load", "-1"])).is_err());
        assert!(Config::from_cli(&cli(&["--max-load", "100.5"])).is_err());
        assert!(Config::from_cli(&cli(&["--max-load", "100"])).is_ok());
        assert!(Config::from_cli(&cli(&["--max-load", "0.25"])).is_ok());
    }

    #[test]
    fn test_debug_log_level() {
        let config = Config::from_cli(&cli(&["--log-level", "5"])).unwrap();
        assert_eq!(config.log_directive(), "debug");
    }
}
