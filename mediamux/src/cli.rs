//! Command-line surface (C9): config path, log-level override, and a
//! validate-only mode for `systemd`-style config checks before a restart.
//!
//! Grounded in the teacher's `clap`-derived CLI style (`synctv`'s top-level
//! `Cli` struct with `#[arg(long, env)]` fields reading from both flags and
//! the environment).

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "mediamux", about = "Real-time media relay server", version)]
pub struct Cli {
    /// Path to the YAML relay configuration.
    #[arg(long, short = 'c', env = "MEDIAMUX_CONFIG", default_value = "mediamux.yml")]
    pub config: PathBuf,

    /// Overrides the configured `logLevel` (`trace`, `debug`, `info`, `warn`, `error`).
    #[arg(long, env = "MEDIAMUX_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Loads and validates the configuration, then exits without starting any servers.
    #[arg(long)]
    pub check_config: bool,

    /// Base directory for the file-backed HLS segment storage.
    #[arg(long, env = "MEDIAMUX_HLS_DIR", default_value = "hls-data")]
    pub hls_dir: PathBuf,
}
