//! CLI parsing.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Session scratch daemon - keeps the scratch root free of stale session data
#[derive(Parser, Debug)]
#[command(name = "scratchd")]
#[command(about = "Session scratch daemon - purge stale sandboxes and erase expired files")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short = 'd', long = "debug")]
    pub debug: bool,

    /// Path to settings file (default: ~/.scratch-settings.json)
    #[arg(short = 's', long = "settings")]
    pub settings: Option<PathBuf>,

    /// Scratch root, overriding the settings file and SCRATCH_ROOT
    #[arg(short = 'r', long = "root")]
    pub root: Option<PathBuf>,

    /// Run the startup cleanup and one orphan sweep, then exit
    #[arg(long = "once", conflicts_with = "purge")]
    pub once: bool,

    /// Immediately purge one session's sandbox, then exit
    #[arg(long = "purge", value_name = "SESSION")]
    pub purge: Option<String>,

    /// Seconds between orphan sweeps (default: sweepIntervalSecs from settings)
    #[arg(long = "interval", value_name = "SECS")]
    pub interval: Option<u64>,
}

impl Cli {
    /// Parse CLI arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Get the settings file path.
    pub fn get_settings_path(&self) -> Option<PathBuf> {
        self.settings.clone().or_else(crate::config::default_settings_path)
    }

    /// Sweep interval override, if one was given.
    pub fn get_interval(&self) -> Option<Duration> {
        self.interval.map(Duration::from_secs)
    }
}
