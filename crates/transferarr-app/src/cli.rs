//! Command-line surface for the daemon.

use std::path::PathBuf;

use clap::Parser;

/// Torrent migration daemon driven by media-manager queues.
#[derive(Debug, Parser)]
#[command(name = "transferarr", version, about)]
pub struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, env = "CONFIG_FILE", default_value = "config.json")]
    pub config: PathBuf,

    /// Directory holding the state snapshot and transfer history.
    #[arg(long, env = "STATE_DIR", default_value = "state")]
    pub state_dir: PathBuf,
}
