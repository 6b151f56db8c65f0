//! treehole CLI: repl, manual consolidation, memory inspection.
//!
//! Without `TREEHOLE_API_KEY` replies and consolidation run offline.
//!
//! Logging: set `RUST_LOG=treehole=debug,treehole_memory=debug` (or `warn`, `info`) to see logs on stderr.

mod cli;
mod nodes;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use treehole_agent::{load_runtime_settings, set_config_home_override};

use crate::cli::{Cli, Command};
use crate::nodes::{run_consolidate_mode, run_memory_mode, run_repl_mode};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if let Some(conf_dir) = cli.conf.clone() {
        set_config_home_override(conf_dir);
    }

    // Initialize tracing: RUST_LOG overrides; --verbose => debug; else info
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose {
            "treehole=debug,treehole_agent=debug,treehole_memory=debug"
        } else {
            "treehole=info,treehole_agent=info,treehole_memory=info"
        })
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let runtime_settings = load_runtime_settings();

    match cli.command {
        Command::Repl { query } => run_repl_mode(query, &runtime_settings).await,
        Command::Consolidate => run_consolidate_mode(&runtime_settings).await,
        Command::Memory => run_memory_mode(&runtime_settings),
    }
}
