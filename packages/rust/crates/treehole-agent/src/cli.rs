use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "treehole")]
#[command(about = "Treehole companion: chat with rolling long-term memory. REPL, manual consolidation, memory inspection.")]
pub(crate) struct Cli {
    /// Override config directory (user settings are read from `<conf>/treehole/settings.yaml`).
    #[arg(long, global = true)]
    pub(crate) conf: Option<PathBuf>,

    /// Debug-level logs (ignored when RUST_LOG is set).
    #[arg(long, short = 'v', global = true)]
    pub(crate) verbose: bool,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Chat: one-shot with --query, or read lines from stdin until EOF or Ctrl+C.
    Repl {
        /// Run one turn with this message and exit.
        #[arg(long)]
        query: Option<String>,
    },
    /// Consolidate recent turns into the long-term memory now.
    Consolidate,
    /// Print the active long-term memory and counters.
    Memory,
}
