pub mod config;
pub mod run;

use clap::{Parser, Subcommand};

/// Switchyard: routes agent turns across capabilities with crash-safe
/// checkpoints.
#[derive(Debug, Parser)]
#[command(name = "switchyard", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the orchestrator with its background recovery loop (default
    /// when no subcommand is given).
    Serve,
    /// Execute a single turn and print the response.
    Run {
        /// The user query.
        query: String,
        /// Thread to continue (a new one is created when omitted).
        #[arg(long)]
        thread: Option<String>,
        /// Organization billed for the turn.
        #[arg(long)]
        org: Option<String>,
        /// Print the full outcome as JSON instead of the response text.
        #[arg(long)]
        json: bool,
    },
    /// Print the checkpointed status of a thread as JSON.
    Status {
        thread_id: String,
    },
    /// Run one recovery pass over stale incomplete threads.
    Recover,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config path ───────────────────────────────────────────────────────

/// Path from `SY_CONFIG`, or `switchyard.toml` by default.  The file
/// need not exist; a missing file means all defaults.
pub fn config_path() -> String {
    std::env::var("SY_CONFIG").unwrap_or_else(|_| "switchyard.toml".into())
}
