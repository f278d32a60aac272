//! CLI command definitions

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// MacroDaemon - macro execution coordinator
#[derive(Parser)]
#[command(name = "md", about = "Coordinates macro execution across contexts", version)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the coordinator until interrupted
    Run,

    /// Run a scripted start/pause/resume/stop exchange against the loopback
    /// worker and print each outcome
    Demo {
        /// Macro id to play
        #[arg(default_value = "demo")]
        macro_id: String,

        /// Owner to run under
        #[arg(short, long, default_value = "main")]
        owner: String,
    },

    /// Print the effective configuration
    Config,
}
