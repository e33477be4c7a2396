//! CLI argument definitions

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// pagehint - Event-driven web page linter
#[derive(Parser)]
#[command(name = "pagehint")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Analyze one or more URLs or local paths
    Analyze {
        /// URLs, files or directories to analyze
        #[arg(required = true)]
        targets: Vec<String>,

        /// Formatters to print results with (replaces the configured ones)
        #[arg(short, long = "format", value_name = "NAME")]
        formats: Vec<String>,

        /// Ask the connector to keep watching the target
        #[arg(long)]
        watch: bool,

        /// Per-rule time limit in milliseconds
        #[arg(long, value_name = "MS")]
        rules_timeout: Option<u64>,
    },

    /// List the builtin rules
    Rules,
}
