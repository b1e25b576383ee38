//! Command-line argument definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Run OpsFlow workflow pipelines from the command line
#[derive(Parser)]
#[command(name = "opsflow", version, about = "Execute declarative DevOps workflows")]
pub struct Cli {
    /// Only log errors
    #[arg(long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a workflow definition file
    Run {
        /// Path to the workflow YAML file
        file: PathBuf,

        /// Environment overrides, merged over the workflow's defaults
        #[arg(long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,

        /// Approve every approval gate without prompting
        #[arg(long)]
        auto_approve: bool,

        /// Actor recorded as the run's trigger
        #[arg(long)]
        triggered_by: Option<String>,
    },
    /// Validate a workflow definition file
    Validate {
        /// Path to the workflow YAML file
        file: PathBuf,
    },
}

impl Cli {
    /// Parse arguments from the process environment
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
