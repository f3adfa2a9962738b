//! CLI argument definitions using clap
//!
//! Commands:
//! - shardflow run --fixture <path> [--config <path>] [--query <text>]
//! - shardflow plan --fixture <path> [--config <path>] [--query <text>]

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// shardflow - cross-partition query pipeline
#[derive(Parser, Debug)]
#[command(name = "shardflow")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a query against a fixture collection, one JSON line per page
    Run {
        /// Path to pipeline configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Path to the fixture describing ranges, documents and plan
        #[arg(long)]
        fixture: PathBuf,

        /// Query text; defaults to the fixture's query
        #[arg(long)]
        query: Option<String>,

        /// Maximum rows per page
        #[arg(long)]
        max_item_count: Option<usize>,

        /// Concurrent partition requests (0 = one per range)
        #[arg(long)]
        max_degree_of_parallelism: Option<usize>,
    },

    /// Print the pipeline a fixture's plan turns into
    Plan {
        /// Path to pipeline configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Path to the fixture
        #[arg(long)]
        fixture: PathBuf,

        /// Query text; defaults to the fixture's query
        #[arg(long)]
        query: Option<String>,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
