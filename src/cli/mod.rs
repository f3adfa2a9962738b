//! CLI module for shardflow
//!
//! Provides command-line interface for:
//! - run: Execute a query against a fixture collection
//! - plan: Show the pipeline a fixture's query plan builds

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{plan, run, run_command, run_query};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{page_json, write_error, write_page, write_value};
