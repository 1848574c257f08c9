//! Clap CLI definitions for Taskloom.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  taskloom validate research.toml           Check artifact flow without running
  taskloom plan research.toml               Show execution groups
  taskloom run research.toml --var topic=x  Dry-run with the echo agent
  taskloom patterns                         List patterns in the configured dir";

/// Agent workflow sequencing from the terminal.
#[derive(Parser)]
#[command(name = "taskloom", version, about, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Statically validate a pattern file (.toml or .json).
    Validate {
        /// Pattern file.
        file: PathBuf,
    },
    /// Print the execution plan for a pattern file.
    Plan {
        /// Pattern file.
        file: PathBuf,
    },
    /// Execute a pattern with a built-in echo agent for every agent type.
    Run {
        /// Pattern file.
        file: PathBuf,
        /// Template variable, repeatable.
        #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
        vars: Vec<(String, String)>,
        /// Make the echo agent for an agent type fail with the given error.
        #[arg(long, value_name = "AGENT=ERROR", value_parser = parse_var)]
        fail: Option<(String, String)>,
    },
    /// List patterns in the configured patterns directory.
    Patterns,
}

/// Parse a `key=value` pair.
pub fn parse_var(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}
