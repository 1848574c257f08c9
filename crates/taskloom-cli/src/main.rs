//! Command-line entry point for validating and running workflow patterns.
//!
//! Every command boots an in-process kernel from `~/.taskloom/config.toml`
//! (or `--config`). `run` registers an echo agent for each agent type the
//! pattern uses, so artifact flow can be exercised without a model provider.

mod cli;
mod cmd;
mod ui;

use crate::cli::{Cli, Commands};
use clap::Parser;
use taskloom_kernel::config::load_config;

fn init_tracing_stderr(default_level: &str) {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref());
    init_tracing_stderr(&config.log_level);

    match cli.command {
        Commands::Validate { file } => cmd::workflow::cmd_validate(&file, cli.json),
        Commands::Plan { file } => cmd::workflow::cmd_plan(&file, cli.json),
        Commands::Run { file, vars, fail } => {
            cmd::workflow::cmd_run(config, &file, vars, fail, cli.json).await
        }
        Commands::Patterns => cmd::workflow::cmd_patterns(config, cli.json),
    }
}
