//! versebatch CLI: concurrent batch prompting and document download.
//!
//! Runs a prompt over every line of a file or every file of a folder
//! through a bounded worker pool, and downloads and validates source
//! documents listed in a CSV.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    let config = commands::resolve_config(&cli)?;
    commands::init_tracing(&cli, &config)?;
    commands::run(cli, config).await
}
