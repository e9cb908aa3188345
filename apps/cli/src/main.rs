//! modcrawl CLI: incremental package index crawler.
//!
//! Follows a package index feed from a stored watermark, enriches packages
//! with metadata scraped from the registry, and writes both to a local
//! libSQL database.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
