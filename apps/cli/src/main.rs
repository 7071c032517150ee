//! stixkit CLI: STIX bundle extraction and merging.
//!
//! Splits a canonical ATT&CK-style bundle into one bundle per adversary
//! group and folds partial bundles back into the canonical one.

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
