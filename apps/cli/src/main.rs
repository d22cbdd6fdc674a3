//! regbrief CLI: NIST SP 800 update briefs for software teams.
//!
//! Discovers recent publications, keeps what matters to engineering, maps it
//! to 800-53 / 800-171 / SSDF controls, and opens a pull request with a
//! one-page brief.

mod commands;
mod server;

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
