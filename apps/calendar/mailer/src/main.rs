//! Calendar Mailer Entry Point

use calendar_mailer::Cli;
use clap::Parser;
use core_config::tracing::install_color_eyre;
use eyre::Result;

#[tokio::main]
async fn main() -> Result<()> {
    // Install color-eyre first for colored error output
    install_color_eyre();

    let cli = Cli::parse();
    calendar_mailer::run(cli).await
}
