use anyhow::Result;
use clap::Parser;
use seedcard::{cli::Cli, commands, logging};

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    log::debug!("seedcard {}", env!("CARGO_PKG_VERSION"));
    commands::dispatch(&cli)
}
