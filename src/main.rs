use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use snc::cli::{Cli, Commands};
use snc::{forward, rsync, RunConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.debug);

    let config = Arc::new(RunConfig::resolve(&cli)?);

    match cli.command {
        Commands::Rsync(args) => rsync::run(config, args).await,
        Commands::Forward(args) => forward::run(config, args).await,
    }
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("snc=debug")
    } else {
        EnvFilter::new("snc=warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
