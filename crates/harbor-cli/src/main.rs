//! Harbor CLI - Command-line interface for Harbor registry management.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{Cli, Commands, RegistryCommand};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let default_filter = if cli.verbose { "harbor=debug" } else { "harbor=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Registry(args) => match args.command {
            RegistryCommand::Protect(args) => commands::protect::run(args),
            RegistryCommand::Batch(args) => commands::batch::execute(args).await,
            RegistryCommand::Health(args) => commands::health::execute(args).await,
        },
        Commands::Version => {
            println!("harbor {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
