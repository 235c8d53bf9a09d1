//! bluepack CLI entry point

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use bluepack_cli::{
    cli::Cli,
    commands::CommandDispatcher,
    config::{AppConfig, ConfigOverrides},
    error::Result,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Initialize logging
    setup_logging(cli.verbose);

    // Load configuration
    let overrides = ConfigOverrides {
        adapter: cli.adapter.clone(),
    };
    let config = AppConfig::load(cli.config.as_deref(), &overrides)?;

    // Execute the command
    if let Err(e) = CommandDispatcher::execute(cli, config).await {
        error!("Command execution failed: {}", e);
        std::process::exit(1);
    }

    info!("bluepack exited");
    Ok(())
}

/// Setup logging based on verbosity level
///
/// `RUST_LOG` wins over `--verbose` when set. Logs go to stderr so they do
/// not interleave with chat output.
fn setup_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "debug" } else { "info" })
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
