use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use notifyd::bootstrap::Server;
use notifyd::config::Config;
use notifyd::telemetry::init_tracing;

#[derive(Parser, Debug)]
#[command(name = "notifyd")]
#[command(author, version, about = "Alert-notification dispatch daemon")]
struct Args {
    /// YAML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Check the configuration and exit without starting the pipeline
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // The config carries the log settings, so it is read before tracing
    // exists; config errors go to stderr via the error return.
    let config = Config::load(&args.config)?;

    let _log_guard = init_tracing(&config.telemetry)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "notifyd starting"
    );

    if args.validate {
        info!("configuration check passed");
        return Ok(());
    }

    let server = Server::new(config).await?;
    server.run().await?;

    Ok(())
}
