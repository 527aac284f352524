use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::path::PathBuf;
use std::process;
use tracing::error;

mod ingest;
mod logging;
mod provision;
mod tools;

/// Secure telemetry link for ESP32 temperature/humidity nodes.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
    /// Optional path to a file to write logs to, in addition to the console.
    #[arg(short, long, global = true, env = "DHTLINK_LOG_FILE")]
    log_file: Option<PathBuf>,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe to the broker and store authenticated readings.
    Ingest(ingest::IngestArgs),
    /// Issue a fresh key to a device attached over serial.
    Provision(provision::ProvisionArgs),
    /// Encrypt and tag a reading the way the firmware does, printing the hex envelope.
    Seal(tools::SealArgs),
    /// List provisioned device identifiers.
    Keys(tools::KeysArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = logging::setup_logging(cli.log_file, &cli.verbose)?;

    let result = match cli.command {
        Command::Ingest(args) => ingest::run(args).await,
        Command::Provision(args) => provision::run(args).await,
        Command::Seal(args) => tools::seal(args),
        Command::Keys(args) => tools::keys(args),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        process::exit(1);
    }

    Ok(())
}
