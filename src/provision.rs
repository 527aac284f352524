use anyhow::{Context, Result};
use clap::Args;
use dhtlink_lib::constants::DEFAULT_POLL_INTERVAL;
use dhtlink_lib::serial::StreamLines;
use dhtlink_lib::{DeviceId, Handshake, HandshakeTimeouts, KeyStore, OperatorPrompt};
use rand::rngs::OsRng;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct ProvisionArgs {
    /// Serial port the device is attached to (e.g. /dev/ttyUSB0 or COM3).
    #[arg(short, long, env = "DHTLINK_SERIAL_PORT")]
    port: String,
    #[arg(short, long, env = "DHTLINK_BAUD", default_value_t = 115_200)]
    baud: u32,
    /// JSON file mapping device identifiers to keys.
    #[arg(long, env = "DHTLINK_KEY_DB", default_value = "keys.json")]
    key_db: PathBuf,
    /// Milliseconds to wait after opening the port; most boards reset on open.
    #[arg(long, default_value_t = 2000)]
    settle_ms: u64,
    /// Seconds to wait for the device to print its identifier.
    #[arg(long, default_value_t = 5)]
    id_timeout: u64,
    /// Seconds to wait for the device to confirm the key.
    #[arg(long, default_value_t = 5)]
    ack_timeout: u64,
    /// Replace an existing key without asking.
    #[arg(short, long)]
    yes: bool,
}

pub async fn run(args: ProvisionArgs) -> Result<()> {
    tokio::task::spawn_blocking(move || provision(args))
        .await
        .context("Provisioning task failed")?
}

fn provision(args: ProvisionArgs) -> Result<()> {
    let mut keys = KeyStore::load(&args.key_db)
        .with_context(|| format!("Failed to load key store {}", args.key_db.display()))?;

    info!(port = %args.port, baud = args.baud, "Opening serial port...");
    let port = serialport::new(&args.port, args.baud)
        .timeout(DEFAULT_POLL_INTERVAL)
        .open()
        .with_context(|| format!("Failed to open serial port {}", args.port))?;
    std::thread::sleep(Duration::from_millis(args.settle_ms));

    let timeouts = HandshakeTimeouts {
        device_id: Duration::from_secs(args.id_timeout),
        ack: Duration::from_secs(args.ack_timeout),
        poll: DEFAULT_POLL_INTERVAL,
    };
    let prompt = ConsolePrompt { assume_yes: args.yes };

    let provisioned = Handshake::new(StreamLines::new(port), prompt, OsRng, &mut keys)
        .with_timeouts(timeouts)
        .run()
        .with_context(|| format!("Provisioning over {} failed", args.port))?;

    info!(
        device_id = %provisioned.device_id,
        replaced = provisioned.replaced_existing,
        key_db = %keys.path().display(),
        "Provisioning complete"
    );
    println!("{}", provisioned.device_id);
    Ok(())
}

/// Asks on the terminal before re-keying a device
struct ConsolePrompt {
    assume_yes: bool,
}

impl OperatorPrompt for ConsolePrompt {
    fn confirm_overwrite(&mut self, device_id: &DeviceId) -> bool {
        if self.assume_yes {
            warn!(device_id = %device_id, "Replacing existing key (--yes)");
            return true;
        }

        print!("{} is already provisioned. Replace its key? [y/N] ", device_id);
        if io::stdout().flush().is_err() {
            return false;
        }
        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) => is_affirmative(&answer),
            Err(_) => false,
        }
    }
}

/// English or French yes
fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes" | "o" | "oui")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_affirmative() {
        for yes in ["y", "Y\n", " yes ", "o", "OUI\r\n"] {
            assert!(is_affirmative(yes), "{:?}", yes);
        }
        for no in ["", "\n", "n", "no", "non", "yep", "ok"] {
            assert!(!is_affirmative(no), "{:?}", no);
        }
    }

    #[test]
    fn test_assume_yes_skips_terminal() {
        let mut prompt = ConsolePrompt { assume_yes: true };
        assert!(prompt.confirm_overwrite(&DeviceId::parse("ESP32_A4CF12B3C5D6").unwrap()));
    }
}
