use anyhow::{Context, Result, bail};
use clap::Args;
use dhtlink_lib::auth::seal as seal_envelope;
use dhtlink_lib::constants::{DEFAULT_NAMESPACE, IV_SIZE, SECURE_TOPIC_SUFFIX};
use dhtlink_lib::{DeviceId, DeviceKey, KeyStore, Reading};
use rand::RngCore;
use rand::rngs::OsRng;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Args, Debug)]
pub struct SealArgs {
    /// Device whose key is taken from the key store.
    #[arg(short, long)]
    device: DeviceId,
    #[arg(long, env = "DHTLINK_KEY_DB", default_value = "keys.json")]
    key_db: PathBuf,
    /// First topic segment the device publishes under.
    #[arg(long, env = "DHTLINK_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    namespace: String,
    /// Temperature in °C.
    #[arg(short, long, allow_negative_numbers = true)]
    temperature: Option<f64>,
    /// Relative humidity in %.
    #[arg(short = 'H', long)]
    humidity: Option<f64>,
    /// Sequence number; must exceed the last one the ingest side accepted.
    #[arg(short, long)]
    counter: u64,
    /// Fixed IV as 32 hex characters instead of a random one.
    #[arg(long)]
    iv: Option<String>,
}

#[derive(Args, Debug)]
pub struct KeysArgs {
    #[arg(long, env = "DHTLINK_KEY_DB", default_value = "keys.json")]
    key_db: PathBuf,
}

/// Print a hex envelope a device would publish for the given reading
pub fn seal(args: SealArgs) -> Result<()> {
    let keys = load_keys(&args.key_db)?;
    let key: &DeviceKey = keys
        .lookup(&args.device)
        .with_context(|| format!("{} is not in {}", args.device, args.key_db.display()))?;

    let iv = match args.iv {
        Some(ref text) => parse_iv(text)?,
        None => {
            let mut iv = [0u8; IV_SIZE];
            OsRng.fill_bytes(&mut iv);
            iv
        }
    };

    let reading = Reading::new(args.temperature, args.humidity, args.counter);
    let envelope = seal_envelope(&reading.to_payload(), key, iv);

    let topic = format!("{}/{}/{}", args.namespace, args.device, SECURE_TOPIC_SUFFIX);
    info!(%topic, size = envelope.encoded_len(), "Sealed {}", reading);
    println!("{}", envelope.to_hex());
    Ok(())
}

/// Print every provisioned device identifier, one per line
pub fn keys(args: KeysArgs) -> Result<()> {
    let keys = load_keys(&args.key_db)?;
    info!(path = %keys.path().display(), devices = keys.len(), "Key store");
    for device_id in keys.device_ids() {
        println!("{}", device_id);
    }
    Ok(())
}

fn load_keys(path: &Path) -> Result<KeyStore> {
    KeyStore::load(path).with_context(|| format!("Failed to load key store {}", path.display()))
}

fn parse_iv(text: &str) -> Result<[u8; IV_SIZE]> {
    let bytes = hex::decode(text.trim()).context("IV is not valid hex")?;
    match <[u8; IV_SIZE]>::try_from(bytes.as_slice()) {
        Ok(iv) => Ok(iv),
        Err(_) => bail!("IV must be {} bytes, got {}", IV_SIZE, bytes.len()),
    }
}
