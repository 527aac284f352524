use anyhow::{Context, Result};
use clap::Args;
use dhtlink_lib::constants::DEFAULT_NAMESPACE;
use dhtlink_lib::topic::subscription_filter;
use dhtlink_lib::{Dispatcher, JsonRecordStore, KeyStore, ReplayGuard, ReplayJournal};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tracing::{debug, info, warn};

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// MQTT broker host.
    #[arg(long, env = "DHTLINK_BROKER_HOST", default_value = "localhost")]
    broker_host: String,
    /// MQTT broker port.
    #[arg(long, env = "DHTLINK_BROKER_PORT", default_value_t = 1883)]
    broker_port: u16,
    #[arg(long, env = "DHTLINK_CLIENT_ID", default_value = "dhtlink-ingest")]
    client_id: String,
    /// MQTT keep-alive in seconds.
    #[arg(long, default_value_t = 60)]
    keep_alive: u64,
    /// First topic segment; the subscription is `<namespace>/+/secure`.
    #[arg(long, env = "DHTLINK_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    namespace: String,
    /// JSON file mapping device identifiers to keys.
    #[arg(long, env = "DHTLINK_KEY_DB", default_value = "keys.json")]
    key_db: PathBuf,
    /// Directory for per-device record files.
    #[arg(long, env = "DHTLINK_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,
    /// File the last accepted counter of each device is kept in across restarts.
    #[arg(long, env = "DHTLINK_REPLAY_STATE", default_value = "replay_state.json")]
    replay_state: PathBuf,
    /// Keep replay counters in memory only.
    #[arg(long, conflicts_with = "replay_state")]
    no_replay_state: bool,
    /// Seconds to wait before reconnecting after a broker error.
    #[arg(long, default_value_t = 5)]
    retry_delay: u64,
}

pub async fn run(args: IngestArgs) -> Result<()> {
    let keys = KeyStore::load(&args.key_db)
        .with_context(|| format!("Failed to load key store {}", args.key_db.display()))?;
    if keys.is_empty() {
        warn!("No devices provisioned yet, every message will be dropped");
    }

    let store = JsonRecordStore::open(&args.data_dir)
        .with_context(|| format!("Failed to open data directory {}", args.data_dir.display()))?;

    let mut dispatcher = if args.no_replay_state {
        Dispatcher::new(keys, ReplayGuard::new(), store)
    } else {
        let journal = ReplayJournal::new(&args.replay_state);
        let replay = journal
            .load()
            .with_context(|| format!("Failed to load replay state {}", args.replay_state.display()))?;
        Dispatcher::new(keys, replay, store).with_journal(journal)
    };

    let filter = subscription_filter(&args.namespace);
    let mut options = MqttOptions::new(&args.client_id, &args.broker_host, args.broker_port);
    options.set_keep_alive(Duration::from_secs(args.keep_alive));
    options.set_clean_session(true);
    let (client, mut eventloop) = AsyncClient::new(options, 100);

    info!(
        devices = dispatcher.key_store().len(),
        data_dir = %dispatcher.sink().data_dir().display(),
        "Ingest ready"
    );
    info!(
        host = %args.broker_host,
        port = args.broker_port,
        topic = %filter,
        "Connecting to MQTT broker..."
    );

    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Ctrl+C received, shutting down gracefully.");
                let _ = client.disconnect().await;
                break;
            }
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    // Clean sessions drop subscriptions, so subscribe on every (re)connect
                    client
                        .try_subscribe(filter.as_str(), QoS::AtLeastOnce)
                        .context("Failed to queue subscription")?;
                    info!(topic = %filter, "Connected to MQTT broker");
                }
                Ok(Event::Incoming(Packet::SubAck(_))) => {
                    debug!(topic = %filter, "Subscription acknowledged");
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    dispatcher.handle_message(&publish.topic, &publish.payload);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, retry_in_secs = args.retry_delay, "MQTT connection error");
                    if sleep_unless(Duration::from_secs(args.retry_delay), &mut shutdown).await {
                        info!("Ctrl+C received while waiting to reconnect, shutting down.");
                        let _ = client.disconnect().await;
                        break;
                    }
                }
            }
        }
    }

    info!(
        devices = dispatcher.replay_guard().counters().len(),
        "Ingest stopped"
    );
    Ok(())
}

/// Sleep for `delay`, returning early with `true` if `shutdown` completes first
async fn sleep_unless<F: Future + Unpin>(delay: Duration, shutdown: &mut F) -> bool {
    tokio::select! {
        _ = shutdown => true,
        _ = tokio::time::sleep(delay) => false,
    }
}
