//! trestled - topic-to-sink bridge daemon.
//!
//! Runs a delivery pump against an in-process broker. Lines read from
//! stdin are published to the configured topic, pumped through the
//! bridge, and written to the configured sink, so the full
//! subscribe/deliver/commit path can be exercised without an external
//! broker.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use trestle_bridge::{BackoffPolicy, BridgeOptions, DeliveryPump, OutletReceivers, PumpSummary};
use trestle_core::endpoint::Endpoint;
use trestle_transport::memory::MemoryBroker;

mod config;
mod sink;

use config::{Config, SinkKind};
use sink::{FileSink, StdoutSink};

const DEFAULT_CONFIG_PATH: &str = "/etc/trestle/config.toml";

#[derive(Parser, Debug)]
#[command(name = "trestled")]
#[command(about = "Trestle topic-subscription bridge daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the subscribed topic
    #[arg(short = 't', long)]
    topic: Option<String>,

    /// Enable verbose output
    #[arg(short = 'v', long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = if args.config.exists() {
        Config::from_file(&args.config)?
    } else {
        if args.config != PathBuf::from(DEFAULT_CONFIG_PATH) {
            eprintln!("Configuration file {} not found", args.config.display());
            std::process::exit(1);
        }
        Config::default()
    };

    let log_level = if args.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    let filter = EnvFilter::try_new(&log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let topic = args.topic.unwrap_or_else(|| config.bridge.topic.clone());
    let endpoint = Endpoint::parse(&config.bridge.endpoint)?;

    let backoff = BackoffPolicy {
        initial: Duration::from_millis(config.backoff.initial_delay_ms),
        max: Duration::from_millis(config.backoff.max_delay_ms),
        max_attempts: config.backoff.max_attempts,
        jitter: config.backoff.jitter,
    };

    let mut options = BridgeOptions::new(endpoint.clone(), topic.clone(), config.bridge.identity.clone())
        .backoff(backoff)
        .retry_count(config.bridge.retry_count)
        .outlet_capacity(config.bridge.outlet_capacity);
    if let Some(limit) = config.bridge.message_limit {
        options = options.message_limit(limit);
    }
    if let Some(ms) = config.bridge.idle_timeout_ms {
        options = options.idle_timeout(Duration::from_millis(ms));
    }

    info!("Starting trestled on {} (topic {})", endpoint, topic);

    let broker = MemoryBroker::new();

    // Loopback producer: every stdin line becomes a message on the
    // subscribed topic.
    let publisher = broker.clone();
    let publish_topic = topic.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let sequence = publisher.publish(&publish_topic, line);
            debug!("published sequence {} to {}", sequence, publish_topic);
        }
        info!("stdin closed, no further messages will be published");
    });

    let transport: Arc<MemoryBroker> = Arc::new(broker);
    let summary = match config.sink.kind {
        SinkKind::Stdout => {
            let (pump, receivers) = DeliveryPump::new(transport, options, StdoutSink::new())?;
            spawn_outlet_drains(receivers);
            pump.run(signal::ctrl_c()).await?
        }
        SinkKind::File => {
            let path = config
                .sink
                .path
                .as_deref()
                .ok_or("sink.path is required when sink.kind is \"file\"")?;
            let (pump, receivers) =
                DeliveryPump::new(transport, options, FileSink::open(path).await?)?;
            spawn_outlet_drains(receivers);
            pump.run(signal::ctrl_c()).await?
        }
    };

    report(&summary);
    Ok(())
}

/// Drain both outlets into the log, so every delivered and every failed
/// unit stays observable.
fn spawn_outlet_drains(receivers: OutletReceivers) {
    let OutletReceivers {
        mut success,
        mut failure,
    } = receivers;

    tokio::spawn(async move {
        while let Some(unit) = success.recv().await {
            debug!(
                topic = %unit.topic,
                sequence = unit.sequence,
                bytes = unit.payload.len(),
                "unit delivered"
            );
        }
    });

    tokio::spawn(async move {
        while let Some(failed) = failure.recv().await {
            warn!(
                topic = %failed.unit.topic,
                sequence = failed.unit.sequence,
                class = %failed.class,
                reason = %failed.reason,
                "unit routed to failure outlet"
            );
        }
    });
}

fn report(summary: &PumpSummary) {
    info!(
        delivered = summary.delivered,
        failed = summary.failed,
        reconnects = summary.reconnects,
        "trestled stopped"
    );
}
