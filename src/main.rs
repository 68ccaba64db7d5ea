//! # pulse
//!
//! Relay binary: consumes the value topic and serves it to SSE viewers.
//! `pulse produce` publishes synthetic readings for local testing.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use pulse_bus::{BusConnector, BusProducer, DemoFeed, MemoryBus};
use pulse_core::WireFormat;
use pulse_settings::{BusSettings, BusSource, PulseSettings};
use pulse_telemetry::{init_telemetry, install_metrics_recorder, TelemetryConfig};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// SSE relay for bus events.
#[derive(Parser, Debug)]
#[command(name = "pulse", version, about = "Relay bus events to Server-Sent Events viewers")]
struct Cli {
    /// Settings file (defaults to `~/.pulse/settings.json`).
    #[arg(long, global = true, env = "PULSE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay (default).
    Serve(ServeArgs),
    /// Publish random readings to the Kafka topic.
    Produce(ProduceArgs),
}

#[derive(Args, Debug, Default)]
struct BusArgs {
    /// Comma-separated Kafka bootstrap servers.
    #[arg(long)]
    brokers: Option<String>,

    /// Topic carrying value events.
    #[arg(long)]
    topic: Option<String>,
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Address to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Event source: `kafka` (the default; needs a build with `--features
    /// kafka`) or `demo` (in-process feed, always available).
    #[arg(long, value_parser = parse_source)]
    source: Option<BusSource>,

    /// Payload shape sent to viewers: `canonical` or `legacy`.
    #[arg(long)]
    wire_format: Option<WireFormat>,

    #[command(flatten)]
    bus: BusArgs,
}

#[derive(Args, Debug, Default)]
struct ProduceArgs {
    /// Stop after this many records.
    #[arg(long)]
    count: Option<u64>,

    /// Milliseconds between records.
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Comma-separated subjects to pick from.
    #[arg(long, value_delimiter = ',')]
    subjects: Option<Vec<String>>,

    #[command(flatten)]
    bus: BusArgs,
}

fn parse_source(s: &str) -> std::result::Result<BusSource, String> {
    BusSource::parse(s).ok_or_else(|| format!("unknown source {s:?} (expected \"kafka\" or \"demo\")"))
}

impl BusArgs {
    fn apply(&self, bus: &mut BusSettings) {
        if let Some(brokers) = &self.brokers {
            bus.brokers.clone_from(brokers);
        }
        if let Some(topic) = &self.topic {
            bus.topic.clone_from(topic);
        }
    }
}

impl Command {
    /// CLI flags are the last settings layer.
    fn apply(&self, settings: &mut PulseSettings) {
        match self {
            Self::Serve(args) => {
                if let Some(host) = &args.host {
                    settings.server.host.clone_from(host);
                }
                if let Some(port) = args.port {
                    settings.server.port = port;
                }
                if let Some(source) = args.source {
                    settings.bus.source = source;
                }
                if let Some(format) = args.wire_format {
                    settings.server.wire_format = format;
                }
                args.bus.apply(&mut settings.bus);
            }
            Self::Produce(args) => {
                if let Some(interval) = args.interval_ms {
                    settings.demo.interval_ms = interval;
                }
                if let Some(subjects) = &args.subjects {
                    settings.demo.subjects.clone_from(subjects);
                }
                args.bus.apply(&mut settings.bus);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => pulse_settings::load_settings_from_path(path),
        None => pulse_settings::load_settings(),
    }
    .context("failed to load settings")?;

    let command = cli.command.unwrap_or_else(|| Command::Serve(ServeArgs::default()));
    command.apply(&mut settings);
    settings.validate().context("invalid configuration")?;

    let _ = init_telemetry(&TelemetryConfig::from(&settings.logging));

    match command {
        Command::Serve(_) => serve(settings).await,
        Command::Produce(args) => produce(settings, args.count).await,
    }
}

async fn serve(settings: PulseSettings) -> Result<()> {
    let metrics = if settings.server.metrics_enabled {
        Some(install_metrics_recorder()?)
    } else {
        None
    };

    let feed_cancel = CancellationToken::new();
    let mut feed_task = None;
    let connector: Arc<dyn BusConnector> = match settings.bus.source {
        BusSource::Demo => {
            let bus = MemoryBus::new(settings.bus.topic.clone(), 1);
            let feed = DemoFeed::new(Arc::new(bus.clone()), &settings.demo);
            feed_task = Some(tokio::spawn(feed.run(feed_cancel.clone())));
            Arc::new(bus.connector(settings.bus.group_id.clone(), settings.bus.from_beginning))
        }
        BusSource::Kafka => kafka_connector(&settings.bus)?,
    };

    let handle = pulse_server::start(&settings, connector, metrics)
        .await
        .context("failed to start relay")?;
    info!(port = handle.port(), "pulse ready");

    wait_for_signal().await;

    feed_cancel.cancel();
    if let Some(task) = feed_task {
        let _ = task.await;
    }
    handle.shutdown().await;
    Ok(())
}

async fn produce(settings: PulseSettings, count: Option<u64>) -> Result<()> {
    let producer = kafka_producer(&settings.bus)?;
    let mut feed = DemoFeed::new(producer, &settings.demo);
    if let Some(count) = count {
        feed = feed.with_limit(count);
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    let _signal = tokio::spawn(async move {
        wait_for_signal().await;
        on_signal.cancel();
    });

    info!(
        brokers = %settings.bus.brokers,
        topic = %settings.bus.topic,
        interval_ms = settings.demo.interval_ms,
        "producing demo readings"
    );
    let published = feed.run(cancel).await;
    info!(published, "producer finished");
    Ok(())
}

#[cfg(feature = "kafka")]
fn kafka_connector(bus: &BusSettings) -> Result<Arc<dyn BusConnector>> {
    let connector = pulse_bus::kafka::KafkaConnector::new(bus.clone())
        .context("invalid Kafka consumer configuration")?;
    Ok(Arc::new(connector))
}

#[cfg(not(feature = "kafka"))]
fn kafka_connector(_bus: &BusSettings) -> Result<Arc<dyn BusConnector>> {
    anyhow::bail!(
        "bus source is `kafka` but this build has no Kafka support; \
         run with `--source demo` (or PULSE_SOURCE=demo), or rebuild with `--features kafka`"
    )
}

#[cfg(feature = "kafka")]
fn kafka_producer(bus: &BusSettings) -> Result<Arc<dyn BusProducer>> {
    let producer =
        pulse_bus::kafka::KafkaProducer::new(bus).context("invalid Kafka producer configuration")?;
    Ok(Arc::new(producer))
}

#[cfg(not(feature = "kafka"))]
fn kafka_producer(_bus: &BusSettings) -> Result<Arc<dyn BusProducer>> {
    anyhow::bail!("`pulse produce` needs Kafka support; rebuild with `--features kafka`")
}

/// Resolves on Ctrl-C or SIGTERM.
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                let _ = signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("shutdown signal received");
    // Second signal during a slow drain exits immediately.
    tokio::spawn(async {
        let _ = tokio::signal::ctrl_c().await;
        warn!("second interrupt, exiting");
        std::process::exit(130);
    });
}
