//! Prometheus exporter for MQTT topics.

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tokio::sync::watch;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

use mqtt2prometheus::config::{LogFormat, Overrides};
use mqtt2prometheus::{
    BrokerLabels, ExporterConfig, HttpServer, IngestWorker, MqttSubscriber, Renderer, SampleStore,
    message_channel,
};

/// Prometheus exporter for MQTT topics.
#[derive(Parser, Debug)]
#[command(name = "mqtt2prometheus")]
#[command(about = "Export the latest value of every MQTT topic as Prometheus gauges")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// MQTT broker host.
    #[arg(long, env = "MQTT_HOST")]
    mqtt_host: Option<String>,

    /// MQTT broker port.
    #[arg(long, env = "MQTT_PORT")]
    mqtt_port: Option<u16>,

    /// Seconds after which a silent topic is dropped.
    #[arg(long, env = "TIMEOUT")]
    timeout: Option<u64>,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        ExporterConfig::load_from_file(config_path)?
    } else {
        ExporterConfig::default()
    };

    config.apply_overrides(Overrides {
        mqtt_host: args.mqtt_host,
        mqtt_port: args.mqtt_port,
        timeout_secs: args.timeout,
        listen: args.listen,
        log_level: args.log_level,
    })?;

    // Initialize logging
    let log_level = config.logging.level.parse().unwrap_or(Level::INFO);
    let filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(format!(
            "mqtt2prometheus={},rumqttc={}",
            log_level,
            Level::WARN
        ))
    })?;

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }

    info!(
        mqtt_host = %config.mqtt.host,
        mqtt_port = config.mqtt.port,
        timeout_secs = config.staleness.timeout_secs,
        "Starting MQTT Prometheus Exporter"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let store = Arc::new(SampleStore::new());
    let window = config.staleness.window();

    let renderer = Arc::new(Renderer::new(
        store.clone(),
        BrokerLabels {
            host: config.mqtt.host.clone(),
            port: config.mqtt.port,
        },
        window,
    ));

    // Parse listen address
    let listen_addr = config
        .prometheus
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

    // Create components
    let (message_tx, message_rx) = message_channel();
    let subscriber = MqttSubscriber::new(config.mqtt.clone(), message_tx);
    let worker = Arc::new(IngestWorker::new(store.clone()));
    let http_server = HttpServer::new(renderer, listen_addr, config.prometheus.path.clone());

    // Start staleness sweep
    let sweep_store = store.clone();
    let sweep_interval = Duration::from_secs(config.staleness.sweep_interval_secs);
    let mut sweep_shutdown = shutdown_rx.clone();

    let sweep_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    sweep_store.evict_stale(Instant::now(), window);
                }
                changed = sweep_shutdown.changed() => {
                    if changed.is_err() || *sweep_shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    });

    // Start ingestion worker
    let worker_task = {
        let worker = worker.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { worker.run(message_rx, shutdown).await })
    };

    // Start subscriber
    let subscriber_shutdown = shutdown_rx.clone();
    let subscriber_task = tokio::spawn(async move {
        if let Err(e) = subscriber.run(subscriber_shutdown).await {
            error!("Subscriber error: {}", e);
        }
    });

    // Start HTTP server
    let http_shutdown = shutdown_rx.clone();
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run(http_shutdown).await {
            error!("HTTP server error: {}", e);
        }
    });

    wait_for_signal().await;

    // Signal shutdown
    shutdown_tx.send(true)?;

    // Wait for tasks to complete
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = subscriber_task.await;
        let _ = worker_task.await;
        let _ = http_task.await;
        let _ = sweep_task.await;
    })
    .await;

    // Print final stats
    let ingest = worker.stats();
    let stored = store.stats();
    info!(
        messages_received = ingest.messages_received,
        samples_accepted = ingest.samples_accepted,
        ignored_retained = ingest.ignored_retained,
        ignored_invalid_utf8 = ingest.ignored_invalid_utf8,
        ignored_structured = ingest.ignored_structured,
        ignored_unparseable = ingest.ignored_unparseable,
        evictions = stored.evictions,
        topic_count = store.len(),
        "Final statistics"
    );

    info!("Exporter stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received Ctrl+C, shutting down...");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, shutting down...");
                    }
                }
                return;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
    }
    info!("Received Ctrl+C, shutting down...");
}
