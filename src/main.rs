use anyhow::Context;
use api_client::{Backoff, HeadConnector, JsonRpcClient};
use clap::Parser;
use configuration::{load_config, CliArgs, Settings};
use engine::{BlockCursor, ChainHeadMonitor, SyntheticMetrics, TelemetryProducer};
use events::EnvelopeSink;
use std::sync::Arc;
use web_server::{AppState, BroadcastHub};

/// The main entry point for the blockpulse telemetry broadcaster.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file, if there is one.
    dotenvy::dotenv().ok();

    let cli = CliArgs::parse();
    let mut settings = load_config(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    cli.apply(&mut settings);
    settings.validate()?;

    // Held until exit so the file appender flushes.
    let _log_guard = configuration::init_tracing(&settings.logging)?;

    run(settings).await
}

/// Wires the hub, both producers and the server, then waits for Ctrl-C.
async fn run(settings: Settings) -> anyhow::Result<()> {
    let hub = Arc::new(BroadcastHub::new());
    let sink: Arc<dyn EnvelopeSink> = hub.clone();
    let cursor = Arc::new(BlockCursor::new());

    // --- Chain Head Monitor ---
    let chain = Arc::new(JsonRpcClient::new(settings.upstream.http_url.as_str())?);
    let connector = HeadConnector::new(
        &settings.upstream.ws_url,
        Backoff::new(
            settings.upstream.reconnect_initial(),
            settings.upstream.reconnect_max(),
        ),
    )?;
    let heads = connector.subscribe_new_heads();
    let monitor = ChainHeadMonitor::new(
        chain,
        Arc::clone(&sink),
        Arc::clone(&cursor),
        settings.upstream.request_timeout(),
    );
    let monitor_task = tokio::spawn(monitor.run(heads));

    // --- Telemetry Producer ---
    let telemetry_task = if settings.telemetry.enabled {
        let source = Arc::new(SyntheticMetrics::new(settings.telemetry.synthetic_step));
        let producer = TelemetryProducer::new(settings.telemetry.clone(), source, Arc::clone(&sink));
        Some(tokio::spawn(producer.start()))
    } else {
        tracing::info!("Telemetry producer disabled.");
        None
    };

    // --- Web Server ---
    let state = Arc::new(AppState {
        hub,
        cursor,
        hub_settings: settings.hub.clone(),
    });
    let listener = web_server::bind(settings.server.bind_addr).await?;
    tracing::info!(
        upstream_ws = %settings.upstream.ws_url,
        upstream_http = %settings.upstream.http_url,
        "blockpulse started."
    );

    let result = web_server::serve(listener, state, shutdown_signal()).await;

    monitor_task.abort();
    if let Some(task) = telemetry_task {
        task.abort();
    }
    tracing::info!("blockpulse stopped.");
    Ok(result?)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C. Shutting down.");
        return;
    }
    tracing::info!("Shutdown signal received.");
}
