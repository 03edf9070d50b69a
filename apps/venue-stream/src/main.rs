//! Venue Stream Runner
//!
//! Connects to the configured venue, subscribes to the configured
//! subscriptions and logs canonical events until shutdown.
//!
//! # Usage
//!
//! ```bash
//! STREAM_SUBSCRIPTIONS="price:BTC/USDT,candle:ETH/USDT:1m" cargo run --bin venue-stream
//! ```
//!
//! # Environment Variables
//!
//! - `VENUE_ID`, `VENUE_WS_URL`, `VENUE_REST_URL`, `VENUE_NATIVE_CANDLES`
//! - `STREAM_SUBSCRIPTIONS`: comma list of `price:BASE/QUOTE` or
//!   `candle:BASE/QUOTE:<interval>`
//! - `STREAM_*`: heartbeat, request timeout and retry tuning
//! - `STREAM_METRICS_PORT`: Prometheus exporter port (default: 0, disabled)
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`
//! - `RUST_LOG`: Log filter (default: `venue_stream=info`)

use std::net::SocketAddr;

use anyhow::Context;
use chrono::{DateTime, Utc};
use tokio::signal;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use venue_stream::infrastructure::telemetry;
use venue_stream::{
    StreamConfig, StreamEvent, SymbolRegistry, TimestampMs, VenueClient, init_metrics,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init()?;

    tracing::info!("Starting venue stream");

    let config = StreamConfig::from_env()?;
    log_config(&config);

    if config.metrics_port != 0 {
        init_metrics(SocketAddr::from(([0, 0, 0, 0], config.metrics_port)))
            .context("failed to start Prometheus exporter")?;
    }

    let registry = SymbolRegistry::new(config.symbol_cache_ttl);
    let client = VenueClient::binance(&config, &registry)?;

    let shutdown_token = CancellationToken::new();
    let events = tokio::spawn(log_events(client.events(), shutdown_token.clone()));

    client.open().await?;

    for subscription in &config.subscriptions {
        match client.subscribe_to(subscription).await {
            Ok(()) => tracing::info!(%subscription, "Subscribed"),
            Err(e) => tracing::error!(%subscription, error = %e, "Subscription failed"),
        }
    }

    tracing::info!(subscriptions = config.subscriptions.len(), "Venue stream ready");

    await_shutdown(&shutdown_token).await?;

    client.close().await;
    let _ = events.await;

    tracing::info!("Venue stream stopped");
    Ok(())
}

/// Log canonical events until cancelled or the channel closes.
async fn log_events(mut events: broadcast::Receiver<StreamEvent>, shutdown: CancellationToken) {
    loop {
        let event = tokio::select! {
            () = shutdown.cancelled() => return,
            event = events.recv() => event,
        };

        match event {
            Ok(StreamEvent::NewPrice(price)) => {
                tracing::info!(
                    symbol = %price.symbol,
                    price = %price.price,
                    time = %format_ms(price.timestamp),
                    "Price"
                );
            }
            Ok(StreamEvent::Candle(candle)) => {
                tracing::info!(
                    symbol = %candle.symbol,
                    interval = %candle.interval,
                    open_time = %format_ms(candle.timestamp),
                    open = %candle.open,
                    high = %candle.high,
                    low = %candle.low,
                    close = %candle.close,
                    volume = %candle.volume,
                    closed = ?candle.is_closed,
                    "Candle"
                );
            }
            Ok(StreamEvent::Payload(raw)) => tracing::trace!(%raw, "Payload"),
            Ok(StreamEvent::Error(fault)) => tracing::warn!(error = %fault, "Stream fault"),
            Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "Event logger lagged"),
            Err(RecvError::Closed) => return,
        }
    }
}

/// Render venue milliseconds as RFC 3339, or the raw value if out of range.
fn format_ms(ms: TimestampMs) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms).map_or_else(|| ms.to_string(), |t| t.to_rfc3339())
}

/// Log the parsed configuration.
fn log_config(config: &StreamConfig) {
    tracing::info!(
        venue = %config.venue.id,
        native_candles = config.venue.native_candles,
        subscriptions = config.subscriptions.len(),
        metrics_port = config.metrics_port,
        "Configuration loaded"
    );
    tracing::debug!(
        ws_url = %config.venue.ws_url,
        rest_url = %config.venue.rest_url,
        "Venue endpoints"
    );
}

/// Load .env from the current directory or the nearest ancestor holding one.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        for dir in cwd.ancestors().skip(1) {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
        }
    }
}

/// Wait for Ctrl+C or SIGTERM, then cancel `shutdown`.
async fn await_shutdown(shutdown: &CancellationToken) -> anyhow::Result<()> {
    #[cfg(unix)]
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("failed to install SIGTERM handler")?;

    #[cfg(unix)]
    let terminate = terminate.recv();

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<()>>();

    tokio::select! {
        result = signal::ctrl_c() => {
            result.context("failed to listen for Ctrl+C")?;
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown.cancel();
    Ok(())
}
