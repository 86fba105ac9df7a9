//! Application entry point for the `aqi-surface` service.
//!
//! This binary orchestrates the full startup sequence, including:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Building the OpenAQ station fetcher
//! - Spawning the refresh scheduler task
//! - Mounting all API routes via the `routes` gateway (EMBP pattern)
//! - Binding the Axum HTTP server and serving until Ctrl-C
//!
//! # Environment Variables
//! - `OPENAQ_API_KEY` (**required**) – OpenAQ API key
//! - `AQI_LOG_LEVEL` (optional) – log verbosity (default: `info`)
//! - `AQI_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! See [`aqi_surface::config`] for the remaining options.
use std::env;

use anyhow::{anyhow, Result};
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use aqi_surface::{
    config,
    routes::{self, AppState},
    AqiCalculator, DashboardView, OpenAqFetcher, RefreshHandle, RefreshScheduler,
    SpatialInterpolator,
};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let fetcher = OpenAqFetcher::new(&cfg.api_url, &cfg.api_key, cfg.http_timeout)
        .map_err(|e| anyhow!("Failed to build HTTP client: {}", e))?;

    let view = DashboardView::new();
    let refresh = RefreshHandle::new();
    let interpolator = SpatialInterpolator::new(cfg.idw_power);

    let scheduler = RefreshScheduler::new(
        fetcher,
        view.clone(),
        AqiCalculator::new(cfg.out_of_range),
        interpolator,
        cfg.scheduler_settings(),
        refresh.clone(),
    );
    let scheduler_task = tokio::spawn(scheduler.run());

    // Build app from routes gateway (EMBP)
    let app = routes::router(AppState {
        view,
        refresh,
        interpolator,
    });

    tracing::info!("Listening on {}", cfg.listen_addr);

    let listener = tokio::net::TcpListener::bind(cfg.listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler_task.abort();
    tracing::info!("shut down");
    Ok(())
}

// ---

async fn shutdown_signal() {
    // ---
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("got SIGINT, shutting down"),
        Err(e) => tracing::error!("could not listen for SIGINT: {}", e),
    }
}

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `AQI_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by `RUST_LOG`, else the `AQI_LOG_LEVEL` env var
///
/// Call once at startup before any logging.
fn init_tracing() {
    // ---
    let span_events = match env::var("AQI_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    // Determine if we should use colors
    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to AQI_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("AQI_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("{level},hyper=warn,reqwest=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
