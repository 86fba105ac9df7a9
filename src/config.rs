//! Configuration loader for the `aqi-surface` service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). Parsing goes through a lookup closure so the same
//! code serves the real environment and tests.
//!
use std::{env, net::SocketAddr, time::Duration};

use anyhow::{anyhow, bail, Result};

use crate::{
    aqi::OutOfRangePolicy,
    fetcher::DEFAULT_BASE_URL,
    interpolate::{GridResolution, DEFAULT_POWER, MAX_POWER},
    models::BoundingBox,
    scheduler::SchedulerSettings,
};

/// Parse an optional environment variable with a default value.
macro_rules! parse_env {
    ($lookup:expr, $var_name:expr, $default:expr) => {
        match $lookup($var_name) {
            Some(v) => v
                .trim()
                .parse()
                .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?,
            None => $default,
        }
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($lookup:expr, $var_name:expr) => {
        $lookup($var_name)
            .filter(|v: &String| !v.trim().is_empty())
            .ok_or_else(|| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Predefined map regions, `(name, min_lon, min_lat, max_lon, max_lat)`.
pub const REGIONS: [(&str, f64, f64, f64, f64); 4] = [
    ("london", -0.5, 51.3, 0.3, 51.7),
    ("delhi", 76.8, 28.4, 77.4, 28.9),
    ("new-york", -74.3, 40.5, -73.7, 40.9),
    ("houston", -95.8, 29.5, -95.0, 30.0),
];

pub const DEFAULT_REGION: &str = "london";

/// Look up a predefined region by name (case-insensitive).
pub fn region(name: &str) -> Option<BoundingBox> {
    // ---
    let name = name.trim().to_ascii_lowercase();
    REGIONS
        .iter()
        .find(|(n, ..)| *n == name)
        .and_then(|(_, a, b, c, d)| BoundingBox::new(*a, *b, *c, *d).ok())
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// OpenAQ API key, sent as `X-API-Key`.
    pub api_key: String,

    /// Station data API base URL.
    pub api_url: String,

    /// Region name for display, `custom` when `AQI_BBOX` is set.
    pub region_name: String,

    /// Map extent stations are fetched for.
    pub region: BoundingBox,

    /// Maximum number of stations per fetch.
    pub fetch_limit: usize,

    /// Delay between a rendered cycle and the next fetch.
    pub refresh_interval: Duration,

    /// Delay between a failed cycle and the retry.
    pub retry_backoff: Duration,

    /// Per-request HTTP timeout.
    pub http_timeout: Duration,

    pub grid_resolution: GridResolution,

    /// Inverse-distance exponent.
    pub idw_power: f64,

    pub out_of_range: OutOfRangePolicy,

    /// HTTP bind address for the presenter routes.
    pub listen_addr: SocketAddr,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `OPENAQ_API_KEY` – OpenAQ API key
///
/// Optional:
/// - `OPENAQ_BASE_URL` – API root (default: `https://api.openaq.org/v3`)
/// - `AQI_REGION` – london | delhi | new-york | houston (default: london)
/// - `AQI_BBOX` – `min_lon,min_lat,max_lon,max_lat`, overrides `AQI_REGION`
/// - `AQI_FETCH_LIMIT` – max stations per fetch (default: 1000)
/// - `AQI_REFRESH_SECS` – refresh interval (default: 300)
/// - `AQI_RETRY_BACKOFF_SECS` – retry delay after a failure, at least 1 (default: 30)
/// - `AQI_HTTP_TIMEOUT_SECS` – request timeout (default: 10)
/// - `AQI_GRID_RESOLUTION` – degrees per cell or `auto` (default: auto)
/// - `AQI_IDW_POWER` – IDW exponent, at most 10 (default: 2.0)
/// - `AQI_OUT_OF_RANGE` – reject | clamp (default: reject)
/// - `AQI_LISTEN_ADDR` – bind address (default: 0.0.0.0:8080)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    load_from(|name| env::var(name).ok())
}

/// Load configuration through an arbitrary variable lookup.
pub fn load_from<L>(lookup: L) -> Result<Config>
where
    L: Fn(&str) -> Option<String>,
{
    // ---
    let api_key = require_env!(lookup, "OPENAQ_API_KEY");
    let api_url = parse_env!(lookup, "OPENAQ_BASE_URL", DEFAULT_BASE_URL.to_string());

    let (region_name, region) = match lookup("AQI_BBOX") {
        Some(bbox) => {
            let bbox: BoundingBox = bbox.parse().map_err(|e| anyhow!("Invalid AQI_BBOX: {e}"))?;
            ("custom".to_string(), bbox)
        }
        None => {
            let name = lookup("AQI_REGION").unwrap_or_else(|| DEFAULT_REGION.to_string());
            let bbox = region(&name).ok_or_else(|| {
                let known: Vec<&str> = REGIONS.iter().map(|(n, ..)| *n).collect();
                anyhow!("Invalid AQI_REGION '{}', expected one of {:?}", name, known)
            })?;
            (name.trim().to_ascii_lowercase(), bbox)
        }
    };

    let fetch_limit: usize = parse_env!(lookup, "AQI_FETCH_LIMIT", 1000);
    let refresh_secs: u64 = parse_env!(lookup, "AQI_REFRESH_SECS", 300);
    let retry_secs: u64 = parse_env!(lookup, "AQI_RETRY_BACKOFF_SECS", 30);
    let timeout_secs: u64 = parse_env!(lookup, "AQI_HTTP_TIMEOUT_SECS", 10);
    let grid_resolution: GridResolution =
        parse_env!(lookup, "AQI_GRID_RESOLUTION", GridResolution::Auto);
    let idw_power: f64 = parse_env!(lookup, "AQI_IDW_POWER", DEFAULT_POWER);
    let out_of_range: OutOfRangePolicy =
        parse_env!(lookup, "AQI_OUT_OF_RANGE", OutOfRangePolicy::Reject);
    let listen_addr: SocketAddr =
        parse_env!(lookup, "AQI_LISTEN_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)));

    if fetch_limit == 0 {
        bail!("Invalid AQI_FETCH_LIMIT: must be at least 1");
    }
    if refresh_secs == 0 || retry_secs == 0 || timeout_secs == 0 {
        bail!(
            "Invalid AQI_REFRESH_SECS / AQI_RETRY_BACKOFF_SECS / AQI_HTTP_TIMEOUT_SECS: \
             must be at least 1"
        );
    }
    if !idw_power.is_finite() || idw_power <= 0.0 || idw_power > MAX_POWER {
        bail!(
            "Invalid AQI_IDW_POWER: must be in (0, {}], got {}",
            MAX_POWER,
            idw_power
        );
    }

    Ok(Config {
        api_key,
        api_url,
        region_name,
        region,
        fetch_limit,
        refresh_interval: Duration::from_secs(refresh_secs),
        retry_backoff: Duration::from_secs(retry_secs),
        http_timeout: Duration::from_secs(timeout_secs),
        grid_resolution,
        idw_power,
        out_of_range,
        listen_addr,
    })
}

impl Config {
    /// Settings handed to the refresh scheduler.
    pub fn scheduler_settings(&self) -> SchedulerSettings {
        // ---
        SchedulerSettings {
            region: self.region,
            fetch_limit: self.fetch_limit,
            resolution: self.grid_resolution,
            refresh_interval: self.refresh_interval,
            retry_backoff: self.retry_backoff,
        }
    }

    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks the API key while showing all configuration values that were
    /// loaded.
    pub fn log_config(&self) {
        // ---
        let masked_key = match self.api_key.get(..4) {
            Some(prefix) if self.api_key.len() > 8 => format!("{prefix}****"),
            _ => "****".to_string(),
        };

        tracing::info!("Configuration loaded:");
        tracing::info!("  OPENAQ_API_KEY      : {}", masked_key);
        tracing::info!("  OPENAQ_BASE_URL     : {}", self.api_url);
        tracing::info!("  AQI_REGION          : {} ({})", self.region_name, self.region);
        tracing::info!("  AQI_FETCH_LIMIT     : {}", self.fetch_limit);
        tracing::info!("  AQI_REFRESH_SECS    : {}", self.refresh_interval.as_secs());
        tracing::info!("  AQI_RETRY_BACKOFF   : {}", self.retry_backoff.as_secs());
        tracing::info!("  AQI_HTTP_TIMEOUT    : {}", self.http_timeout.as_secs());
        tracing::info!(
            "  AQI_GRID_RESOLUTION : {:?} -> {}",
            self.grid_resolution,
            self.grid_resolution.resolve(&self.region)
        );
        tracing::info!("  AQI_IDW_POWER       : {}", self.idw_power);
        tracing::info!("  AQI_OUT_OF_RANGE    : {:?}", self.out_of_range);
        tracing::info!("  AQI_LISTEN_ADDR     : {}", self.listen_addr);
    }
}
