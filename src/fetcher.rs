//! Station data retrieval from the OpenAQ v3 API.
//!
//! One request per refresh cycle: `GET {base}/parameters/2/latest` returns the
//! latest PM2.5 measurement of every sensor, which is then narrowed down to
//! the configured bounding box.

use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::{
    error::FetchError,
    models::{BoundingBox, RawLatest, StationReading},
};

// ---

/// OpenAQ parameter id for PM2.5.
pub const PM25_PARAMETER_ID: u32 = 2;

pub const DEFAULT_BASE_URL: &str = "https://api.openaq.org/v3";

/// Source of current station measurements.
#[async_trait]
pub trait StationReadingFetcher: Send + Sync {
    /// Latest reading of each station inside `bbox`, ordered by station id,
    /// at most `limit` of them.
    async fn fetch(
        &self,
        bbox: &BoundingBox,
        limit: usize,
    ) -> Result<Vec<StationReading>, FetchError>;
}

/// Async client for the OpenAQ `latest` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAqFetcher {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OpenAqFetcher {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> reqwest::Result<Self> {
        // ---
        let client = Client::builder().timeout(timeout).build()?;
        Ok(OpenAqFetcher {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl StationReadingFetcher for OpenAqFetcher {
    async fn fetch(
        &self,
        bbox: &BoundingBox,
        limit: usize,
    ) -> Result<Vec<StationReading>, FetchError> {
        // ---
        let url = format!(
            "{}/parameters/{}/latest",
            self.base_url, PM25_PARAMETER_ID
        );
        debug!("Fetching latest PM2.5 from {} (limit {})", url, limit);

        let response = self
            .client
            .get(&url)
            .header("X-API-Key", &self.api_key)
            .query(&[("limit", limit)])
            .send()
            .await
            .map_err(|e| {
                warn!("Request to {} failed: {}", url, e);
                FetchError::Network(e.to_string())
            })?;

        let response = response.error_for_status().map_err(|e| {
            let status = e.status().unwrap_or_default();
            warn!("Request to {} returned status {}", url, status);
            FetchError::Network(format!("{url} returned status {status}"))
        })?;

        let body = response.text().await?;
        let readings = parse_latest(&body, bbox, limit)?;

        info!(
            "Fetched {} stations inside {} from {}",
            readings.len(),
            bbox,
            self.base_url
        );
        Ok(readings)
    }
}

/// Decode a `latest` response body into readings.
///
/// Individual records without a usable location or value are dropped. The
/// response as a whole is rejected when `results` is missing, or when it is
/// non-empty and not a single record decodes.
pub fn parse_latest(
    body: &str,
    bbox: &BoundingBox,
    limit: usize,
) -> Result<Vec<StationReading>, FetchError> {
    // ---
    let response: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| FetchError::DataFormat(format!("response is not JSON: {e}")))?;

    let results = response
        .get("results")
        .and_then(|r| r.as_array())
        .ok_or_else(|| FetchError::DataFormat("response missing 'results' array".into()))?;

    let mut decoded = 0usize;
    let mut latest: BTreeMap<String, StationReading> = BTreeMap::new();

    for (i, item) in results.iter().enumerate() {
        let raw = match serde_json::from_value::<RawLatest>(item.clone()) {
            Ok(raw) => raw,
            Err(e) => {
                debug!("Failed to parse record {}: {} - Raw item: {}", i, e, item);
                continue;
            }
        };
        decoded += 1;

        let Some(reading) = raw.to_reading() else {
            continue;
        };
        if !bbox.contains(reading.latitude, reading.longitude) {
            continue;
        }

        // Several sensors may share a location; keep the freshest
        match latest.get(&reading.station_id) {
            Some(existing) if existing.timestamp >= reading.timestamp => {}
            _ => {
                latest.insert(reading.station_id.clone(), reading);
            }
        }
    }

    if !results.is_empty() && decoded == 0 {
        return Err(FetchError::DataFormat(format!(
            "none of {} records could be decoded",
            results.len()
        )));
    }

    debug!(
        "Decoded {}/{} records, {} stations in range",
        decoded,
        results.len(),
        latest.len()
    );
    Ok(latest.into_values().take(limit).collect())
}
