//! Error taxonomy for the refresh pipeline.
//!
//! Every error here is recoverable: the scheduler logs it, reports it to the
//! presenter, and returns to `Idle`. Process-level plumbing (config, server
//! startup) uses `anyhow` instead.

use thiserror::Error;

// ---

/// Failure of a station-data fetch.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FetchError {
    /// Transport failure, timeout or non-success status. Transient; retried
    /// on the next scheduled tick.
    #[error("network error: {0}")]
    Network(String),

    /// The response arrived but could not be understood. Not retried within
    /// the cycle; the last-known-good surface stays on display.
    #[error("malformed station data: {0}")]
    DataFormat(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        // ---
        if e.is_decode() {
            FetchError::DataFormat(e.to_string())
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

/// A pollutant concentration outside the breakpoint table.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum AqiError {
    #[error("concentration {concentration} is outside the breakpoint table")]
    OutOfRange { concentration: f64 },
}

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum InterpolationError {
    /// No points to interpolate from.
    #[error("insufficient data: at least one station is required")]
    InsufficientData,

    #[error("grid resolution must be a positive finite number, got {0}")]
    InvalidResolution(f64),
}

/// Everything that can end a refresh cycle in `Failed`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CycleError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Interpolation(#[from] InterpolationError),
}

impl CycleError {
    /// True when the failure is expected to clear up on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, CycleError::Fetch(FetchError::Network(_)))
    }
}
