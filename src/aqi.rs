//! PM2.5 to Air Quality Index conversion.
//!
//! Uses the US EPA PM2.5 breakpoint table and its piecewise-linear formula:
//!
//! ```text
//! AQI = (I_hi - I_lo) / (C_hi - C_lo) * (C - C_lo) + I_lo
//! ```
//!
//! Concentrations are truncated to one decimal place before lookup, as the
//! EPA reporting guidance prescribes, so the gaps between table rows
//! (e.g. 12.0 / 12.1) are never hit. Results may be checked against
//! <https://www.airnow.gov/aqi/aqi-calculator-concentration/>.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AqiError;

// ---

/// `(C_lo, C_hi, I_lo, I_hi)` rows for 24-hour PM2.5 in µg/m³.
const PM25_BREAKPOINTS: [(f64, f64, u16, u16); 7] = [
    (0.0, 12.0, 0, 50),       // Good
    (12.1, 35.4, 51, 100),    // Moderate
    (35.5, 55.4, 101, 150),   // Unhealthy for Sensitive Groups
    (55.5, 150.4, 151, 200),  // Unhealthy
    (150.5, 250.4, 201, 300), // Very Unhealthy
    (250.5, 350.4, 301, 400), // Hazardous
    (350.5, 500.4, 401, 500), // Hazardous
];

/// Highest concentration covered by the table.
pub const PM25_MAX: f64 = 500.4;

/// Highest AQI the table produces.
pub const AQI_MAX: u16 = 500;

const EPSILON: f64 = 1e-9;

/// What to do with a concentration above the top breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutOfRangePolicy {
    /// Fail with [`AqiError::OutOfRange`].
    #[default]
    Reject,
    /// Report [`AQI_MAX`].
    Clamp,
}

impl FromStr for OutOfRangePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(OutOfRangePolicy::Reject),
            "clamp" => Ok(OutOfRangePolicy::Clamp),
            other => Err(format!("unknown out-of-range policy '{other}'")),
        }
    }
}

/// Calculate the AQI for a PM2.5 concentration.
///
/// Negative, non-finite, and above-table concentrations fail with
/// [`AqiError::OutOfRange`].
///
/// # Examples
///
/// ```
/// use aqi_surface::aqi::pm25_to_aqi;
///
/// assert_eq!(pm25_to_aqi(12.0), Ok(50));
/// assert_eq!(pm25_to_aqi(35.4), Ok(100));
/// assert!(pm25_to_aqi(-0.5).is_err());
/// ```
pub fn pm25_to_aqi(pm25: f64) -> Result<u16, AqiError> {
    // ---
    let out_of_range = AqiError::OutOfRange {
        concentration: pm25,
    };
    if !pm25.is_finite() || pm25 < 0.0 {
        return Err(out_of_range);
    }

    let c = truncate_tenths(pm25);
    for (c_lo, c_hi, i_lo, i_hi) in PM25_BREAKPOINTS {
        if c >= c_lo - EPSILON && c <= c_hi + EPSILON {
            let aqi = (f64::from(i_hi - i_lo) / (c_hi - c_lo)) * (c - c_lo) + f64::from(i_lo);
            return Ok(aqi.round().clamp(f64::from(i_lo), f64::from(i_hi)) as u16);
        }
    }

    Err(out_of_range)
}

fn truncate_tenths(c: f64) -> f64 {
    (c * 10.0 + EPSILON).floor() / 10.0
}

/// AQI conversion with a configured out-of-range policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct AqiCalculator {
    policy: OutOfRangePolicy,
}

impl AqiCalculator {
    pub fn new(policy: OutOfRangePolicy) -> Self {
        AqiCalculator { policy }
    }

    pub fn policy(&self) -> OutOfRangePolicy {
        self.policy
    }

    /// Convert a PM2.5 concentration, honoring the out-of-range policy for
    /// concentrations above the table. Negative or non-finite input is
    /// always rejected.
    pub fn aqi(&self, pm25: f64) -> Result<u16, AqiError> {
        // ---
        match pm25_to_aqi(pm25) {
            Err(_) if self.policy == OutOfRangePolicy::Clamp && pm25 > PM25_MAX => Ok(AQI_MAX),
            other => other,
        }
    }
}

/// EPA AQI category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AqiCategory {
    Good,
    Moderate,
    UnhealthyForSensitiveGroups,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
}

impl AqiCategory {
    pub fn from_aqi(aqi: u16) -> Self {
        // ---
        match aqi {
            0..=50 => AqiCategory::Good,
            51..=100 => AqiCategory::Moderate,
            101..=150 => AqiCategory::UnhealthyForSensitiveGroups,
            151..=200 => AqiCategory::Unhealthy,
            201..=300 => AqiCategory::VeryUnhealthy,
            _ => AqiCategory::Hazardous,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AqiCategory::Good => "Good",
            AqiCategory::Moderate => "Moderate",
            AqiCategory::UnhealthyForSensitiveGroups => "Unhealthy for Sensitive Groups",
            AqiCategory::Unhealthy => "Unhealthy",
            AqiCategory::VeryUnhealthy => "Very Unhealthy",
            AqiCategory::Hazardous => "Hazardous",
        }
    }

    /// EPA colour name for map legends.
    pub fn color(&self) -> &'static str {
        match self {
            AqiCategory::Good => "green",
            AqiCategory::Moderate => "yellow",
            AqiCategory::UnhealthyForSensitiveGroups => "orange",
            AqiCategory::Unhealthy => "red",
            AqiCategory::VeryUnhealthy => "purple",
            AqiCategory::Hazardous => "maroon",
        }
    }

    /// Short health advisory.
    pub fn advisory(&self) -> &'static str {
        match self {
            AqiCategory::Good => "Air quality is satisfactory. No health risks.",
            AqiCategory::Moderate => {
                "Air quality acceptable. Sensitive groups may notice minor effects."
            }
            AqiCategory::UnhealthyForSensitiveGroups => {
                "Reduce outdoor activity for children, elderly, and those with respiratory issues."
            }
            AqiCategory::Unhealthy => "Potential health effects for everyone. Limit outdoor time.",
            AqiCategory::VeryUnhealthy => {
                "Health alert: everyone may experience more serious effects. Avoid outdoor exertion."
            }
            AqiCategory::Hazardous => "Emergency conditions. Everyone should stay indoors.",
        }
    }
}
