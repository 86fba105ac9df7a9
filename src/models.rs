//! Data models for the air-quality pipeline.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aqi::AqiCategory;

// ---

/// Geographic bounding box in degrees, `min_lon,min_lat,max_lon,max_lat`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    // ---
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    // ---
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Result<Self, String> {
        // ---
        let bbox = BoundingBox {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        };
        if ![min_lon, min_lat, max_lon, max_lat].iter().all(|v| v.is_finite()) {
            return Err(format!("bounding box has non-finite corner: {bbox}"));
        }
        if !(-180.0..=180.0).contains(&min_lon) || !(-180.0..=180.0).contains(&max_lon) {
            return Err(format!("longitude out of range in {bbox}"));
        }
        if !(-90.0..=90.0).contains(&min_lat) || !(-90.0..=90.0).contains(&max_lat) {
            return Err(format!("latitude out of range in {bbox}"));
        }
        if min_lon >= max_lon || min_lat >= max_lat {
            return Err(format!("bounding box is empty or inverted: {bbox}"));
        }
        Ok(bbox)
    }

    /// Inclusive on all edges.
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        // ---
        longitude >= self.min_lon
            && longitude <= self.max_lon
            && latitude >= self.min_lat
            && latitude <= self.max_lat
    }

    /// The larger of the two side lengths, in degrees.
    pub fn span(&self) -> f64 {
        (self.max_lon - self.min_lon).max(self.max_lat - self.min_lat)
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.min_lon, self.min_lat, self.max_lon, self.max_lat
        )
    }
}

impl FromStr for BoundingBox {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // ---
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("invalid bounding box '{s}': {e}"))?;

        match parts.as_slice() {
            [min_lon, min_lat, max_lon, max_lat] => {
                BoundingBox::new(*min_lon, *min_lat, *max_lon, *max_lat)
            }
            _ => Err(format!(
                "bounding box '{s}' must have 4 comma-separated values"
            )),
        }
    }
}

/// Raw `latest` record from the OpenAQ v3 API.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLatest {
    // ---
    pub datetime: RawDatetime,
    pub value: Option<f64>,
    pub coordinates: Option<RawCoordinates>,
    pub locations_id: i64,
    #[serde(default)]
    pub sensors_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RawDatetime {
    pub utc: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct RawCoordinates {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Latest PM2.5 measurement of one station. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationReading {
    // ---
    pub station_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    /// Concentration in µg/m³.
    pub pm25: f64,
}

impl RawLatest {
    // ---
    /// Convert into a reading, or `None` when the record lacks a usable
    /// location or concentration.
    pub fn to_reading(&self) -> Option<StationReading> {
        // ---
        let coords = self.coordinates.as_ref()?;
        let latitude = coords.latitude?;
        let longitude = coords.longitude?;
        let pm25 = self.value?;

        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return None;
        }
        if !pm25.is_finite() || pm25 < 0.0 {
            return None;
        }

        Some(StationReading {
            station_id: self.locations_id.to_string(),
            latitude,
            longitude,
            timestamp: self.datetime.utc,
            pm25,
        })
    }
}

/// A station's location with its computed AQI. Derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AqiPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub aqi: u16,
}

/// Everything a click-to-detail popup needs for one station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationDetail {
    // ---
    pub station_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    pub pm25: f64,
    /// Absent when the concentration fell outside the breakpoint table.
    pub aqi: Option<u16>,
    pub category: Option<AqiCategory>,
}

impl StationDetail {
    pub fn new(reading: &StationReading, aqi: Option<u16>) -> Self {
        // ---
        StationDetail {
            station_id: reading.station_id.clone(),
            latitude: reading.latitude,
            longitude: reading.longitude,
            timestamp: reading.timestamp,
            pm25: reading.pm25,
            aqi,
            category: aqi.map(AqiCategory::from_aqi),
        }
    }

    pub fn point(&self) -> Option<AqiPoint> {
        self.aqi.map(|aqi| AqiPoint {
            latitude: self.latitude,
            longitude: self.longitude,
            aqi,
        })
    }
}

/// Aggregate view over the station set of one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    // ---
    pub station_count: usize,
    pub mean_pm25: Option<f64>,
    pub mean_aqi: Option<f64>,
    pub category: Option<AqiCategory>,
}

impl Summary {
    pub fn from_stations(stations: &[StationDetail]) -> Self {
        // ---
        let mean = |values: Vec<f64>| {
            if values.is_empty() {
                None
            } else {
                Some(values.iter().sum::<f64>() / values.len() as f64)
            }
        };

        let mean_pm25 = mean(stations.iter().map(|s| s.pm25).collect());
        let mean_aqi = mean(
            stations
                .iter()
                .filter_map(|s| s.aqi.map(f64::from))
                .collect(),
        );

        Summary {
            station_count: stations.len(),
            mean_pm25,
            mean_aqi,
            category: mean_aqi.map(|a| AqiCategory::from_aqi(a.round() as u16)),
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;

    fn raw(value: Option<f64>, lat: Option<f64>, lon: Option<f64>) -> RawLatest {
        // ---
        RawLatest {
            datetime: RawDatetime {
                utc: Utc.with_ymd_and_hms(2025, 3, 26, 18, 45, 0).unwrap(),
            },
            value,
            coordinates: Some(RawCoordinates {
                latitude: lat,
                longitude: lon,
            }),
            locations_id: 2178,
            sensors_id: Some(3917),
        }
    }

    #[test]
    fn test_bbox_parse() {
        // ---
        let bbox: BoundingBox = "-0.5, 51.3, 0.3, 51.7".parse().unwrap();
        assert_eq!(bbox.min_lon, -0.5);
        assert_eq!(bbox.max_lat, 51.7);
        assert!(bbox.contains(51.5, -0.1));
        assert!(bbox.contains(51.3, 0.3));
        assert!(!bbox.contains(52.0, -0.1));

        assert!("1,2,3".parse::<BoundingBox>().is_err());
        assert!("a,b,c,d".parse::<BoundingBox>().is_err());
        assert!("1,2,0,3".parse::<BoundingBox>().is_err());
        assert!("0,-95,1,1".parse::<BoundingBox>().is_err());
    }

    #[test]
    fn test_raw_to_reading() {
        // ---
        let reading = raw(Some(14.2), Some(51.5), Some(-0.12)).to_reading().unwrap();
        assert_eq!(reading.station_id, "2178");
        assert_eq!(reading.pm25, 14.2);
        assert_eq!(reading.latitude, 51.5);
        assert_eq!(reading.longitude, -0.12);
    }

    #[test]
    fn test_raw_without_location_or_value_is_dropped() {
        // ---
        assert!(raw(None, Some(51.5), Some(-0.12)).to_reading().is_none());
        assert!(raw(Some(3.0), None, Some(-0.12)).to_reading().is_none());
        assert!(raw(Some(3.0), Some(51.5), None).to_reading().is_none());
        assert!(raw(Some(-1.0), Some(51.5), Some(-0.12)).to_reading().is_none());
        assert!(raw(Some(3.0), Some(91.0), Some(-0.12)).to_reading().is_none());

        let mut no_coords = raw(Some(3.0), Some(51.5), Some(-0.12));
        no_coords.coordinates = None;
        assert!(no_coords.to_reading().is_none());
    }

    #[test]
    fn test_summary() {
        // ---
        let t = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        let reading = |id: &str, pm25: f64| StationReading {
            station_id: id.into(),
            latitude: 0.0,
            longitude: 0.0,
            timestamp: t,
            pm25,
        };
        let stations = vec![
            StationDetail::new(&reading("a", 10.0), Some(42)),
            StationDetail::new(&reading("b", 20.0), Some(68)),
            StationDetail::new(&reading("c", 900.0), None),
        ];

        let summary = Summary::from_stations(&stations);
        assert_eq!(summary.station_count, 3);
        assert_eq!(summary.mean_pm25, Some(310.0));
        assert_eq!(summary.mean_aqi, Some(55.0));
        assert_eq!(summary.category, Some(AqiCategory::Moderate));

        let empty = Summary::from_stations(&[]);
        assert_eq!(empty.station_count, 0);
        assert_eq!(empty.mean_aqi, None);
        assert_eq!(empty.category, None);
    }
}
